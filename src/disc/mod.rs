//! Disc layout: the parsed track table and the geometry derived from
//! it. The table is populated once per image load from a cue sheet
//! description and is never mutated afterwards; everything here is
//! plain data and query functions.

use std::error::Error;
use std::fmt;

use arrayvec::ArrayVec;

pub mod msf;

/// Sectors in the lead-in area preceding the program area
pub const LEAD_IN: i32 = 4500;
/// Track 1's hardcoded 2 second pre-gap (150 = 2 * 75 frames)
pub const PRE_GAP: i32 = 150;
/// First sector backed by image data
pub const STREAM_START: i32 = LEAD_IN + PRE_GAP;
/// Size of a CD sector in bytes: 2 channels x 588 samples x 2 bytes
pub const SECTOR_BYTES: usize = 2352;
/// 16bit samples per sector, both channels interleaved
pub const SECTOR_SAMPLES: usize = SECTOR_BYTES / 2;
/// Highest track number a table of contents can carry
pub const MAX_TRACKS: usize = 99;

/// Type of a single track
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackType {
    Audio,
    Data,
}

/// One entry of the track table. Sector fields are relative to the
/// start of the program area, not the physical beginning of the disc.
#[derive(Clone, Copy)]
pub struct Track {
    pub track_type: TrackType,
    /// Start of the track's pre-gap
    pub index0: i32,
    /// Start of the track proper
    pub index1: i32,
    /// Sector offset of the track within its backing stream
    pub file_offset: i32,
    /// Length in sectors
    pub size: i32,
}

impl Track {
    fn blank() -> Track {
        Track {
            track_type: TrackType::Audio,
            index0: 0,
            index1: 0,
            file_offset: 0,
            size: 0,
        }
    }
}

/// Error while building a layout from a cue description
#[derive(Debug)]
pub enum LoadError {
    /// The description names more tracks than a disc can hold
    TooManyTracks(usize),
    /// A track's index markers are inconsistent (index1 < index0)
    BadIndex(usize),
}

impl fmt::Display for LoadError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LoadError::TooManyTracks(n) => write!(fmt, "description names {} tracks, max is {}", n, MAX_TRACKS),
            LoadError::BadIndex(t) => write!(fmt, "track {} has index1 before index0", t),
        }
    }
}

impl Error for LoadError {
    fn description(&self) -> &str {
        "disc description error"
    }
}

/// Track table plus derived geometry. Tracks are stored 1-indexed like
/// track numbers, with a dummy entry 0 and a synthetic lead-out entry
/// at `track_count + 1`.
pub struct DiscLayout {
    tracks: ArrayVec<Track, 101>,
    track_count: usize,
    has_data: bool,
}

impl DiscLayout {
    /// Build the layout from a parsed cue description. The lead-out
    /// entry is always derived from the last real track's end, never
    /// taken from the description; an empty description degrades to a
    /// structurally valid single-track data disc.
    pub fn from_tracks(desc: &[Track]) -> Result<DiscLayout, LoadError> {
        if desc.len() > MAX_TRACKS {
            return Err(LoadError::TooManyTracks(desc.len()));
        }

        let mut tracks = ArrayVec::new();

        // Dummy entry 0, the table is 1-indexed
        tracks.push(Track::blank());

        if desc.is_empty() {
            warn!("empty disc description, substituting a single data track");

            let mut t = Track::blank();
            t.track_type = TrackType::Data;
            tracks.push(t);
        } else {
            for (i, t) in desc.iter().enumerate() {
                if t.index1 < t.index0 {
                    return Err(LoadError::BadIndex(i + 1));
                }

                tracks.push(*t);
            }
        }

        let track_count = tracks.len() - 1;

        // Synthetic lead-out, pinned to the preceding track's end
        let last = tracks[track_count];
        let end = last.index1 + last.size;

        tracks.push(Track {
            track_type: last.track_type,
            index0: end,
            index1: end,
            file_offset: end,
            size: 0,
        });

        let has_data = tracks[1..].iter().any(|t| t.track_type == TrackType::Data);

        info!("disc layout: {} tracks, lead-out at {}, data: {}", track_count, end, has_data);

        Ok(DiscLayout {
            tracks: tracks,
            track_count: track_count,
            has_data: has_data,
        })
    }

    pub fn track_count(&self) -> usize {
        self.track_count
    }

    /// True if any track holds data. Such discs stream scrambled and
    /// announce themselves as mixed-mode in the table of contents.
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Entry for logical track `index`, the synthetic lead-out entry
    /// for anything past it
    pub fn track(&self, index: usize) -> &Track {
        if index <= self.track_count + 1 {
            &self.tracks[index]
        } else {
            &self.tracks[self.track_count + 1]
        }
    }

    /// Locate the logical track owning `data_sector` (program-area
    /// relative): the track whose successor starts after it. Track
    /// counts are tiny so a linear scan is plenty.
    pub fn track_containing(&self, data_sector: i32) -> usize {
        for i in 1..self.track_count + 1 {
            if self.tracks[i + 1].index0 > data_sector {
                return i;
            }
        }

        // Seek overshot past the end of the disc
        self.track_count + 1
    }

    pub fn is_data_track(&self, index: usize) -> bool {
        self.track(index).track_type == TrackType::Data
    }
}
