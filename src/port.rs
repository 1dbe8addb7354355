//! Narrow contracts for the collaborators surrounding the emulation
//! core: block storage behind the disc image, the synchronous audio
//! transport, the subchannel lane, the mechacon-facing status outputs,
//! the serial command link and the authentication line. Peripheral
//! bring-up (pin directions, clock dividers, DMA channels) happens on
//! the other side of these traits.

use std::io;
use std::io::{Read, Seek, SeekFrom};
use std::time::Instant;

use disc::SECTOR_SAMPLES;

/// Monotonic time source for the real-time loops. Abstracted so the
/// tests can drive time deterministically.
pub trait Clock {
    /// Microseconds elapsed since an arbitrary epoch
    fn now_us(&self) -> u64;
}

/// Wall clock backed by `std::time::Instant`
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    pub fn new() -> WallClock {
        WallClock {
            epoch: Instant::now(),
        }
    }
}

impl Clock for WallClock {
    fn now_us(&self) -> u64 {
        let d = self.epoch.elapsed();

        d.as_secs() * 1_000_000 + (d.subsec_nanos() / 1_000) as u64
    }
}

/// Seek/read contract over a disc image's backing stream. The streamer
/// depends on nothing else.
pub trait Storage {
    fn seek(&mut self, byte_offset: u64) -> io::Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: Read + Seek> Storage for T {
    fn seek(&mut self, byte_offset: u64) -> io::Result<()> {
        Seek::seek(self, SeekFrom::Start(byte_offset)).map(|_| ())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }
}

/// Playback speed of the drive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveSpeed {
    /// 75 sectors per second
    X1,
    /// 150 sectors per second
    X2,
}

/// Synchronous audio/data output. One frame is a full sector's worth of
/// conditioned 32-bit samples clocked out at playback speed.
pub trait AudioPort {
    /// True while the transport is still draining the active frame
    fn frame_busy(&self) -> bool;

    /// Block until a completed low/high pair has passed on the output
    /// word clock. Starting a frame anywhere else splices it mid-word.
    fn wait_word_clock_edge(&mut self);

    /// Hand a freshly filled frame to the transport
    fn start_frame(&mut self, frame: &[u32; SECTOR_SAMPLES]);
}

/// Subchannel lane: one 12-byte Q frame packed into 3 words per cycle
pub trait SubqPort {
    fn send(&mut self, words: [u32; 3]);
}

/// Status outputs toward the host. The SENS pin can be refreshed from
/// either core so implementations must tolerate shared access.
pub trait ControlPort: Sync {
    /// Drive the level of the currently selected SENS bit
    fn set_sens(&self, level: bool);

    /// Sled limit switch, asserted once the head is past sector 3000
    fn set_limit_switch(&self, level: bool);

    /// Shut the serial read-out circuit down after its settle delay
    fn end_soct(&self);

    /// Reconfigure the output clocks for a speed change
    fn set_speed(&self, speed: DriveSpeed);
}

/// Serial command byte stream from the host's mechanical controller
pub trait CommandLink {
    /// Pop the next pending command byte, if any
    fn poll_byte(&mut self) -> Option<u8>;
}

/// Authentication (SCEX) output line
pub trait AuthLine {
    fn set(&mut self, level: bool);
}
