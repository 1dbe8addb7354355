//! Real-time sector streaming: a small sector cache in front of the
//! backing storage, the data-track scrambling transform and the
//! double-buffered hand-off to the audio transport. This is the whole
//! job of the streaming core; everything else runs on the control core.

use std::thread;
use std::time::Duration;

use disc::{DiscLayout, SECTOR_BYTES, SECTOR_SAMPLES, STREAM_START};
use port::{AudioPort, Clock, Storage};
use shared::{Core, SharedState};

/// Number of sectors kept in the round-robin cache
const CACHE_SLOTS: usize = 50;

/// How long the shared sector must sit still before a fill commits to
/// it (µs). Seeks move the sector faster than we can read.
const SECTOR_SETTLE_US: u64 = 100;

/// Generate the data-track scrambling key: for each 16-bit sample slot,
/// two bytes pulled out of the x^15 + x + 1 feedback register seeded
/// with 1, interleaved around an 8-step feedback round each. The
/// bitstream must match the one pressed into real discs exactly; the
/// first six entries stay zero because the 12-byte sector sync leader
/// is never scrambled.
pub fn scrambling_key() -> [u16; SECTOR_SAMPLES] {
    fn feedback_round(mut reg: u32) -> u32 {
        for _ in 0..8 {
            let bit = ((reg & 1) ^ ((reg & 2) >> 1)) << 15;
            reg = (bit | reg) >> 1;
        }

        reg
    }

    let mut key = [0u16; SECTOR_SAMPLES];
    let mut reg: u32 = 1;

    for i in 6..SECTOR_SAMPLES {
        let upper = (reg & 0xff) as u16;

        reg = feedback_round(reg);
        let lower = (reg & 0xff) as u16;

        key[i] = (lower << 8) | upper;

        reg = feedback_round(reg);
    }

    key
}

/// Fixed-capacity sector cache with round-robin replacement: no LRU, no
/// hit counting, the write cursor just wraps.
struct SectorCache {
    keys: [i32; CACHE_SLOTS],
    samples: Vec<[u16; SECTOR_SAMPLES]>,
    cursor: usize,
}

impl SectorCache {
    fn new() -> SectorCache {
        SectorCache {
            keys: [-1; CACHE_SLOTS],
            samples: vec![[0; SECTOR_SAMPLES]; CACHE_SLOTS],
            cursor: 0,
        }
    }

    fn lookup(&self, key: i32) -> Option<usize> {
        self.keys.iter().position(|&k| k == key)
    }

    /// Claim the slot at the write cursor for `key`
    fn insert(&mut self, key: i32) -> usize {
        let slot = self.cursor;

        self.keys[slot] = key;
        self.cursor = (slot + 1) % CACHE_SLOTS;

        slot
    }

    fn invalidate(&mut self) {
        self.keys = [-1; CACHE_SLOTS];
        self.cursor = 0;
    }
}

/// Cache key for a sector. The blank region before the program area is
/// folded into a small pseudo-range so that seeks through it cannot
/// evict the whole cache.
fn cache_key(sector: i32) -> i32 {
    if sector < STREAM_START {
        sector % CACHE_SLOTS as i32 + STREAM_START
    } else {
        sector
    }
}

/// The streaming engine. Owns the backing storages (one per disc
/// image), the cache and both output frames; all of it is allocated
/// here once, the steady-state loop never allocates.
pub struct Streamer<S> {
    storages: Vec<S>,
    cache: SectorCache,
    key: [u16; SECTOR_SAMPLES],
    /// Double buffer: one frame drains through the transport while the
    /// other fills from the cache
    frames: [[u32; SECTOR_SAMPLES]; 2],
    /// Which sector each frame was filled from
    frame_sector: [i32; 2],
    drain_frame: usize,
    fill_frame: usize,
    loaded_image: Option<usize>,
}

impl<S: Storage> Streamer<S> {
    pub fn new(storages: Vec<S>) -> Streamer<S> {
        Streamer {
            storages: storages,
            cache: SectorCache::new(),
            key: scrambling_key(),
            frames: [[0; SECTOR_SAMPLES]; 2],
            frame_sector: [-1; 2],
            drain_frame: 1,
            fill_frame: 0,
            loaded_image: None,
        }
    }

    /// Streaming core entry point: startup handshake with the control
    /// core, then the real-time loop.
    pub fn run<C, A>(&mut self, shared: &SharedState, clock: &C, audio: &mut A) -> !
    where
        C: Clock,
        A: AudioPort,
    {
        shared.set_ready(Core::Stream);
        while !shared.is_ready(Core::Control) {
            thread::sleep(Duration::from_millis(1));
        }

        loop {
            self.tick(shared, clock, audio);
        }
    }

    /// One iteration of the streaming loop: reload on image swap, top
    /// up the filling frame, swap buffers when the transport is done.
    pub fn tick<C, A>(&mut self, shared: &SharedState, clock: &C, audio: &mut A)
    where
        C: Clock,
        A: AudioPort,
    {
        let image = shared.image_index();

        if self.loaded_image != Some(image) {
            self.reload(image);
        }

        if self.fill_frame != self.drain_frame {
            // The controller can still be seeking; wait until the
            // sector has been stable for a moment before reading it
            let mut sector = shared.sector();
            let mut settle = clock.now_us();

            while clock.now_us() - settle < SECTOR_SETTLE_US {
                let s = shared.sector();

                if s != sector {
                    sector = s;
                    settle = clock.now_us();
                }
            }

            let layout = shared.layout(image);
            let scramble = layout.is_data_track(shared.logical_track());

            self.fill(sector, image, layout, scramble);

            self.frame_sector[self.fill_frame] = sector;
            self.fill_frame = (self.fill_frame + 1) % 2;
        }

        if !audio.frame_busy() {
            self.drain_frame = (self.drain_frame + 1) % 2;

            // Publish what is about to become audible
            shared.set_sector_sending(self.frame_sector[self.drain_frame]);

            // Hard synchronization point: starting anywhere but on a
            // fresh word clock period splices the frame mid-word
            audio.wait_word_clock_edge();
            audio.start_frame(&self.frames[self.drain_frame]);
        }
    }

    /// Fill the filling frame with `sector`'s conditioned samples
    fn fill(&mut self, sector: i32, image: usize, layout: &DiscLayout, scramble: bool) {
        let key = cache_key(sector);

        let slot = match self.cache.lookup(key) {
            Some(slot) => slot,
            None => self.read_sector(key, image, layout),
        };

        if sector < STREAM_START {
            // Blank region: silence on the output. The lookup above
            // still runs so the folded pseudo-sectors pre-warm the
            // cache with the start of the program area.
            self.frames[self.fill_frame] = [0; SECTOR_SAMPLES];
            return;
        }

        let samples = &self.cache.samples[slot];
        let frame = &mut self.frames[self.fill_frame];

        for i in 0..SECTOR_SAMPLES {
            let sample = if scramble {
                samples[i] ^ self.key[i]
            } else {
                samples[i]
            };

            // Widen to the 32-bit output lane with 8-bit sign extension
            let mut word = (sample as u32) << 8;

            if word & 0x100 != 0 {
                word |= 0xff;
            }

            frame[i] = word;
        }
    }

    /// Cache miss: pull the sector from the backing stream into the
    /// slot at the write cursor. I/O trouble degrades to silence, the
    /// protocol layer never hears about it.
    fn read_sector(&mut self, key: i32, image: usize, layout: &DiscLayout) -> usize {
        let data_sector = key - STREAM_START;
        let track = layout.track(layout.track_containing(data_sector));
        let offset = (data_sector - track.file_offset) as i64 * SECTOR_BYTES as i64;

        let storage = &mut self.storages[image];

        if offset >= 0 {
            if let Err(e) = storage.seek(offset as u64) {
                warn!("sector {}: seek failed ({}), rewinding", key, e);
                let _ = storage.seek(0);
            }
        }

        let mut raw = [0u8; SECTOR_BYTES];
        let mut nread = 0;

        while nread < SECTOR_BYTES {
            match storage.read(&mut raw[nread..]) {
                // Short read past the end of the image: the rest of
                // `raw` is already silence
                Ok(0) => break,
                Ok(n) => nread += n,
                Err(e) => {
                    warn!("sector {}: read failed ({}), substituting silence", key, e);
                    break;
                }
            }
        }

        let slot = self.cache.insert(key);
        let samples = &mut self.cache.samples[slot];

        for i in 0..SECTOR_SAMPLES {
            samples[i] = raw[2 * i] as u16 | (raw[2 * i + 1] as u16) << 8;
        }

        slot
    }

    /// Disc swap: drop every cache slot, silence both frames and reset
    /// the buffer assignment
    fn reload(&mut self, image: usize) {
        info!("loading disc image {}", image);

        self.cache.invalidate();
        self.frames = [[0; SECTOR_SAMPLES]; 2];
        self.frame_sector = [-1; 2];
        self.drain_frame = 1;
        self.fill_frame = 0;
        self.loaded_image = Some(image);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::Cursor;
    use std::io::{Read, Seek, SeekFrom};

    use super::{cache_key, scrambling_key, Streamer, CACHE_SLOTS};
    use disc::{DiscLayout, Track, TrackType, SECTOR_BYTES, SECTOR_SAMPLES, STREAM_START};
    use port::{AudioPort, Clock};
    use shared::SharedState;

    /// Deterministic clock advancing a fixed step per reading
    struct FakeClock {
        now: Cell<u64>,
    }

    impl FakeClock {
        fn new() -> FakeClock {
            FakeClock { now: Cell::new(0) }
        }
    }

    impl Clock for FakeClock {
        fn now_us(&self) -> u64 {
            let t = self.now.get() + 10;
            self.now.set(t);
            t
        }
    }

    /// Storage fake counting how many sector reads actually hit it
    struct CountingStorage {
        inner: Cursor<Vec<u8>>,
        reads: Cell<usize>,
    }

    impl CountingStorage {
        fn new(bytes: Vec<u8>) -> CountingStorage {
            CountingStorage {
                inner: Cursor::new(bytes),
                reads: Cell::new(0),
            }
        }
    }

    impl Read for CountingStorage {
        fn read(&mut self, buf: &mut [u8]) -> ::std::io::Result<usize> {
            self.reads.set(self.reads.get() + 1);
            self.inner.read(buf)
        }
    }

    impl Seek for CountingStorage {
        fn seek(&mut self, pos: SeekFrom) -> ::std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    /// Transport fake that is always ready and remembers the last frame
    struct FakeAudio {
        frames: Vec<[u32; SECTOR_SAMPLES]>,
    }

    impl FakeAudio {
        fn new() -> FakeAudio {
            FakeAudio { frames: Vec::new() }
        }
    }

    impl AudioPort for FakeAudio {
        fn frame_busy(&self) -> bool {
            false
        }

        fn wait_word_clock_edge(&mut self) {}

        fn start_frame(&mut self, frame: &[u32; SECTOR_SAMPLES]) {
            self.frames.push(*frame);
        }
    }

    fn single_track(track_type: TrackType, size: i32) -> DiscLayout {
        DiscLayout::from_tracks(&[Track {
            track_type: track_type,
            index0: 0,
            index1: 0,
            file_offset: 0,
            size: size,
        }]).unwrap()
    }

    /// Image where sector n's first sample is n, everything else 0
    fn numbered_image(sectors: i32) -> Vec<u8> {
        let mut bytes = vec![0u8; sectors as usize * SECTOR_BYTES];

        for n in 0..sectors {
            let at = n as usize * SECTOR_BYTES;
            bytes[at] = n as u8;
            bytes[at + 1] = (n >> 8) as u8;
        }

        bytes
    }

    fn harness(track_type: TrackType) -> (SharedState, Streamer<CountingStorage>, FakeClock, FakeAudio) {
        let layout = single_track(track_type, 200);
        let shared = SharedState::new(vec![layout]);

        if track_type == TrackType::Data {
            shared.set_logical_track(1);
        }

        let streamer = Streamer::new(vec![CountingStorage::new(numbered_image(200))]);

        (shared, streamer, FakeClock::new(), FakeAudio::new())
    }

    #[test]
    fn scrambling_key_golden() {
        let key = scrambling_key();

        // The sync leader is never scrambled
        assert!(key[0..6].iter().all(|&k| k == 0));
        // First scrambled bytes of the standard sequence: 01 80
        assert_eq!(key[6], 0x8001);

        // Cross-check the whole table against a bit-serial rendition of
        // the same x^15 + x + 1 register
        let mut reg: u32 = 1;
        let mut bit_serial = || -> u8 {
            let mut byte = 0u8;
            for i in 0..8 {
                byte |= ((reg & 1) as u8) << i;
                let fb = ((reg & 1) ^ ((reg & 2) >> 1)) << 15;
                reg = (fb | reg) >> 1;
            }
            byte
        };

        for i in 6..SECTOR_SAMPLES {
            let lo = bit_serial() as u16;
            let hi = bit_serial() as u16;

            assert_eq!(key[i], (hi << 8) | lo, "entry {}", i);
        }
    }

    #[test]
    fn scrambling_is_self_inverse() {
        let key = scrambling_key();

        let samples: Vec<u16> = (0..SECTOR_SAMPLES as u16).map(|i| i.wrapping_mul(0x1234)).collect();

        for i in 0..SECTOR_SAMPLES {
            assert_eq!(samples[i] ^ key[i] ^ key[i], samples[i]);
        }
    }

    #[test]
    fn blank_region_cache_keys() {
        assert_eq!(cache_key(STREAM_START), STREAM_START);
        assert_eq!(cache_key(STREAM_START + 7), STREAM_START + 7);

        // Pre-program sectors fold into a 50-sector pseudo-range
        for sector in 0..STREAM_START {
            let key = cache_key(sector);
            assert!(key >= STREAM_START && key < STREAM_START + CACHE_SLOTS as i32);
        }
    }

    #[test]
    fn round_robin_eviction() {
        let (shared, mut streamer, clock, mut audio) = harness(TrackType::Audio);

        let reads = |s: &Streamer<CountingStorage>| s.storages[0].reads.get();

        // Prime the cache with CACHE_SLOTS distinct sectors
        for n in 0..CACHE_SLOTS as i32 {
            shared.set_sector(STREAM_START + n);
            streamer.tick(&shared, &clock, &mut audio);
            streamer.tick(&shared, &clock, &mut audio);
        }

        let primed = reads(&streamer);

        // Re-requesting a recent sector is served from the cache: zero
        // storage reads
        shared.set_sector(STREAM_START + 10);
        streamer.tick(&shared, &clock, &mut audio);
        assert_eq!(reads(&streamer), primed);

        // One more distinct sector evicts the oldest entry in exactly
        // one read
        shared.set_sector(STREAM_START + CACHE_SLOTS as i32);
        streamer.tick(&shared, &clock, &mut audio);
        assert_eq!(reads(&streamer), primed + 1);

        // The evicted sector misses again: exactly one more read
        shared.set_sector(STREAM_START);
        streamer.tick(&shared, &clock, &mut audio);
        assert_eq!(reads(&streamer), primed + 2);
    }

    #[test]
    fn lead_in_prewarms_program_start() {
        let (shared, mut streamer, clock, mut audio) = harness(TrackType::Audio);

        // Parked in the blank region: the output is silent but the
        // folded cache key pulls the matching program sector in
        shared.set_sector(0);
        streamer.tick(&shared, &clock, &mut audio);
        streamer.tick(&shared, &clock, &mut audio);

        assert_eq!(streamer.storages[0].reads.get(), 1);
        assert!(audio.frames.last().unwrap().iter().all(|&w| w == 0));

        // Playback reaching the program start finds the sector already
        // cached: no storage read
        shared.set_sector(STREAM_START);
        streamer.tick(&shared, &clock, &mut audio);

        assert_eq!(streamer.storages[0].reads.get(), 1);
        assert_eq!(audio.frames.last().unwrap()[1], 0);
    }

    #[test]
    fn audio_passes_through_conditioned() {
        let (shared, mut streamer, clock, mut audio) = harness(TrackType::Audio);

        shared.set_sector(STREAM_START + 3);
        streamer.tick(&shared, &clock, &mut audio);
        streamer.tick(&shared, &clock, &mut audio);

        let frame = audio.frames.last().unwrap();

        // Sample value 3: shifted into the 32-bit lane, bit 8 set so
        // the low byte gets the sign extension
        assert_eq!(frame[0], (3 << 8) | 0xff);
        // Value 0 stays 0
        assert_eq!(frame[1], 0);

        assert_eq!(shared.sector_sending(), STREAM_START + 3);
    }

    #[test]
    fn data_tracks_are_scrambled() {
        let (shared, mut streamer, clock, mut audio) = harness(TrackType::Data);

        shared.set_sector(STREAM_START + 4);
        streamer.tick(&shared, &clock, &mut audio);
        streamer.tick(&shared, &clock, &mut audio);

        let key = scrambling_key();
        let frame = audio.frames.last().unwrap();

        let expect = |sample: u16| -> u32 {
            let mut w = (sample as u32) << 8;
            if w & 0x100 != 0 {
                w |= 0xff;
            }
            w
        };

        assert_eq!(frame[0], expect(4 ^ key[0]));
        assert_eq!(frame[7], expect(0 ^ key[7]));
    }

    #[test]
    fn blank_region_streams_silence() {
        let (shared, mut streamer, clock, mut audio) = harness(TrackType::Audio);

        shared.set_sector(100);
        streamer.tick(&shared, &clock, &mut audio);
        streamer.tick(&shared, &clock, &mut audio);

        assert!(audio.frames.last().unwrap().iter().all(|&w| w == 0));
    }

    #[test]
    fn reload_invalidates_everything() {
        let layout = || single_track(TrackType::Audio, 200);
        let shared = SharedState::new(vec![layout(), layout()]);

        let mut streamer = Streamer::new(vec![
            CountingStorage::new(numbered_image(200)),
            CountingStorage::new(numbered_image(200)),
        ]);
        let clock = FakeClock::new();
        let mut audio = FakeAudio::new();

        shared.set_sector(STREAM_START + 5);
        streamer.tick(&shared, &clock, &mut audio);
        streamer.tick(&shared, &clock, &mut audio);

        let before = streamer.storages[0].reads.get();

        // Swap away and back: the cache must not survive the trip. Park
        // the head in the blank region so the post-reload fill stays
        // silent and the zeroing is observable.
        shared.set_sector(0);
        shared.set_image_index(1);
        streamer.tick(&shared, &clock, &mut audio);

        // Frames are zeroed on reload
        assert!(streamer.frames.iter().all(|f| f.iter().all(|&w| w == 0)));

        shared.set_sector(STREAM_START + 5);
        shared.set_image_index(0);
        streamer.tick(&shared, &clock, &mut audio);
        streamer.tick(&shared, &clock, &mut audio);

        assert!(streamer.storages[0].reads.get() > before);
    }
}
