//! State shared between the control core and the streaming core. Most
//! fields are read much more often than they change and a slightly
//! stale reading is harmless, so they are relaxed atomics; only the
//! command latch needs real mutual exclusion.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

use disc::DiscLayout;
use port::{CommandLink, ControlPort, DriveSpeed};

/// SENS bit indices, selected by the top nibble of the latest latched
/// command byte
pub mod sens {
    /// Focus zero cross
    pub const FZC: usize = 0x0;
    /// Automatic sequence busy
    pub const AS: usize = 0x1;
    /// Tracking zero cross
    pub const TZC: usize = 0x2;
    /// Transfer busy
    pub const XBUSY: usize = 0x4;
    /// Focus OK
    pub const FOK: usize = 0x5;
    /// Good frame sync
    pub const GFS: usize = 0xa;
    /// Sled servo compensation
    pub const COMP: usize = 0xb;
    /// Sled count out
    pub const COUT: usize = 0xc;
    /// Tracking error overflow
    pub const OV64: usize = 0xe;
}

/// The two execution cores taking part in the startup handshake
#[derive(Clone, Copy)]
pub enum Core {
    Control = 0,
    Stream = 1,
}

/// The 16 SENS status bits and the index of the one currently routed to
/// the output pin
pub struct SensVector {
    flags: AtomicU16,
    current: AtomicU8,
}

impl SensVector {
    fn new() -> SensVector {
        SensVector {
            // The servo chip we impersonate always reports focus OK and
            // frame sync locked
            flags: AtomicU16::new(1 << sens::FOK | 1 << sens::GFS),
            current: AtomicU8::new(0),
        }
    }

    /// Set one status bit and refresh the pin if that bit happens to be
    /// the selected one
    pub fn set<C: ControlPort + ?Sized>(&self, bit: usize, level: bool, control: &C) {
        let mask = 1u16 << bit;

        if level {
            self.flags.fetch_or(mask, Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!mask, Ordering::Relaxed);
        }

        if self.current.load(Ordering::Relaxed) as usize == bit {
            control.set_sens(level);
        }
    }

    pub fn get(&self, bit: usize) -> bool {
        self.flags.load(Ordering::Relaxed) & (1 << bit) != 0
    }

    /// Route `bit` to the output pin, driving the pin to its level
    pub fn select<C: ControlPort + ?Sized>(&self, bit: usize, control: &C) {
        self.current.store(bit as u8, Ordering::Relaxed);
        control.set_sens(self.get(bit));
    }
}

/// Shift register mirroring the host's serial command stream. Every
/// byte shifts in at the top; the top nibble of the newest byte selects
/// the SENS output.
pub struct CommandLatch {
    latched: u32,
}

impl CommandLatch {
    fn new() -> CommandLatch {
        CommandLatch { latched: 0 }
    }

    /// Current 24-bit latch contents, newest byte in bits 16..24
    pub fn word(&self) -> u32 {
        self.latched
    }

    /// Shift one received byte in and return it
    pub fn push(&mut self, byte: u8) -> u8 {
        self.latched >>= 8;
        self.latched |= (byte as u32) << 16;

        byte
    }
}

/// Everything both cores look at. Constructed once before the cores
/// start, then only touched through the accessors.
pub struct SharedState {
    layouts: Vec<DiscLayout>,
    /// Sector the pickup is positioned over
    sector: AtomicI32,
    /// Sector whose samples are currently draining to the output
    sector_sending: AtomicI32,
    /// Logical track the pickup sits in
    logical_track: AtomicUsize,
    /// Which loaded image is in the tray
    image_index: AtomicUsize,
    speed: AtomicU8,
    /// Serial read-out circuit engaged
    soct: AtomicBool,
    pub sens: SensVector,
    pub latch: Mutex<CommandLatch>,
    ready: [AtomicBool; 2],
}

impl SharedState {
    pub fn new(layouts: Vec<DiscLayout>) -> SharedState {
        assert!(!layouts.is_empty());

        SharedState {
            layouts: layouts,
            sector: AtomicI32::new(0),
            sector_sending: AtomicI32::new(-1),
            logical_track: AtomicUsize::new(0),
            image_index: AtomicUsize::new(0),
            speed: AtomicU8::new(1),
            soct: AtomicBool::new(false),
            sens: SensVector::new(),
            latch: Mutex::new(CommandLatch::new()),
            ready: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    pub fn layout(&self, image: usize) -> &DiscLayout {
        &self.layouts[image % self.layouts.len()]
    }

    pub fn image_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn sector(&self) -> i32 {
        self.sector.load(Ordering::Relaxed)
    }

    pub fn set_sector(&self, sector: i32) {
        self.sector.store(sector, Ordering::Relaxed);
    }

    pub fn sector_sending(&self) -> i32 {
        self.sector_sending.load(Ordering::Relaxed)
    }

    pub fn set_sector_sending(&self, sector: i32) {
        self.sector_sending.store(sector, Ordering::Relaxed);
    }

    pub fn logical_track(&self) -> usize {
        self.logical_track.load(Ordering::Relaxed)
    }

    pub fn set_logical_track(&self, track: usize) {
        self.logical_track.store(track, Ordering::Relaxed);
    }

    pub fn image_index(&self) -> usize {
        self.image_index.load(Ordering::Relaxed) % self.layouts.len()
    }

    pub fn set_image_index(&self, index: usize) {
        self.image_index.store(index % self.layouts.len(), Ordering::Relaxed);
    }

    pub fn speed(&self) -> DriveSpeed {
        match self.speed.load(Ordering::Relaxed) {
            2 => DriveSpeed::X2,
            _ => DriveSpeed::X1,
        }
    }

    pub fn set_speed(&self, speed: DriveSpeed) {
        let v = match speed {
            DriveSpeed::X1 => 1,
            DriveSpeed::X2 => 2,
        };

        self.speed.store(v, Ordering::Relaxed);
    }

    pub fn soct(&self) -> bool {
        self.soct.load(Ordering::Relaxed)
    }

    pub fn set_soct(&self, engaged: bool) {
        self.soct.store(engaged, Ordering::Relaxed);
    }

    pub fn set_ready(&self, core: Core) {
        self.ready[core as usize].store(true, Ordering::Release);
    }

    pub fn is_ready(&self, core: Core) -> bool {
        self.ready[core as usize].load(Ordering::Acquire)
    }

    /// Drain pending command bytes into the latch, keeping the SENS
    /// output in sync with the newest byte's register selection. Must
    /// only be called from the control core.
    pub fn service_link<L, C>(&self, link: &mut L, control: &C) -> Option<u8>
    where
        L: CommandLink,
        C: ControlPort + ?Sized,
    {
        // The latch is only ever contended against a host probing it
        // mid-service; skipping a pass is fine, blocking is not
        let mut latch = match self.latch.try_lock() {
            Ok(l) => l,
            Err(_) => return None,
        };

        let mut newest = None;

        while let Some(byte) = link.poll_byte() {
            newest = Some(latch.push(byte));
        }

        if let Some(byte) = newest {
            self.sens.select((byte >> 4) as usize, control);
        }

        newest
    }
}
