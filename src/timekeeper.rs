//! Deadline bookkeeping for the control loop. Instead of scattering
//! ad-hoc timer variables through the loop body, every timed subsystem
//! owns a slot here and asks whether its delay has expired.

/// Struct keeping track of the drive's timed events
pub struct TimeKeeper {
    /// Current date. Unit is one microsecond of wall time.
    now: MicroSeconds,
    /// Deadlines for the various timed subsystems
    timesheets: [TimeSheet; 4],
}

impl TimeKeeper {
    pub fn new() -> TimeKeeper {
        TimeKeeper {
            now: 0,
            timesheets: [TimeSheet::new(); 4],
        }
    }

    /// Move the current date forward. Time never runs backwards so a
    /// stale `now` is simply ignored.
    pub fn advance_to(&mut self, now: MicroSeconds) {
        if now > self.now {
            self.now = now;
        }
    }

    pub fn now(&self) -> MicroSeconds {
        self.now
    }

    pub fn set_next_sync_delta(&mut self, who: Timed, delta: MicroSeconds) {
        self.timesheets[who as usize].set_next_sync(self.now + delta)
    }

    pub fn needs_sync(&self, who: Timed) -> bool {
        self.timesheets[who as usize].needs_sync(self.now)
    }
}

/// Deadline for a single timed subsystem
#[derive(Clone, Copy)]
struct TimeSheet {
    /// Date at which the subsystem's delay expires
    next_sync: MicroSeconds,
}

impl TimeSheet {
    fn new() -> TimeSheet {
        TimeSheet {
            // Expired from the start: the owning state machine arms the
            // deadline before it relies on it.
            next_sync: 0,
        }
    }

    fn set_next_sync(&mut self, when: MicroSeconds) {
        self.next_sync = when;
    }

    fn needs_sync(&self, now: MicroSeconds) -> bool {
        self.next_sync <= now
    }
}

/// List of all timed subsystems owning a TimeSheet. The value of the
/// enum is used as the index in the table.
#[derive(Clone, Copy, Debug)]
pub enum Timed {
    /// Sled stepping interval
    Sled,
    /// Pending autoseek completion
    Autoseek,
    /// Read latency before the next subchannel frame
    SubQ,
    /// Serial read-out circuit settle delay
    Soct,
}

/// 64bit microsecond timestamps will wrap in roughly 584000 years so it
/// should be plenty enough.
pub type MicroSeconds = u64;
