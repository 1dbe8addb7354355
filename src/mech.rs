//! Position controller: the drive's motion state machine. Tracks where
//! the pickup is, executes sled and autoseek motion over the spiral
//! groove model, paces sector advance against the transport, emits
//! subchannel frames and keeps the SENS outputs honest. Runs on the
//! control core; the streamer follows the sector it publishes.

use std::thread;
use std::time::Duration;

use port::{AuthLine, Clock, CommandLink, ControlPort, DriveSpeed, SubqPort};
use psnee::Psnee;
use shared::{sens, Core, SharedState};
use subq::{self, ControlMode};
use timekeeper::{MicroSeconds, TimeKeeper, Timed};

/// Interval between single-track sled steps
const TRACK_MOVE_US: MicroSeconds = 15;
/// Settle delay before the serial read-out circuit is shut down
const SOCT_SETTLE_US: MicroSeconds = 300;
/// Read latency between a sector advance and its subchannel frame
const SUBQ_DELAY_US: MicroSeconds = 3_333;
/// 73:59:58, the outermost addressable track
const TRACK_MAX: i32 = 20892;
/// 74:00:00
const SECTOR_MAX: i32 = 333_000;
/// The sled limit switch asserts past this sector
const LIMIT_SWITCH_SECTOR: i32 = 3_000;

/// First sector of track `track` under the spiral groove model: density
/// rises toward the outer rim so the mapping is quadratic. Calibrated
/// against a 74 minute disc; seek timing depends on these exact
/// coefficients.
pub fn track_to_sector(track: i32) -> i32 {
    let t = track as f64;

    (t * t * 0.00031499 + t * 9.357516535) as i32
}

/// How many sectors track `track` holds
pub fn sectors_per_track(track: i32) -> i32 {
    (track as f64 * 0.000616397 + 9.0).round() as i32
}

/// Commanded sled motion
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SledMove {
    Stop,
    Forward,
    Reverse,
}

pub struct Mech {
    track: i32,
    /// Sector at which `track` was last recomputed
    sector_for_track_update: i32,
    /// Capacity of the current track, the denominator for the next
    /// track bump during playback
    track_capacity: i32,
    sled: SledMove,
    /// Reference track for seek click accounting
    original_track: i32,
    /// Tracks per seek click
    count_track: i32,
    /// Pending autoseek target track
    autoseek: Option<i32>,
    /// A sector advance happened and its subchannel frame is pending
    subq_pending: bool,
    /// Settle delay for a pending read-out shutdown is armed
    soct_pending: bool,
    control_mode: ControlMode,
    prev_speed: DriveSpeed,
    timekeeper: TimeKeeper,
    psnee: Psnee,
}

impl Mech {
    pub fn new() -> Mech {
        Mech {
            track: 0,
            sector_for_track_update: 0,
            track_capacity: sectors_per_track(0),
            sled: SledMove::Stop,
            original_track: 0,
            count_track: 0,
            autoseek: None,
            subq_pending: false,
            soct_pending: false,
            control_mode: ControlMode::Normal,
            prev_speed: DriveSpeed::X1,
            timekeeper: TimeKeeper::new(),
            psnee: Psnee::new(),
        }
    }

    pub fn track(&self) -> i32 {
        self.track
    }

    /// Begin continuous sled motion, toggling the count-out SENS bit
    /// every `tracks_per_click` tracks travelled
    pub fn start_sled(&mut self, direction: SledMove, tracks_per_click: i32) {
        self.sled = direction;
        self.original_track = self.track;
        self.count_track = tracks_per_click;
    }

    pub fn stop_sled(&mut self) {
        self.sled = SledMove::Stop;
    }

    /// Schedule a direct jump to `target` track. Completion time is
    /// proportional to the distance; the "automatic sequence" SENS bit
    /// stays up until the jump lands.
    pub fn start_autoseek<C>(&mut self, target: i32, shared: &SharedState, control: &C)
    where
        C: ControlPort + ?Sized,
    {
        let distance = (target - self.track).abs() as MicroSeconds;

        self.autoseek = Some(target);
        self.timekeeper.set_next_sync_delta(Timed::Autoseek, TRACK_MOVE_US * distance);

        shared.sens.set(sens::AS, true, control);

        debug!("autoseek {} -> {}", self.track, target);
    }

    pub fn set_control_mode(&mut self, mode: ControlMode) {
        self.control_mode = mode;
    }

    /// Control core entry point
    pub fn run<C, K, Q, L, A>(
        &mut self,
        shared: &SharedState,
        clock: &K,
        control: &C,
        subq_port: &mut Q,
        link: &mut L,
        auth: &mut A,
    ) -> !
    where
        C: ControlPort + ?Sized,
        K: Clock,
        Q: SubqPort,
        L: CommandLink,
        A: AuthLine,
    {
        shared.set_ready(Core::Control);
        while !shared.is_ready(Core::Stream) {
            thread::sleep(Duration::from_millis(1));
        }

        loop {
            self.tick(shared, clock, control, subq_port, link, auth);
        }
    }

    /// One control loop iteration. At most one motion transition
    /// happens per tick, evaluated in strict priority order: read-out
    /// shutdown, then sled, then autoseek, then playback advance.
    pub fn tick<C, K, Q, L, A>(
        &mut self,
        shared: &SharedState,
        clock: &K,
        control: &C,
        subq_port: &mut Q,
        link: &mut L,
        auth: &mut A,
    ) where
        C: ControlPort + ?Sized,
        K: Clock,
        Q: SubqPort,
        L: CommandLink,
        A: AuthLine,
    {
        self.timekeeper.advance_to(clock.now_us());

        control.set_limit_switch(shared.sector() > LIMIT_SWITCH_SECTOR);

        shared.service_link(link, control);

        let speed = shared.speed();
        if speed != self.prev_speed {
            debug!("speed change: {:?}", speed);
            control.set_speed(speed);
            self.prev_speed = speed;
        }

        if shared.soct() {
            self.tick_soct(shared, control);
        } else if self.sled != SledMove::Stop {
            self.tick_sled(shared, control);
        } else if self.autoseek.is_some() {
            self.tick_autoseek(shared, control);
        } else if shared.sens.get(sens::GFS) {
            self.tick_playback(shared, control, subq_port);
        }

        self.clamp(shared);

        let layout = shared.layout(shared.image_index());

        self.psnee.tick(
            self.timekeeper.now(),
            shared.sector(),
            shared.sens.get(sens::GFS),
            shared.soct(),
            layout.has_data(),
            auth,
        );
    }

    /// Branch 1: the read-out circuit was triggered by the host; give
    /// it its settle time, then shut it down
    fn tick_soct<C>(&mut self, shared: &SharedState, control: &C)
    where
        C: ControlPort + ?Sized,
    {
        if !self.soct_pending {
            self.soct_pending = true;
            self.timekeeper.set_next_sync_delta(Timed::Soct, SOCT_SETTLE_US);
        } else if self.timekeeper.needs_sync(Timed::Soct) {
            self.soct_pending = false;
            shared.set_soct(false);
            control.end_soct();
        }
    }

    /// Branch 2: continuous sled motion, one track per interval
    fn tick_sled<C>(&mut self, shared: &SharedState, control: &C)
    where
        C: ControlPort + ?Sized,
    {
        if !self.timekeeper.needs_sync(Timed::Sled) {
            return;
        }

        self.timekeeper.set_next_sync_delta(Timed::Sled, TRACK_MOVE_US);

        self.track += match self.sled {
            SledMove::Forward => 1,
            SledMove::Reverse => -1,
            SledMove::Stop => unreachable!(),
        };

        let sector = track_to_sector(self.track);

        shared.set_sector(sector);
        self.sector_for_track_update = sector;

        if (self.track - self.original_track).abs() >= self.count_track {
            self.original_track = self.track;
            self.toggle_cout(shared, control);
        }
    }

    /// Branch 3: a pending autoseek lands once its travel time elapsed
    fn tick_autoseek<C>(&mut self, shared: &SharedState, control: &C)
    where
        C: ControlPort + ?Sized,
    {
        if !self.timekeeper.needs_sync(Timed::Autoseek) {
            return;
        }

        // Checked by the caller
        let target = self.autoseek.take().unwrap();

        self.track = target;

        let sector = track_to_sector(target);

        shared.set_sector(sector);
        self.sector_for_track_update = sector;

        shared.sens.set(sens::AS, false, control);
        self.toggle_cout(shared, control);

        debug!("autoseek landed on track {} (sector {})", target, sector);
    }

    /// Branch 4: locked on and playing. Advance one sector each time
    /// the transport has caught up with us, then emit the subchannel
    /// frame after a short read latency.
    fn tick_playback<C, Q>(&mut self, shared: &SharedState, control: &C, subq_port: &mut Q)
    where
        C: ControlPort + ?Sized,
        Q: SubqPort,
    {
        let sector = shared.sector();

        if shared.sector_sending() == sector && !self.subq_pending {
            let next = sector + 1;

            shared.set_sector(next);

            if next - self.sector_for_track_update >= self.track_capacity {
                self.sector_for_track_update = next;
                self.track += 1;
                self.track_capacity = sectors_per_track(self.track);
            }

            self.subq_pending = true;
            self.timekeeper.set_next_sync_delta(Timed::SubQ, SUBQ_DELAY_US);
        }

        if self.subq_pending && self.timekeeper.needs_sync(Timed::SubQ) {
            shared.sens.set(sens::XBUSY, false, control);
            self.subq_pending = false;
            self.send_subq(shared, subq_port);
        }
    }

    fn send_subq<Q: SubqPort>(&mut self, shared: &SharedState, subq_port: &mut Q) {
        let layout = shared.layout(shared.image_index());
        let (frame, logical) = subq::generate(shared.sector(), layout, self.control_mode);

        if let Some(track) = logical {
            shared.set_logical_track(track);
        }

        subq_port.send(frame.wire_words());
    }

    fn toggle_cout<C>(&mut self, shared: &SharedState, control: &C)
    where
        C: ControlPort + ?Sized,
    {
        let toggled = !shared.sens.get(sens::COUT);

        shared.sens.set(sens::COUT, toggled, control);
    }

    /// Keep the position on the disc. Underflow resets to the start,
    /// overflow pins to the outermost addressable position.
    fn clamp(&mut self, shared: &SharedState) {
        let sector = shared.sector();

        if self.track < 0 || sector < 0 {
            debug!("position underflow, resetting to start");

            self.track = 0;
            shared.set_sector(0);
            self.sector_for_track_update = 0;
        } else if self.track > TRACK_MAX || sector > SECTOR_MAX {
            debug!("position overflow, clamping");

            self.track = TRACK_MAX;

            let max = track_to_sector(TRACK_MAX);

            shared.set_sector(max);
            self.sector_for_track_update = max;
        }
    }
}
