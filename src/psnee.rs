//! Authentication pulse generator. Once the drive has been sitting
//! settled near the start of the disc for long enough, the console
//! expects the characteristic wobble bit patterns on the auth line
//! before it will treat the disc as genuine. The generator is a
//! debounced trigger in front of a timed bit sequencer; the sequencer
//! runs as a state machine ticked from the control loop so abort
//! conditions are checked at every bit boundary.

use port::AuthLine;
use timekeeper::MicroSeconds;

/// Sequences only fire while the pickup sits below this sector
const WINDOW: i32 = 4500;
/// Minimum spacing between qualifying checks
const DEBOUNCE_US: MicroSeconds = 13_333;
/// Qualifying checks needed before a sequence fires
const HYSTERESIS: u32 = 100;
/// Low framing gap before and between repetitions
const GAP_US: MicroSeconds = 90_000;
/// Duration of a single pattern bit
const BIT_US: MicroSeconds = 4_000;
/// Repetitions per sequence, cycling through the 3 patterns
const REPS: usize = 6;
/// Bits per pattern
pub const PATTERN_BITS: usize = 44;

/// The three regional wobble patterns, transmitted round-robin. Bit
/// timing aside, these are the only thing the console checks, so they
/// must be reproduced verbatim.
pub static SCEX_PATTERNS: [[u8; PATTERN_BITS]; 3] = [
    [1, 0, 0, 1, 1, 0, 1, 0, 1, 0, 0, 1, 0, 0, 1, 1, 1, 1, 0, 1, 0, 0,
     1, 0, 1, 0, 1, 1, 1, 0, 1, 0, 0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 0, 0],
    [1, 0, 0, 1, 1, 0, 1, 0, 1, 0, 0, 1, 0, 0, 1, 1, 1, 1, 0, 1, 0, 0,
     1, 0, 1, 0, 1, 1, 1, 0, 1, 0, 0, 1, 0, 1, 1, 1, 1, 1, 0, 1, 0, 0],
    [1, 0, 0, 1, 1, 0, 1, 0, 1, 0, 0, 1, 0, 0, 1, 1, 1, 1, 0, 1, 0, 0,
     1, 0, 1, 0, 1, 1, 1, 0, 1, 0, 0, 1, 0, 1, 1, 0, 1, 1, 0, 1, 0, 0],
];

/// Outcome of one generator tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqStatus {
    /// No sequence active
    Idle,
    /// A sequence is in flight
    Continue,
    /// A sequence just ran to completion, line back at idle high
    Done,
    /// A sequence was cut short, line left low
    Aborted,
}

#[derive(Clone, Copy)]
enum State {
    Idle,
    /// Line held low until the deadline; `next_rep` is the repetition
    /// about to start, `REPS` meaning the sequence is over
    Gap { next_rep: usize, until: MicroSeconds },
    /// Transmitting bit `bit` of repetition `rep` until the deadline
    Bit { rep: usize, bit: usize, until: MicroSeconds },
}

pub struct Psnee {
    state: State,
    hysteresis: u32,
    last_check: MicroSeconds,
}

impl Psnee {
    pub fn new() -> Psnee {
        Psnee {
            state: State::Idle,
            hysteresis: 0,
            last_check: 0,
        }
    }

    /// Advance the generator. `gfs`, `soct` and `has_data` are the
    /// qualifying inputs sampled by the caller this tick.
    pub fn tick<A: AuthLine>(
        &mut self,
        now: MicroSeconds,
        sector: i32,
        gfs: bool,
        soct: bool,
        has_data: bool,
        line: &mut A,
    ) -> SeqStatus {
        match self.state {
            State::Idle => {
                // Data discs carry real signatures and never need our
                // help; only pulse for pure audio layouts
                let qualifies = sector > 0
                    && sector < WINDOW
                    && gfs
                    && !soct
                    && !has_data
                    && now - self.last_check > DEBOUNCE_US;

                if qualifies {
                    self.hysteresis += 1;
                    self.last_check = now;
                }

                if self.hysteresis > HYSTERESIS {
                    self.hysteresis = 0;
                    debug!("+SCEX");

                    line.set(false);
                    self.state = State::Gap {
                        next_rep: 0,
                        until: now + GAP_US,
                    };

                    return SeqStatus::Continue;
                }

                SeqStatus::Idle
            }

            State::Gap { next_rep, until } => {
                if sector >= WINDOW || soct {
                    return self.abort(now, line);
                }

                if now < until {
                    return SeqStatus::Continue;
                }

                if next_rep == REPS {
                    debug!("-SCEX");
                    line.set(true);
                    self.state = State::Idle;

                    return SeqStatus::Done;
                }

                self.start_bit(next_rep, 0, now, line);

                SeqStatus::Continue
            }

            State::Bit { rep, bit, until } => {
                if sector >= WINDOW || soct {
                    return self.abort(now, line);
                }

                if now < until {
                    return SeqStatus::Continue;
                }

                if bit + 1 == PATTERN_BITS {
                    // Repetition done, low gap before the next one
                    line.set(false);
                    self.state = State::Gap {
                        next_rep: rep + 1,
                        until: now + GAP_US,
                    };
                } else {
                    self.start_bit(rep, bit + 1, now, line);
                }

                SeqStatus::Continue
            }
        }
    }

    fn start_bit<A: AuthLine>(&mut self, rep: usize, bit: usize, now: MicroSeconds, line: &mut A) {
        line.set(SCEX_PATTERNS[rep % 3][bit] != 0);
        self.state = State::Bit {
            rep: rep,
            bit: bit,
            until: now + BIT_US,
        };
    }

    /// Cut the sequence short. The debounce clock restarts from the
    /// abort time so a retrigger needs the full qualification period
    /// again.
    fn abort<A: AuthLine>(&mut self, now: MicroSeconds, line: &mut A) -> SeqStatus {
        debug!("-SCEX (aborted)");

        line.set(false);
        self.state = State::Idle;
        self.last_check = now;

        SeqStatus::Aborted
    }
}

#[cfg(test)]
mod tests {
    use super::{Psnee, SeqStatus, BIT_US, DEBOUNCE_US, GAP_US, PATTERN_BITS, REPS, SCEX_PATTERNS};
    use port::AuthLine;

    struct RecordingLine {
        level: bool,
        edges: Vec<bool>,
    }

    impl RecordingLine {
        fn new() -> RecordingLine {
            RecordingLine {
                level: true,
                edges: Vec::new(),
            }
        }
    }

    impl AuthLine for RecordingLine {
        fn set(&mut self, level: bool) {
            self.level = level;
            self.edges.push(level);
        }
    }

    /// Feed qualifying ticks until a sequence starts, returning the
    /// time it started at
    fn trigger(psnee: &mut Psnee, line: &mut RecordingLine) -> u64 {
        let mut now = 0;

        for _ in 0..200 {
            now += DEBOUNCE_US + 1;

            if psnee.tick(now, 100, true, false, false, line) == SeqStatus::Continue {
                return now;
            }
        }

        panic!("sequence never fired");
    }

    #[test]
    fn debounce_needs_sustained_qualification() {
        let mut psnee = Psnee::new();
        let mut line = RecordingLine::new();

        // Rapid-fire checks inside the debounce window never accumulate
        for now in 1..10_000 {
            assert_eq!(psnee.tick(now, 100, true, false, false, &mut line), SeqStatus::Idle);
        }

        // Checks while unqualified never accumulate either
        let mut now = 10_000;
        for _ in 0..200 {
            now += DEBOUNCE_US + 1;
            assert_eq!(psnee.tick(now, 100, false, false, false, &mut line), SeqStatus::Idle);
            assert_eq!(psnee.tick(now + 1, 100, true, true, false, &mut line), SeqStatus::Idle);
            assert_eq!(psnee.tick(now + 2, 5000, true, false, false, &mut line), SeqStatus::Idle);
            assert_eq!(psnee.tick(now + 3, 100, true, false, true, &mut line), SeqStatus::Idle);
        }

        assert!(line.edges.is_empty());
    }

    #[test]
    fn full_sequence_shape() {
        let mut psnee = Psnee::new();
        let mut line = RecordingLine::new();

        let mut now = trigger(&mut psnee, &mut line);

        // Run to completion with sub-bit tick granularity
        let mut status = SeqStatus::Continue;
        let start = now;

        while status == SeqStatus::Continue {
            now += 500;
            status = psnee.tick(now, 100, true, false, false, &mut line);
        }

        assert_eq!(status, SeqStatus::Done);
        assert!(line.level);

        // Edge log: initial low, then per repetition 44 bits and a
        // closing low, then the final idle high
        assert_eq!(line.edges.len(), 1 + REPS * (PATTERN_BITS + 1) + 1);
        assert_eq!(line.edges[0], false);
        assert_eq!(*line.edges.last().unwrap(), true);

        for rep in 0..REPS {
            let base = 1 + rep * (PATTERN_BITS + 1);
            let pattern = &SCEX_PATTERNS[rep % 3];

            for bit in 0..PATTERN_BITS {
                assert_eq!(line.edges[base + bit], pattern[bit] != 0, "rep {} bit {}", rep, bit);
            }

            assert_eq!(line.edges[base + PATTERN_BITS], false);
        }

        // Nominal duration: 7 gaps plus 6 * 44 bits, within one tick's
        // slack per transition
        let nominal = (REPS as u64 + 1) * GAP_US + (REPS * PATTERN_BITS) as u64 * BIT_US;
        let elapsed = now - start;

        assert!(elapsed >= nominal);
        assert!(elapsed < nominal + 500 * (line.edges.len() as u64 + 1));
    }

    #[test]
    fn abort_leaves_line_low() {
        let mut psnee = Psnee::new();
        let mut line = RecordingLine::new();

        let mut now = trigger(&mut psnee, &mut line);

        // Get a few bits out
        for _ in 0..(GAP_US + 10 * BIT_US) / 500 {
            now += 500;
            assert_eq!(psnee.tick(now, 100, true, false, false, &mut line), SeqStatus::Continue);
        }

        // Seek out of the window mid-repetition
        now += 500;
        assert_eq!(psnee.tick(now, 6000, true, false, false, &mut line), SeqStatus::Aborted);
        assert!(!line.level);

        // Back to idle, ready to retrigger from scratch
        now += 500;
        assert_eq!(psnee.tick(now, 100, true, false, false, &mut line), SeqStatus::Idle);
    }

    #[test]
    fn retrigger_after_abort_needs_full_debounce() {
        let mut psnee = Psnee::new();
        let mut line = RecordingLine::new();

        let mut now = trigger(&mut psnee, &mut line);

        now += 500;
        assert_eq!(psnee.tick(now, 6000, true, false, false, &mut line), SeqStatus::Aborted);

        // The abort restarts the debounce clock: a qualifying check
        // right after it must not count as a hit
        assert_eq!(psnee.tick(now + 1, 100, true, false, false, &mut line), SeqStatus::Idle);

        // 100 properly spaced hits are one short of a sequence
        for _ in 0..100 {
            now += DEBOUNCE_US + 1;
            assert_eq!(psnee.tick(now, 100, true, false, false, &mut line), SeqStatus::Idle);
        }

        // The 101st fires
        now += DEBOUNCE_US + 1;
        assert_eq!(psnee.tick(now, 100, true, false, false, &mut line), SeqStatus::Continue);
    }

    #[test]
    fn soct_aborts_too() {
        let mut psnee = Psnee::new();
        let mut line = RecordingLine::new();

        let mut now = trigger(&mut psnee, &mut line);

        now += 500;
        assert_eq!(psnee.tick(now, 100, true, true, false, &mut line), SeqStatus::Aborted);
        assert!(!line.level);
    }
}
