use std::fmt;

/// CD "minute:second:frame" timestamp, given as 3 pairs of *BCD*
/// encoded bytes (4bits per digit). In this context "frame" is
/// synonymous with "sector".
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Msf(u8, u8, u8);

impl Msf {
    /// Create a 00:00:00 MSF timestamp
    pub fn zero() -> Msf {
        Msf(0, 0, 0)
    }

    /// Convert a sector index into an MSF "coordinate". Negative
    /// indices show up during lead-in arithmetic where only the
    /// magnitude of each component is meaningful, hence the absolute
    /// values. Minutes past 99 saturate in the BCD packing.
    pub fn from_sector(sector: i32) -> Msf {
        // 60 seconds in a minute, 75 sectors(frames) in a second
        let m = (sector / 75 / 60).abs();
        let s = ((sector / 75) % 60).abs();
        let f = (sector % 75).abs();

        Msf(to_bcd(m), to_bcd(s), to_bcd(f))
    }

    pub fn into_bcd(self) -> (u8, u8, u8) {
        (self.0, self.1, self.2)
    }

    /// Convert back into a sector index. Inverse of `from_sector` for
    /// every valid non-negative sector on a disc.
    pub fn sector_index(self) -> u32 {
        let from_bcd = |b: u8| -> u32 { ((b >> 4) * 10 + (b & 0xf)) as u32 };

        let Msf(m, s, f) = self;

        (60 * 75 * from_bcd(m)) + (75 * from_bcd(s)) + from_bcd(f)
    }
}

impl fmt::Display for Msf {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let Msf(m, s, f) = *self;

        write!(fmt, "{:02x}:{:02x}:{:02x}", m, s, f)
    }
}

/// Pack a two-digit decimal value as BCD: `(tens << 4) | units`.
/// Values past 99 saturate to 0x99 rather than producing garbage
/// digits.
pub fn to_bcd(v: i32) -> u8 {
    if v > 99 {
        0x99
    } else {
        ((v / 10) << 4 | (v % 10)) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::{to_bcd, Msf};

    #[test]
    fn bcd_packing() {
        assert_eq!(to_bcd(0), 0x00);
        assert_eq!(to_bcd(9), 0x09);
        assert_eq!(to_bcd(10), 0x10);
        assert_eq!(to_bcd(42), 0x42);
        assert_eq!(to_bcd(99), 0x99);
        // Saturation, not a fault
        assert_eq!(to_bcd(100), 0x99);
        assert_eq!(to_bcd(7230), 0x99);
    }

    #[test]
    fn conversions() {
        for &(sector, m, s, f) in &[
            (0, 0x00, 0x00, 0x00),
            (1, 0x00, 0x00, 0x01),
            (74, 0x00, 0x00, 0x74),
            (75, 0x00, 0x01, 0x00),
            (75 * 60, 0x01, 0x00, 0x00),
            (150, 0x00, 0x02, 0x00),
            (333000, 0x74, 0x00, 0x00),
        ] {
            assert_eq!(Msf::from_sector(sector).into_bcd(), (m, s, f));
        }
    }

    #[test]
    fn round_trips() {
        // Sector -> MSF -> sector must agree over the whole addressable
        // range
        for &sector in &[0, 1, 74, 75, 149, 150, 4500, 4650, 333000] {
            let msf = Msf::from_sector(sector);

            assert_eq!(msf.sector_index(), sector as u32);
        }
    }

    #[test]
    fn negative_guard() {
        // Lead-in arithmetic feeds negative sector offsets through the
        // conversion; components come out as magnitudes
        assert_eq!(Msf::from_sector(-1).into_bcd(), (0x00, 0x00, 0x01));
        assert_eq!(Msf::from_sector(-150).into_bcd(), (0x00, 0x02, 0x00));
    }
}
