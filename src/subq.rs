//! Subchannel Q encoder. During the lead-in the Q channel repeats the
//! table of contents; in the program area it carries track-relative and
//! absolute timing. Either way the result is a 12-byte frame protected
//! by a CRC-16 over its first ten bytes.

use disc::msf::{to_bcd, Msf};
use disc::{DiscLayout, LEAD_IN, PRE_GAP};

/// CRC-16 lookup table, polynomial 0x1021 MSB-first. The host checks
/// every frame against this exact sequence so the table is part of the
/// wire format.
static CRC16_TABLE: [u16; 256] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7, 0x8108, 0x9129, 0xa14a, 0xb16b, 0xc18c, 0xd1ad,
    0xe1ce, 0xf1ef, 0x1231, 0x0210, 0x3273, 0x2252, 0x52b5, 0x4294, 0x72f7, 0x62d6, 0x9339, 0x8318, 0xb37b, 0xa35a,
    0xd3bd, 0xc39c, 0xf3ff, 0xe3de, 0x2462, 0x3443, 0x0420, 0x1401, 0x64e6, 0x74c7, 0x44a4, 0x5485, 0xa56a, 0xb54b,
    0x8528, 0x9509, 0xe5ee, 0xf5cf, 0xc5ac, 0xd58d, 0x3653, 0x2672, 0x1611, 0x0630, 0x76d7, 0x66f6, 0x5695, 0x46b4,
    0xb75b, 0xa77a, 0x9719, 0x8738, 0xf7df, 0xe7fe, 0xd79d, 0xc7bc, 0x48c4, 0x58e5, 0x6886, 0x78a7, 0x0840, 0x1861,
    0x2802, 0x3823, 0xc9cc, 0xd9ed, 0xe98e, 0xf9af, 0x8948, 0x9969, 0xa90a, 0xb92b, 0x5af5, 0x4ad4, 0x7ab7, 0x6a96,
    0x1a71, 0x0a50, 0x3a33, 0x2a12, 0xdbfd, 0xcbdc, 0xfbbf, 0xeb9e, 0x9b79, 0x8b58, 0xbb3b, 0xab1a, 0x6ca6, 0x7c87,
    0x4ce4, 0x5cc5, 0x2c22, 0x3c03, 0x0c60, 0x1c41, 0xedae, 0xfd8f, 0xcdec, 0xddcd, 0xad2a, 0xbd0b, 0x8d68, 0x9d49,
    0x7e97, 0x6eb6, 0x5ed5, 0x4ef4, 0x3e13, 0x2e32, 0x1e51, 0x0e70, 0xff9f, 0xefbe, 0xdfdd, 0xcffc, 0xbf1b, 0xaf3a,
    0x9f59, 0x8f78, 0x9188, 0x81a9, 0xb1ca, 0xa1eb, 0xd10c, 0xc12d, 0xf14e, 0xe16f, 0x1080, 0x00a1, 0x30c2, 0x20e3,
    0x5004, 0x4025, 0x7046, 0x6067, 0x83b9, 0x9398, 0xa3fb, 0xb3da, 0xc33d, 0xd31c, 0xe37f, 0xf35e, 0x02b1, 0x1290,
    0x22f3, 0x32d2, 0x4235, 0x5214, 0x6277, 0x7256, 0xb5ea, 0xa5cb, 0x95a8, 0x8589, 0xf56e, 0xe54f, 0xd52c, 0xc50d,
    0x34e2, 0x24c3, 0x14a0, 0x0481, 0x7466, 0x6447, 0x5424, 0x4405, 0xa7db, 0xb7fa, 0x8799, 0x97b8, 0xe75f, 0xf77e,
    0xc71d, 0xd73c, 0x26d3, 0x36f2, 0x0691, 0x16b0, 0x6657, 0x7676, 0x4615, 0x5634, 0xd94c, 0xc96d, 0xf90e, 0xe92f,
    0x99c8, 0x89e9, 0xb98a, 0xa9ab, 0x5844, 0x4865, 0x7806, 0x6827, 0x18c0, 0x08e1, 0x3882, 0x28a3, 0xcb7d, 0xdb5c,
    0xeb3f, 0xfb1e, 0x8bf9, 0x9bd8, 0xabbb, 0xbb9a, 0x4a75, 0x5a54, 0x6a37, 0x7a16, 0x0af1, 0x1ad0, 0x2ab3, 0x3a92,
    0xfd2e, 0xed0f, 0xdd6c, 0xcd4d, 0xbdaa, 0xad8b, 0x9de8, 0x8dc9, 0x7c26, 0x6c07, 0x5c64, 0x4c45, 0x3ca2, 0x2c83,
    0x1ce0, 0x0cc1, 0xef1f, 0xff3e, 0xcf5d, 0xdf7c, 0xaf9b, 0xbfba, 0x8fd9, 0x9ff8, 0x6e17, 0x7e36, 0x4e55, 0x5e74,
    0x2e93, 0x3eb2, 0x0ed1, 0x1ef0,
];

/// CRC-16 over `data`, MSB-first with the table above
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, &b| {
        (crc << 8) ^ CRC16_TABLE[((crc >> 8) as u8 ^ b) as usize]
    })
}

/// What goes into the checksum field: the regular CRC, or one of the
/// host's audio metering modes. This is an external configuration
/// input, the encoder never picks a mode on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMode {
    Normal,
    AltNormal,
    /// Byte 11 carries a sector-parity flag instead of a CRC
    LevelMeter,
    /// Checksum field holds a fixed sentinel
    PeakMeter,
}

/// One 12-byte subchannel Q frame. This is the wire format the host
/// expects, byte for byte; the accessors only name the offsets.
#[derive(Clone, Copy)]
pub struct SubQ {
    raw: [u8; 12],
}

impl SubQ {
    fn new() -> SubQ {
        SubQ { raw: [0; 12] }
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.raw
    }

    /// Control/ADR nibbles
    pub fn ctrladdr(&self) -> u8 {
        self.raw[0]
    }

    /// Track number, 0 in the lead-in, 0xAA in the lead-out
    pub fn tno(&self) -> u8 {
        self.raw[1]
    }

    /// TOC "point" in the lead-in, index marker ("x") in the program
    /// area
    pub fn point(&self) -> u8 {
        self.raw[2]
    }

    /// MIN/SEC/FRAME bytes: running lead-in time or track-relative time
    pub fn time(&self) -> (u8, u8, u8) {
        (self.raw[3], self.raw[4], self.raw[5])
    }

    /// PMIN/PSEC/PFRAME bytes: the point's position in the lead-in,
    /// absolute time in the program area
    pub fn ptime(&self) -> (u8, u8, u8) {
        (self.raw[7], self.raw[8], self.raw[9])
    }

    pub fn crc(&self) -> u16 {
        ((self.raw[10] as u16) << 8) | self.raw[11] as u16
    }

    /// Pack the frame LSB-first into the three 32-bit transport words
    pub fn wire_words(&self) -> [u32; 3] {
        let mut words = [0u32; 3];

        for (i, &b) in self.raw.iter().enumerate() {
            words[i / 4] |= (b as u32) << ((i % 4) * 8);
        }

        words
    }

    fn set_ctrladdr(&mut self, v: u8) {
        self.raw[0] = v;
    }

    fn set_tno(&mut self, v: u8) {
        self.raw[1] = v;
    }

    fn set_point(&mut self, v: u8) {
        self.raw[2] = v;
    }

    fn set_time(&mut self, m: u8, s: u8, f: u8) {
        self.raw[3] = m;
        self.raw[4] = s;
        self.raw[5] = f;
    }

    fn set_ptime(&mut self, m: u8, s: u8, f: u8) {
        self.raw[7] = m;
        self.raw[8] = s;
        self.raw[9] = f;
    }

    fn set_crc(&mut self, crc: u16) {
        // Big-endian on the wire
        self.raw[10] = (crc >> 8) as u8;
        self.raw[11] = crc as u8;
    }
}

fn ctrladdr(data: bool) -> u8 {
    if data {
        0x41
    } else {
        0x01
    }
}

/// Generate the subchannel Q frame for `sector`. Returns the frame and,
/// in the program area, the logical track it resolved to so the caller
/// can publish it for the streamer.
pub fn generate(sector: i32, layout: &DiscLayout, mode: ControlMode) -> (SubQ, Option<usize>) {
    let mut q = SubQ::new();
    let mut logical = None;

    if sector < LEAD_IN {
        // Lead-in: the TOC is transmitted as a repeating sequence of
        // points, each repeated 3 times
        let track_count = layout.track_count() as i32;
        let point = ((sector - 1) / 3) % (3 + track_count) + 1;

        if point <= track_count {
            // Per-track entry
            let track = point as usize;

            let sector_track = if track == 1 {
                // Track 1 has a hardcoded 2 second pre-gap
                PRE_GAP
            } else {
                // Offset each track by track 1's pre-gap
                layout.track(track).index1 + PRE_GAP
            };

            let (m, s, f) = Msf::from_sector(sector_track).into_bcd();

            q.set_ctrladdr(ctrladdr(layout.is_data_track(track)));
            q.set_tno(0x00);
            q.set_point(to_bcd(point));
            q.set_ptime(m, s, f);
        } else if point == track_count + 1 {
            // A0: first track number, plus the disc type flag
            q.set_ctrladdr(ctrladdr(layout.is_data_track(1)));
            q.set_tno(0x00);
            q.set_point(0xa0);
            // 0x00 = audio, 0x20 = CDROM-XA
            q.set_ptime(0x01, if layout.has_data() { 0x20 } else { 0x00 }, 0x00);
        } else if point == track_count + 2 {
            // A1: last track number
            q.set_ctrladdr(ctrladdr(layout.is_data_track(layout.track_count())));
            q.set_tno(0x00);
            q.set_point(0xa1);
            q.set_ptime(to_bcd(track_count), 0x00, 0x00);
        } else {
            // A2: lead-out position
            let lead_out = layout.track(layout.track_count() + 1).index1 + PRE_GAP;
            let (m, s, f) = Msf::from_sector(lead_out).into_bcd();

            q.set_ctrladdr(ctrladdr(layout.is_data_track(layout.track_count())));
            q.set_tno(0x00);
            q.set_point(0xa2);
            q.set_ptime(m, s, f);
        }

        // Running lead-in time
        let (m, s, f) = Msf::from_sector(sector).into_bcd();
        q.set_time(m, s, f);
    } else {
        // Program area and lead-out
        let track = if sector - LEAD_IN < PRE_GAP {
            1
        } else {
            layout.track_containing(sector - LEAD_IN - PRE_GAP)
        };

        logical = Some(track);

        let sector_track = sector - layout.track(track).index1 - LEAD_IN - PRE_GAP;
        let (m, s, f) = Msf::from_sector(sector_track).into_bcd();

        q.set_ctrladdr(ctrladdr(layout.is_data_track(track)));

        if track == layout.track_count() + 1 {
            q.set_tno(0xaa);
        } else {
            q.set_tno(to_bcd(track as i32));
        }

        if sector_track < 0 {
            // Still in the pre-gap: pause encoding, seconds and frames
            // counting down to the track start
            q.set_point(0x00);
            q.set_time(0x00, s, f);
        } else {
            q.set_point(0x01);
            q.set_time(m, s, f);
        }

        let (am, asec, af) = Msf::from_sector(sector - LEAD_IN).into_bcd();
        q.set_ptime(am, asec, af);
    }

    match mode {
        ControlMode::Normal | ControlMode::AltNormal => {
            q.set_crc(crc16(&q.raw[0..10]));
        }
        ControlMode::LevelMeter => {
            q.raw[11] = if sector % 2 == 0 { 0x00 } else { 0x80 };
        }
        ControlMode::PeakMeter => {
            // Sentinel, stored in the register's native byte order
            q.raw[10] = 0xef;
            q.raw[11] = 0xbe;
        }
    }

    (q, logical)
}
