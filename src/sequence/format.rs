//! On-store record layout.
//!
//! ```text
//! 0x40  index table   u16 LE offset per slot, 0 = empty
//! 0x50  data          <header><transitions><poses> per sequence, back to back
//!
//! header      seq u8 | servos u8 | steps u8 | poses u8
//! transition  pose u8 | time u16 LE
//! pose        servos x u16 LE
//! ```
//!
//! Records are (de)serialized field by field so the layout never depends on
//! how the compiler lays out a struct.

use crate::config::{SEQ_DATA_START, SEQ_INDEX_TABLE, SEQ_MAX_STORED, SEQ_STORE_SIZE};

pub const HEADER_LEN: u32 = 4;
pub const TRANSITION_LEN: u32 = 3;
pub const POSITION_LEN: u32 = 2;

/// Where the store keeps its index table and data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StoreLayout {
    pub index_table: u32,
    pub data_start: u32,
    pub capacity: u32,
    pub max_sequences: u8,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            index_table: SEQ_INDEX_TABLE,
            data_start: SEQ_DATA_START,
            capacity: SEQ_STORE_SIZE,
            max_sequences: SEQ_MAX_STORED,
        }
    }
}

/// Index slots one table can hold.
pub const MAX_INDEX_SLOTS: usize = 16;

impl StoreLayout {
    /// Default layout over `capacity` bytes; `None` when offsets would not
    /// fit the 16-bit index entries.
    pub fn with_capacity(capacity: u32) -> Option<Self> {
        let layout = Self {
            capacity,
            ..Self::default()
        };
        layout.is_valid().then_some(layout)
    }

    /// Offsets fit a `u16`, the index table ends before the data and holds
    /// at most [`MAX_INDEX_SLOTS`] entries.
    pub fn is_valid(&self) -> bool {
        self.capacity <= u16::MAX as u32 + 1
            && self.max_sequences as usize <= MAX_INDEX_SLOTS
            && self.index_table + self.max_sequences as u32 * 2 <= self.data_start
            && self.data_start < self.capacity
    }

    pub fn index_slot(&self, slot: u8) -> u32 {
        self.index_table + slot as u32 * 2
    }

    /// A record starting at `at` must end strictly below the capacity.
    pub fn fits(&self, at: u32, header: &SequenceHeader) -> bool {
        at + header.span() < self.capacity
    }

    pub fn in_data_region(&self, at: u32) -> bool {
        at >= self.data_start && at < self.capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequenceHeader {
    pub seq: u8,
    pub servos: u8,
    pub steps: u8,
    pub poses: u8,
}

impl SequenceHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN as usize] {
        [self.seq, self.servos, self.steps, self.poses]
    }

    pub fn from_bytes(b: [u8; HEADER_LEN as usize]) -> Self {
        Self {
            seq: b[0],
            servos: b[1],
            steps: b[2],
            poses: b[3],
        }
    }

    /// Bytes taken by the whole record, header included.
    pub fn span(&self) -> u32 {
        HEADER_LEN
            + self.steps as u32 * TRANSITION_LEN
            + self.poses as u32 * self.servos as u32 * POSITION_LEN
    }

    pub fn transition_at(&self, at: u32, step: u8) -> u32 {
        at + HEADER_LEN + step as u32 * TRANSITION_LEN
    }

    pub fn pose_at(&self, at: u32, pose: u8) -> u32 {
        at + HEADER_LEN
            + self.steps as u32 * TRANSITION_LEN
            + pose as u32 * self.servos as u32 * POSITION_LEN
    }
}

/// Move to `pose` over `time` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    pub pose: u8,
    pub time: u16,
}

impl Transition {
    pub const fn new(pose: u8, time: u16) -> Self {
        Self { pose, time }
    }

    pub fn to_bytes(&self) -> [u8; TRANSITION_LEN as usize] {
        let t = self.time.to_le_bytes();
        [self.pose, t[0], t[1]]
    }

    pub fn from_bytes(b: [u8; TRANSITION_LEN as usize]) -> Self {
        Self {
            pose: b[0],
            time: u16::from_le_bytes([b[1], b[2]]),
        }
    }
}
