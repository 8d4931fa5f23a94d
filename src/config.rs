// Centralize all configuration constants
use heapless::Vec;

pub const UART_BAUDRATE: u32 = 1_000_000;
pub const HOST_BAUDRATE: u32 = 38_400;

// Control loop
pub const BACKGROUND_TICK_MS: u64 = 5;
pub const DEFAULT_FRAME_LENGTH_MS: u8 = 33;

// Channel sizes
pub const COMMAND_CHANNEL_SIZE: usize = 4;

// Topology limits
pub const MAX_CHANNELS: usize = 32;
pub const MAX_LEGS: usize = 8;
pub const MAX_JOINTS_PER_LEG: usize = 4;

// Battery voltage sampling
pub const VOLTAGE_READ_ATTEMPTS: u8 = 3;
pub const VOLTAGE_CACHE_MS: u64 = 500;

// Present-position reads when re-torquing under speed control
pub const POSITION_READ_SETTLE_MS: u32 = 25;

// Joint angle (0.1 degree, centered at 0) to bus position units
pub const ANGLE_MULT: i32 = 128;
pub const ANGLE_DIV: i32 = 375;
pub const POSITION_CENTER: i32 = 512;
pub const POSITION_MAX: u16 = 1023;

// Non-volatile sequence store: index table of u16 offsets, then the data region
pub const SEQ_INDEX_TABLE: u32 = 0x40;
pub const SEQ_DATA_START: u32 = 0x50;
pub const SEQ_STORE_SIZE: u32 = 0x800;
pub const SEQ_MAX_STORED: u8 = 5;
// Flash page holding the store on the STM32G071RB (last 2 KiB of 128 KiB)
pub const SEQ_FLASH_OFFSET: u32 = 0x1_F800;
pub const SEQ_FLASH_PAGE: usize = 2048;
/// Pose index that terminates a staged transition list.
pub const POSE_END: u8 = 0xFF;

// Host programming staging buffers
pub const STAGED_TRANSITIONS_MAX: usize = 30;
pub const STAGED_POSE_WORDS: usize = 540;
pub const HOST_PARAMS_MAX: usize = 90;

/// Where a channel's value lands when the body is upside down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MirrorEntry {
    pub target: u8,
    pub reflect: bool,
}

impl MirrorEntry {
    /// Decode the packed table form: low 7 bits target, bit 7 set means reflect.
    pub const fn from_packed(b: u8) -> Self {
        Self {
            target: b & 0x7F,
            reflect: b & 0x80 != 0,
        }
    }
}

/// Channel indices driving one leg. `tars` is `None` on 3-DOF legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LegChannels {
    pub coxa: u8,
    pub femur: u8,
    pub tibia: u8,
    pub tars: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    TooManyChannels,
    TooManyLegs,
    ChannelOutOfRange,
    MirrorSizeMismatch,
}

/// Servo topology, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RobotConfig {
    /// Bus id of each channel, indexed by channel.
    pub ids: Vec<u8, MAX_CHANNELS>,
    pub legs: Vec<LegChannels, MAX_LEGS>,
    pub mirror: Vec<MirrorEntry, MAX_CHANNELS>,
}

const PHOENIX_UPSIDE_DOWN: [u8; 18] = [
    0x80 + 1,
    0x80,
    3,
    2,
    5,
    4,
    0x80 + 7,
    0x80 + 6,
    9,
    8,
    11,
    10,
    0x80 + 13,
    0x80 + 12,
    15,
    14,
    17,
    16,
];

// (coxa, femur, tibia) bus ids, legs ordered RR, RM, RF, LR, LM, LF
const PHOENIX_LEG_IDS: [(u8, u8, u8); 6] = [
    (8, 10, 12),
    (14, 16, 18),
    (2, 4, 6),
    (7, 9, 11),
    (13, 15, 17),
    (1, 3, 5),
];

impl RobotConfig {
    pub fn new(
        ids: &[u8],
        legs: &[LegChannels],
        mirror: &[MirrorEntry],
    ) -> Result<Self, ConfigError> {
        let ids = Vec::from_slice(ids).map_err(|_| ConfigError::TooManyChannels)?;
        let legs: Vec<LegChannels, MAX_LEGS> =
            Vec::from_slice(legs).map_err(|_| ConfigError::TooManyLegs)?;
        if mirror.len() != ids.len() {
            return Err(ConfigError::MirrorSizeMismatch);
        }
        let mirror = Vec::from_slice(mirror).map_err(|_| ConfigError::TooManyChannels)?;

        let n = ids.len() as u8;
        let in_range = |c: u8| c < n;
        for leg in legs.iter() {
            if !(in_range(leg.coxa) && in_range(leg.femur) && in_range(leg.tibia))
                || leg.tars.is_some_and(|t| !in_range(t))
            {
                return Err(ConfigError::ChannelOutOfRange);
            }
        }
        if mirror.iter().any(|m: &MirrorEntry| !in_range(m.target)) {
            return Err(ConfigError::ChannelOutOfRange);
        }
        Ok(Self { ids, legs, mirror })
    }

    /// Six 3-DOF legs on AX-12 ids 1..=18, channel `i` is id `i + 1`.
    pub fn phoenix_hexapod() -> Self {
        let mut ids = Vec::new();
        for id in 1..=18u8 {
            let _ = ids.push(id);
        }
        let mut legs = Vec::new();
        for &(c, f, t) in PHOENIX_LEG_IDS.iter() {
            let _ = legs.push(LegChannels {
                coxa: c - 1,
                femur: f - 1,
                tibia: t - 1,
                tars: None,
            });
        }
        let mut mirror = Vec::new();
        for &b in PHOENIX_UPSIDE_DOWN.iter() {
            let _ = mirror.push(MirrorEntry::from_packed(b));
        }
        Self { ids, legs, mirror }
    }

    pub fn channel_count(&self) -> usize {
        self.ids.len()
    }

    pub fn leg(&self, leg: usize) -> Option<&LegChannels> {
        self.legs.get(leg)
    }

    pub fn channel_of_id(&self, id: u8) -> Option<usize> {
        self.ids.iter().position(|&i| i == id)
    }
}
