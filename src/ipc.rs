use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex as RawMutex, channel::Channel};
use portable_atomic::AtomicBool;

use crate::config::COMMAND_CHANNEL_SIZE;

/// Operator requests for the motion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    SetMotors(bool),
    ToggleMotors,
    ToggleSpeedControl,
    /// Interpolation frame length in ms; 0 is ignored.
    SetFrameLength(u8),
    FreeServos,
    StartSequence { index: u8, looping: bool },
    StopSequence,
    /// Playback speed in percent, negative for reverse.
    SetSpeed(i16),
    /// Log every servo's present position.
    ReportPositions,
    ReportBattery,
}

/* Operator command channel */
pub static COMMAND_CH: Channel<RawMutex, Command, COMMAND_CHANNEL_SIZE> = Channel::new();

/// Set by the body-orientation sensor; sampled when a sequence starts.
pub static BODY_INVERTED: AtomicBool = AtomicBool::new(false);
