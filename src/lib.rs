#![cfg_attr(not(test), no_std)]

// This must go first so the logging macros are visible to every module below.
mod fmt;

pub mod config;
pub mod control;
pub mod drivers;
pub mod host;
pub mod ipc;
pub mod sequence;

#[cfg(feature = "firmware")]
pub mod board;
#[cfg(feature = "firmware")]
pub mod tasks;

#[cfg(test)]
pub(crate) mod sim;

#[cfg(feature = "firmware")]
pub use board::Board;
pub use config::RobotConfig;
pub use control::MotionController;
pub use drivers::servo::{ServoBus, ServoDriver, TxRxError};
