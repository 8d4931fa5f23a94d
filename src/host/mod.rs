//! PC pose-programming link.

pub mod handler;
pub mod parser;

pub use handler::PoseProgrammer;
pub use parser::{Packet, PacketParser, Parsed};

use crate::drivers::servo::TxRxError;

/// Digital/analog header pins the self test toggles.
pub trait SelfTestIo {
    fn set_pin(&mut self, pin: u8, high: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostError {
    /// Writing to the host failed.
    Link,
    Bus(TxRxError),
}

impl From<TxRxError> for HostError {
    fn from(e: TxRxError) -> Self {
        Self::Bus(e)
    }
}
