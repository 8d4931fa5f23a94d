//! Pose sequences: storage formats, the ROM and flash providers, and the player.

pub mod format;
pub mod library;
pub mod mirror;
pub mod player;
pub mod rom;
pub mod staging;
pub mod store;

pub use format::{SequenceHeader, StoreLayout, Transition};
pub use library::SequenceLibrary;
pub use player::SequencePlayer;
pub use rom::{RomSequence, RomSet};
pub use staging::StagedSequence;
pub use store::{SequenceStore, StoreError};

/// A sequence that passed validation, as handed out by a [`SequenceSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequenceInfo {
    pub index: u8,
    pub header: SequenceHeader,
    /// Header offset for stored sequences; unused for ROM ones.
    pub location: u32,
}

impl SequenceInfo {
    pub fn steps(&self) -> u8 {
        self.header.steps
    }
}

/// Read side shared by the ROM tables and the flash store.
pub trait SequenceSource {
    /// `None` for anything that does not validate.
    fn lookup(&mut self, index: u8) -> Option<SequenceInfo>;

    /// Fill `pose` with the target of `step` and return the step's duration.
    fn load_step(&mut self, info: &SequenceInfo, step: u8, pose: &mut [u16]) -> Option<u16>;
}
