//! Append-only sequence chain in non-volatile storage.
//!
//! Slot `k` is only reachable when every slot before it validates, and saving
//! slot `k` truncates the chain after it.

use embedded_storage::Storage;

use heapless::Vec;

use super::format::{
    SequenceHeader, StoreLayout, Transition, HEADER_LEN, MAX_INDEX_SLOTS, POSITION_LEN, TRANSITION_LEN,
};
use super::staging::StagedSequence;
use super::{SequenceInfo, SequenceSource};
use crate::config::{MAX_CHANNELS, STAGED_POSE_WORDS, STAGED_TRANSITIONS_MAX};

// largest record the staging area can produce
const RECORD_MAX: usize =
    HEADER_LEN as usize + STAGED_TRANSITIONS_MAX * TRANSITION_LEN as usize + STAGED_POSE_WORDS * POSITION_LEN as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    SlotOutOfRange,
    EmptySequence,
    /// Staged poses were defined for a different servo count.
    PoseSizeMismatch,
    /// A transition points past the staged pose buffer.
    PoseOutOfRange,
    TooLarge,
    /// The layout cannot be addressed by 16-bit index entries.
    BadLayout,
    Storage,
}

pub struct SequenceStore<S> {
    storage: S,
    layout: StoreLayout,
    channels: u8,
}

impl<S: Storage> SequenceStore<S> {
    pub fn new(storage: S, layout: StoreLayout, channels: u8) -> Self {
        Self {
            storage,
            layout,
            channels,
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    fn read_u16(&mut self, at: u32) -> Result<u16, StoreError> {
        let mut b = [0u8; 2];
        self.storage.read(at, &mut b).map_err(|_| StoreError::Storage)?;
        Ok(u16::from_le_bytes(b))
    }

    fn write(&mut self, at: u32, bytes: &[u8]) -> Result<(), StoreError> {
        self.storage.write(at, bytes).map_err(|_| StoreError::Storage)
    }

    fn read_header(&mut self, at: u32) -> Result<SequenceHeader, StoreError> {
        let mut b = [0u8; HEADER_LEN as usize];
        self.storage.read(at, &mut b).map_err(|_| StoreError::Storage)?;
        Ok(SequenceHeader::from_bytes(b))
    }

    /// Validate `slot`; `None` covers every way it can be unusable.
    pub fn is_defined(&mut self, slot: u8) -> Option<SequenceInfo> {
        if slot >= self.layout.max_sequences || !self.layout.is_valid() {
            return None;
        }
        let at = self.read_u16(self.layout.index_slot(slot)).ok()? as u32;
        if !self.layout.in_data_region(at) {
            return None;
        }
        let header = self.read_header(at).ok()?;
        if header.seq != slot || header.servos != self.channels || !self.layout.fits(at, &header) {
            return None;
        }
        Some(SequenceInfo {
            index: slot,
            header,
            location: at,
        })
    }

    /// Offset right after the last valid sequence before `slot`, and the slot
    /// the walk stopped at.
    fn chain_end(&mut self, slot: u8) -> Result<(u8, u32), StoreError> {
        let mut at = self.layout.data_start;
        for k in 0..slot {
            if self.read_u16(self.layout.index_slot(k))? as u32 != at {
                return Ok((k, at));
            }
            let h = self.read_header(at)?;
            if h.seq != k || h.servos != self.channels || !self.layout.fits(at, &h) {
                return Ok((k, at));
            }
            at += h.span();
        }
        Ok((slot, at))
    }

    /// Persist the staged sequence at `slot`, or at the first broken link of
    /// the chain before it. Returns the slot actually written. Nothing is
    /// written unless the whole record fits; the record goes out in one write,
    /// then the index table in another.
    pub fn save(&mut self, slot: u8, staged: &StagedSequence) -> Result<u8, StoreError> {
        if !self.layout.is_valid() {
            return Err(StoreError::BadLayout);
        }
        if slot >= self.layout.max_sequences {
            return Err(StoreError::SlotOutOfRange);
        }
        let transitions = staged.transitions();
        if transitions.is_empty() {
            return Err(StoreError::EmptySequence);
        }
        if staged.pose_size() != self.channels {
            return Err(StoreError::PoseSizeMismatch);
        }
        let poses = staged.pose_count();
        if staged.pose(poses - 1).is_none() {
            return Err(StoreError::PoseOutOfRange);
        }

        let (k, at) = self.chain_end(slot)?;
        let header = SequenceHeader {
            seq: k,
            servos: self.channels,
            steps: transitions.len() as u8,
            poses,
        };
        if !self.layout.fits(at, &header) {
            return Err(StoreError::TooLarge);
        }
        let offset = u16::try_from(at).map_err(|_| StoreError::BadLayout)?;

        let mut record: Vec<u8, RECORD_MAX> = Vec::new();
        record
            .extend_from_slice(&header.to_bytes())
            .map_err(|_| StoreError::TooLarge)?;
        for t in transitions {
            record.extend_from_slice(&t.to_bytes()).map_err(|_| StoreError::TooLarge)?;
        }
        for p in 0..poses {
            // pose_count() was bounds checked above
            let pose = staged.pose(p).ok_or(StoreError::PoseOutOfRange)?;
            for &pos in pose {
                record.extend_from_slice(&pos.to_le_bytes()).map_err(|_| StoreError::TooLarge)?;
            }
        }
        self.write(at, &record)?;

        // this slot's offset, then zeros for every later slot
        let mut index = [0u8; MAX_INDEX_SLOTS * 2];
        index[..2].copy_from_slice(&offset.to_le_bytes());
        let len = (self.layout.max_sequences - k) as usize * 2;
        self.write(self.layout.index_slot(k), &index[..len])?;
        info!("sequence saved in slot {} at {:#x}, {} steps", k, at, header.steps);
        Ok(k)
    }

    pub fn read_transition(&mut self, info: &SequenceInfo, step: u8) -> Option<Transition> {
        if step >= info.header.steps {
            return None;
        }
        let mut b = [0u8; TRANSITION_LEN as usize];
        self.storage
            .read(info.header.transition_at(info.location, step), &mut b)
            .ok()?;
        Some(Transition::from_bytes(b))
    }

    pub fn read_pose(&mut self, info: &SequenceInfo, pose: u8, out: &mut [u16]) -> Option<()> {
        if pose >= info.header.poses {
            return None;
        }
        let n = (info.header.servos as usize).min(MAX_CHANNELS);
        let mut buf = [0u8; MAX_CHANNELS * POSITION_LEN as usize];
        self.storage
            .read(info.header.pose_at(info.location, pose), &mut buf[..n * 2])
            .ok()?;
        for (dst, src) in out.iter_mut().zip(buf[..n * 2].chunks_exact(2)) {
            *dst = u16::from_le_bytes([src[0], src[1]]);
        }
        Some(())
    }
}

impl<S: Storage> SequenceSource for SequenceStore<S> {
    fn lookup(&mut self, index: u8) -> Option<SequenceInfo> {
        self.is_defined(index)
    }

    fn load_step(&mut self, info: &SequenceInfo, step: u8, pose: &mut [u16]) -> Option<u16> {
        let t = self.read_transition(info, step)?;
        self.read_pose(info, t.pose, pose)?;
        Some(t.time)
    }
}
