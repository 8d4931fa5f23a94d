//! RAM staging area the host fills before playing or saving a sequence.

use super::format::Transition;
use crate::config::{POSE_END, STAGED_POSE_WORDS, STAGED_TRANSITIONS_MAX};
use heapless::Vec;

pub struct StagedSequence {
    pose_size: u8,
    poses: [u16; STAGED_POSE_WORDS],
    transitions: Vec<Transition, STAGED_TRANSITIONS_MAX>,
}

impl StagedSequence {
    pub fn new(pose_size: u8) -> Self {
        Self {
            pose_size,
            poses: [0; STAGED_POSE_WORDS],
            transitions: Vec::new(),
        }
    }

    pub fn pose_size(&self) -> u8 {
        self.pose_size
    }

    pub fn set_pose_size(&mut self, size: u8) {
        self.pose_size = size;
    }

    /// Store pose `index`; `false` when it would not fit the buffer.
    pub fn load_pose(&mut self, index: u8, positions: &[u16]) -> bool {
        let size = self.pose_size as usize;
        let start = index as usize * size;
        let Some(slot) = self.poses.get_mut(start..start + size) else {
            return false;
        };
        for (dst, &src) in slot.iter_mut().zip(positions) {
            *dst = src;
        }
        true
    }

    pub fn pose(&self, index: u8) -> Option<&[u16]> {
        let size = self.pose_size as usize;
        let start = index as usize * size;
        self.poses.get(start..start + size)
    }

    /// Replace the transition list. Extra entries past the buffer are dropped.
    pub fn load_transitions(&mut self, list: impl IntoIterator<Item = Transition>) {
        self.transitions.clear();
        for t in list {
            if self.transitions.push(t).is_err() {
                warn!("staged sequence truncated at {} steps", STAGED_TRANSITIONS_MAX);
                break;
            }
        }
    }

    /// Transitions up to (not including) the end marker.
    pub fn transitions(&self) -> &[Transition] {
        let end = self
            .transitions
            .iter()
            .position(|t| t.pose == POSE_END)
            .unwrap_or(self.transitions.len());
        &self.transitions[..end]
    }

    /// One more than the highest pose the transitions reference.
    pub fn pose_count(&self) -> u8 {
        self.transitions()
            .iter()
            .map(|t| t.pose)
            .max()
            .map_or(0, |m| m + 1)
    }
}
