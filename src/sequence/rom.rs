//! Sequences compiled into the firmware image.

use super::format::{SequenceHeader, Transition};
use super::{SequenceInfo, SequenceSource};

pub struct RomSequence {
    pub transitions: &'static [Transition],
    /// One slice per pose, one position per channel.
    pub poses: &'static [&'static [u16]],
}

/// The compiled-in set, indexed from 0. A sequence only validates when each
/// of its poses has one position per live channel.
#[derive(Clone, Copy)]
pub struct RomSet {
    seqs: &'static [RomSequence],
    channels: u8,
}

impl RomSet {
    pub const EMPTY: Self = Self::new(&[], 0);

    pub const fn new(seqs: &'static [RomSequence], channels: u8) -> Self {
        Self { seqs, channels }
    }

    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }
}

impl SequenceSource for RomSet {
    fn lookup(&mut self, index: u8) -> Option<SequenceInfo> {
        let seq = self.seqs.get(index as usize)?;
        if seq.poses.iter().any(|p| p.len() != self.channels as usize) {
            return None;
        }
        Some(SequenceInfo {
            index,
            header: SequenceHeader {
                seq: index,
                servos: self.channels,
                steps: seq.transitions.len() as u8,
                poses: seq.poses.len() as u8,
            },
            location: 0,
        })
    }

    fn load_step(&mut self, info: &SequenceInfo, step: u8, pose: &mut [u16]) -> Option<u16> {
        let seq = self.seqs.get(info.index as usize)?;
        let t = seq.transitions.get(step as usize)?;
        let src = seq.poses.get(t.pose as usize)?;
        for (dst, &v) in pose.iter_mut().zip(src.iter()) {
            *dst = v;
        }
        Some(t.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static STAND: [u16; 3] = [512, 300, 700];
    static ROM: [RomSequence; 1] = [RomSequence {
        transitions: &[Transition::new(0, 250)],
        poses: &[&STAND],
    }];

    #[test]
    fn servo_count_must_match_the_robot() {
        let info = RomSet::new(&ROM, 3).lookup(0).unwrap();
        assert_eq!((info.header.servos, info.header.steps, info.header.poses), (3, 1, 1));
        assert!(RomSet::new(&ROM, 18).lookup(0).is_none());
        assert!(RomSet::new(&ROM, 3).lookup(1).is_none());
    }
}
