//! Time-interpolated output.
//!
//! The [`Interpolator`] trait is the contract the rest of the firmware relies
//! on; [`LinearInterpolator`] is the stock engine that walks every channel from
//! its present pose to the next one in equal steps, one bus frame per
//! `frame_length` milliseconds.

use crate::config::{DEFAULT_FRAME_LENGTH_MS, MAX_CHANNELS};
use heapless::Vec;

pub trait Interpolator {
    fn channels(&self) -> usize;

    /// Target for the next armed cycle, by channel index.
    fn set_next(&mut self, channel: usize, pos: u16);

    /// Where the engine last put `channel`.
    fn position(&self, channel: usize) -> Option<u16>;

    /// Replace the present state with positions read back from the servos.
    fn load_positions(&mut self, positions: &[u16]);

    /// Start moving towards the next pose over `duration_ms`.
    fn arm(&mut self, duration_ms: u32, now_ms: u64);

    fn is_interpolating(&self) -> bool;

    /// Earliest time the next frame may be produced.
    fn frame_due_at(&self) -> u64;

    /// Advance one frame if it is due. Returns the positions to put on the bus.
    fn step(&mut self, now_ms: u64) -> Option<&[u16]>;

    fn set_frame_length(&mut self, ms: u8);

    fn frame_length(&self) -> u8;
}

// positions are kept in 1/8 units so slow moves still make progress
const SHIFT: u32 = 3;

pub struct LinearInterpolator {
    pose: Vec<i32, MAX_CHANNELS>,
    next: Vec<i32, MAX_CHANNELS>,
    speed: Vec<i32, MAX_CHANNELS>,
    out: Vec<u16, MAX_CHANNELS>,
    frame_length: u8,
    last_frame: u64,
    interpolating: bool,
}

impl LinearInterpolator {
    pub fn new(channels: usize) -> Self {
        let n = channels.min(MAX_CHANNELS);
        let mut s = Self {
            pose: Vec::new(),
            next: Vec::new(),
            speed: Vec::new(),
            out: Vec::new(),
            frame_length: DEFAULT_FRAME_LENGTH_MS,
            last_frame: 0,
            interpolating: false,
        };
        for _ in 0..n {
            let _ = s.pose.push(512 << SHIFT);
            let _ = s.next.push(512 << SHIFT);
            let _ = s.speed.push(0);
            let _ = s.out.push(512);
        }
        s
    }
}

impl Interpolator for LinearInterpolator {
    fn channels(&self) -> usize {
        self.pose.len()
    }

    fn set_next(&mut self, channel: usize, pos: u16) {
        if let Some(n) = self.next.get_mut(channel) {
            *n = (pos as i32) << SHIFT;
        }
    }

    fn position(&self, channel: usize) -> Option<u16> {
        self.pose.get(channel).map(|&p| (p >> SHIFT) as u16)
    }

    fn load_positions(&mut self, positions: &[u16]) {
        for (i, &pos) in positions.iter().enumerate().take(self.pose.len()) {
            self.pose[i] = (pos as i32) << SHIFT;
            self.out[i] = pos;
        }
    }

    fn arm(&mut self, duration_ms: u32, now_ms: u64) {
        let frames = (duration_ms / self.frame_length.max(1) as u32 + 1) as i32;
        for i in 0..self.pose.len() {
            self.speed[i] = (self.next[i] - self.pose[i]).abs() / frames + 1;
        }
        self.last_frame = now_ms;
        self.interpolating = true;
    }

    fn is_interpolating(&self) -> bool {
        self.interpolating
    }

    fn frame_due_at(&self) -> u64 {
        self.last_frame + self.frame_length as u64
    }

    fn step(&mut self, now_ms: u64) -> Option<&[u16]> {
        if !self.interpolating || now_ms < self.frame_due_at() {
            return None;
        }
        self.last_frame = now_ms;

        let mut moving = self.pose.len();
        for i in 0..self.pose.len() {
            let diff = self.next[i] - self.pose[i];
            if diff.abs() < self.speed[i] || diff == 0 {
                self.pose[i] = self.next[i];
                moving -= 1;
            } else if diff > 0 {
                self.pose[i] += self.speed[i];
            } else {
                self.pose[i] -= self.speed[i];
            }
            self.out[i] = (self.pose[i] >> SHIFT) as u16;
        }
        if moving == 0 {
            self.interpolating = false;
        }
        Some(self.out.as_slice())
    }

    fn set_frame_length(&mut self, ms: u8) {
        self.frame_length = ms.max(1);
    }

    fn frame_length(&self) -> u8 {
        self.frame_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_target_and_stops() {
        let mut it = LinearInterpolator::new(2);
        it.load_positions(&[100, 900]);
        it.set_next(0, 200);
        it.set_next(1, 800);
        it.arm(330, 0);

        let mut now = 0;
        let mut frames = 0;
        while it.is_interpolating() {
            now = it.frame_due_at();
            assert!(it.step(now).is_some());
            frames += 1;
            assert!(frames < 100);
        }
        // 330 ms at 33 ms per frame is 11 frames
        assert_eq!(frames, 11);
        assert_eq!(it.position(0), Some(200));
        assert_eq!(it.position(1), Some(800));
        assert!(it.step(now + 1000).is_none());
    }

    #[test]
    fn frames_are_not_produced_early() {
        let mut it = LinearInterpolator::new(1);
        it.load_positions(&[0]);
        it.set_next(0, 1000);
        it.arm(1000, 50);
        assert!(it.step(60).is_none());
        let out = it.step(83).unwrap();
        assert!(out[0] > 0 && out[0] < 1000);
    }

    #[test]
    fn zero_duration_finishes_in_one_frame() {
        let mut it = LinearInterpolator::new(1);
        it.load_positions(&[10]);
        it.set_next(0, 1000);
        it.arm(0, 0);
        assert_eq!(it.step(33).map(|o| o[0]), Some(1000));
        assert!(!it.is_interpolating());
    }
}
