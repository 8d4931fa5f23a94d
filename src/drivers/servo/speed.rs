//! Speed-controlled output: every channel gets its own moving speed so the
//! whole body arrives at the new goals together.

use super::protocol::{FrameError, SyncWrite};
use crate::config::MAX_CHANNELS;
use heapless::Vec;

// AX-12 no-load speed is 59 rpm at 12 V (0.170 s / 60 deg); the moving speed
// register reads 0x3FF as 114 rpm, so 59 rpm is 0x212 and 1 unit/ms of travel
// needs 847.46, rounded up.
pub const SPEED_FACTOR: u32 = 848;
// 5% of the 59 rpm value, so tiny moves never stall.
pub const MIN_SPEED: u16 = 26;
pub const MAX_SPEED: u16 = 1023;

/// Moving speed for `travel` position units covered in `time_ms`.
///
/// `time_ms` must be at least 1; the commit path guarantees it.
pub fn calculate_speed(travel: u16, time_ms: u16) -> u16 {
    let time = time_ms as u32;
    let speed = (SPEED_FACTOR * travel as u32 + time / 2) / time;
    speed.clamp(MIN_SPEED as u32, MAX_SPEED as u32) as u16
}

pub fn move_speed(current: u16, goal: u16, time_ms: u16) -> u16 {
    calculate_speed(current.abs_diff(goal), time_ms)
}

pub struct SpeedEngine {
    current: Vec<u16, MAX_CHANNELS>,
    goal: Vec<u16, MAX_CHANNELS>,
}

impl SpeedEngine {
    pub fn new(channels: usize) -> Self {
        let mut current = Vec::new();
        let mut goal = Vec::new();
        for _ in 0..channels.min(MAX_CHANNELS) {
            let _ = current.push(0);
            let _ = goal.push(0);
        }
        Self { current, goal }
    }

    pub fn channels(&self) -> usize {
        self.current.len()
    }

    /// Take live positions as both the current and the goal state.
    pub fn load_positions(&mut self, positions: &[u16]) {
        for (i, &pos) in positions.iter().enumerate().take(self.current.len()) {
            self.current[i] = pos;
            self.goal[i] = pos;
        }
    }

    pub fn set_goal(&mut self, channel: usize, pos: u16) {
        if let Some(g) = self.goal.get_mut(channel) {
            *g = pos;
        }
    }

    pub fn goal(&self, channel: usize) -> Option<u16> {
        self.goal.get(channel).copied()
    }

    pub fn current(&self, channel: usize) -> Option<u16> {
        self.current.get(channel).copied()
    }

    /// Start of a new cycle: the goals issued last cycle are where we are now.
    pub fn roll_forward(&mut self) {
        self.current.clone_from(&self.goal);
    }

    /// Build the single synchronized write for this cycle.
    pub fn build_frame(&self, ids: &[u8], time_ms: u16) -> Result<SyncWrite, FrameError> {
        let mut frame = SyncWrite::positions_and_speeds();
        for (i, &id) in ids.iter().enumerate().take(self.goal.len()) {
            let speed = move_speed(self.current[i], self.goal[i], time_ms);
            frame.push_position_speed(id, self.goal[i], speed)?;
        }
        Ok(frame)
    }
}
