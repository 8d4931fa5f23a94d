//! Sequence playback state machine.
//!
//! `Idle -> Running(step, speed) -> Idle`. Each background tick either lets the
//! armed move finish or advances one step (forward or reverse by the sign of
//! the speed multiplier) and arms the next move with its duration scaled by
//! `100 / |speed|`. Body orientation is sampled once, at start.

use embedded_hal::digital::v2::OutputPin;
use embedded_io_async::Write;
use heapless::Vec;

use super::mirror::mirror_pose;
use super::{SequenceInfo, SequenceSource};
use crate::config::{MirrorEntry, MAX_CHANNELS};
use crate::drivers::clock::Clock;
use crate::drivers::servo::{BusRx, Interpolator, ServoDriver, TxRxError};

pub const NOMINAL_SPEED: i16 = 100;
const NOT_STARTED: u8 = 0xFF;

/// What the player wants done after one advance.
#[derive(Debug, PartialEq, Eq)]
pub enum Advance {
    /// Move to `pose` over `duration_ms`.
    Step {
        pose: Vec<u16, MAX_CHANNELS>,
        duration_ms: u32,
    },
    Finished,
}

pub struct SequencePlayer {
    seq: Option<SequenceInfo>,
    step: u8,
    speed: i16,
    inverted: bool,
    looping: bool,
}

impl Default for SequencePlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SequencePlayer {
    pub const fn new() -> Self {
        Self {
            seq: None,
            step: NOT_STARTED,
            speed: NOMINAL_SPEED,
            inverted: false,
            looping: false,
        }
    }

    /// Start sequence `index` at nominal speed. Stays idle when it does not validate.
    pub fn start<P: SequenceSource>(&mut self, source: &mut P, index: u8, inverted: bool, looping: bool) -> bool {
        let Some(info) = source.lookup(index) else {
            warn!("sequence {} is not defined", index);
            return false;
        };
        self.seq = Some(info);
        self.step = NOT_STARTED;
        self.speed = NOMINAL_SPEED;
        self.inverted = inverted;
        self.looping = looping;
        info!("sequence {} started: {} steps, inverted {}", index, info.steps(), inverted);
        true
    }

    pub fn abort(&mut self) {
        if let Some(info) = self.seq.take() {
            info!("sequence {} aborted", info.index);
        }
    }

    pub fn is_active(&self) -> bool {
        self.seq.is_some()
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn num_steps(&self) -> u8 {
        self.seq.map_or(0, |s| s.steps())
    }

    /// 1-based step being played, `0xFF` when idle.
    pub fn current_step(&self) -> u8 {
        if self.seq.is_some() {
            self.step.wrapping_add(1)
        } else {
            NOT_STARTED
        }
    }

    /// Percent of nominal speed; negative plays backwards. Applies from the next step.
    pub fn set_speed(&mut self, speed: i16) {
        self.speed = speed;
    }

    pub fn speed(&self) -> i16 {
        self.speed
    }

    fn next_index(&self, steps: u8) -> Option<u8> {
        if self.speed >= 0 {
            let next = self.step.wrapping_add(1);
            (next < steps).then_some(next)
        } else if self.step == NOT_STARTED {
            steps.checked_sub(1)
        } else {
            self.step.checked_sub(1)
        }
    }

    /// Move the cursor one step and load what that step asks for.
    pub fn advance<P: SequenceSource>(&mut self, source: &mut P, channels: usize, mirror: &[MirrorEntry]) -> Advance {
        let Some(info) = self.seq else {
            return Advance::Finished;
        };
        let next = match self.next_index(info.steps()) {
            Some(n) => n,
            None if self.looping && info.steps() > 0 => {
                self.step = NOT_STARTED;
                match self.next_index(info.steps()) {
                    Some(n) => n,
                    None => return self.finish(),
                }
            }
            None => return self.finish(),
        };
        self.step = next;

        let mut raw: Vec<u16, MAX_CHANNELS> = Vec::new();
        let _ = raw.resize(channels.min(MAX_CHANNELS), 0);
        let Some(time) = source.load_step(&info, next, &mut raw) else {
            warn!("sequence {} step {} unreadable", info.index, next);
            return self.finish();
        };
        let pose = if self.inverted {
            let mut out = raw.clone();
            mirror_pose(mirror, &raw, &mut out);
            out
        } else {
            raw
        };
        let duration_ms = time as u32 * NOMINAL_SPEED as u32 / self.speed.unsigned_abs().max(1) as u32;
        Advance::Step { pose, duration_ms }
    }

    fn finish(&mut self) -> Advance {
        if let Some(info) = self.seq.take() {
            info!("sequence {} finished", info.index);
        }
        Advance::Finished
    }

    /// One background tick of playback.
    pub async fn tick<P, TX, RX, DIR, CLK, I>(
        &mut self,
        source: &mut P,
        driver: &mut ServoDriver<TX, RX, DIR, CLK, I>,
    ) -> Result<(), TxRxError>
    where
        P: SequenceSource,
        TX: Write,
        RX: BusRx,
        DIR: OutputPin,
        CLK: Clock,
        I: Interpolator,
    {
        if !self.is_active() {
            return Ok(());
        }
        if self.step != NOT_STARTED && driver.is_interpolating() {
            driver.interpolation_step().await?;
            return Ok(());
        }
        let channels = driver.channel_count();
        match self.advance(source, channels, &driver.config().mirror) {
            Advance::Step { pose, duration_ms } => {
                for (ch, &pos) in pose.iter().enumerate() {
                    driver.set_next_pose(ch, pos);
                }
                driver.arm_interpolation(duration_ms);
            }
            Advance::Finished => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::servo::protocol as p;
    use crate::sequence::{RomSequence, RomSet, Transition};
    use crate::sim::{sim_driver, SimBus};
    use embassy_futures::block_on;

    static P0: [u16; 3] = [100, 200, 300];
    static P1: [u16; 3] = [400, 500, 600];
    static P2: [u16; 3] = [700, 800, 900];
    static ROM: [RomSequence; 1] = [RomSequence {
        transitions: &[Transition::new(0, 100), Transition::new(1, 200), Transition::new(2, 300)],
        poses: &[&P0, &P1, &P2],
    }];

    fn identity() -> [MirrorEntry; 3] {
        [0, 1, 2].map(MirrorEntry::from_packed)
    }

    fn run(player: &mut SequencePlayer, rom: &mut RomSet) -> std::vec::Vec<(u16, u32)> {
        let mut seen = std::vec::Vec::new();
        for _ in 0..20 {
            match player.advance(rom, 3, &identity()) {
                Advance::Step { pose, duration_ms } => seen.push((pose[0], duration_ms)),
                Advance::Finished => return seen,
            }
        }
        panic!("player never finished");
    }

    #[test]
    fn forward_plays_every_step_once() {
        let mut rom = RomSet::new(&ROM, 3);
        let mut player = SequencePlayer::new();
        assert!(player.start(&mut rom, 0, false, false));
        assert_eq!(player.num_steps(), 3);
        assert_eq!(player.current_step(), 0);
        assert_eq!(run(&mut player, &mut rom), [(100, 100), (400, 200), (700, 300)]);
        assert!(!player.is_active());
        assert_eq!(player.current_step(), 0xFF);
        assert_eq!(player.num_steps(), 0);
    }

    #[test]
    fn reverse_plays_from_the_last_step_down_to_zero() {
        let mut rom = RomSet::new(&ROM, 3);
        let mut player = SequencePlayer::new();
        player.start(&mut rom, 0, false, false);
        player.set_speed(-200);
        // twice as fast: durations halve
        assert_eq!(run(&mut player, &mut rom), [(700, 150), (400, 100), (100, 50)]);
    }

    #[test]
    fn speed_change_applies_to_the_next_step() {
        let mut rom = RomSet::new(&ROM, 3);
        let mut player = SequencePlayer::new();
        player.start(&mut rom, 0, false, false);
        assert!(matches!(player.advance(&mut rom, 3, &identity()), Advance::Step { duration_ms: 100, .. }));
        assert_eq!(player.current_step(), 1);
        player.set_speed(50);
        assert!(matches!(player.advance(&mut rom, 3, &identity()), Advance::Step { duration_ms: 400, .. }));
        player.set_speed(0);
        // zero is treated as the slowest non-zero speed
        assert!(matches!(player.advance(&mut rom, 3, &identity()), Advance::Step { duration_ms: 30000, .. }));
    }

    #[test]
    fn looping_wraps_until_aborted() {
        let mut rom = RomSet::new(&ROM, 3);
        let mut player = SequencePlayer::new();
        player.start(&mut rom, 0, false, true);
        let firsts: std::vec::Vec<u16> = (0..7)
            .map(|_| match player.advance(&mut rom, 3, &identity()) {
                Advance::Step { pose, .. } => pose[0],
                Advance::Finished => 0,
            })
            .collect();
        assert_eq!(firsts, [100, 400, 700, 100, 400, 700, 100]);
        player.abort();
        assert_eq!(player.advance(&mut rom, 3, &identity()), Advance::Finished);
    }

    #[test]
    fn undefined_sequence_stays_idle() {
        let mut rom = RomSet::new(&ROM, 3);
        let mut player = SequencePlayer::new();
        assert!(!player.start(&mut rom, 4, false, false));
        assert!(!player.is_active());
        assert_eq!(player.current_step(), 0xFF);
    }

    #[test]
    fn inverted_start_mirrors_every_pose() {
        let mut rom = RomSet::new(&ROM, 3);
        let mirror = [0x80 + 1, 0x80, 2].map(MirrorEntry::from_packed);
        let mut player = SequencePlayer::new();
        player.start(&mut rom, 0, true, false);
        match player.advance(&mut rom, 3, &mirror) {
            Advance::Step { pose, .. } => assert_eq!(pose.as_slice(), &[1023 - 200, 1023 - 100, 300]),
            Advance::Finished => panic!("expected a step"),
        }
    }

    #[test]
    fn tick_drives_the_interpolator_to_the_end() {
        let sim = SimBus::with_servos(&[1, 2, 3]);
        let mut drv = sim_driver(&sim);
        block_on(drv.init());
        let mut rom = RomSet::new(&ROM, 3);
        let mut player = SequencePlayer::new();
        player.start(&mut rom, 0, false, false);

        let mut ticks = 0;
        while player.is_active() {
            block_on(player.tick(&mut rom, &mut drv)).unwrap();
            sim.advance(5);
            ticks += 1;
            assert!(ticks < 1000);
        }
        // the last armed move still has to play out
        block_on(drv.finish_interpolation()).unwrap();
        assert_eq!(sim.register_u16(3, p::REG_GOAL_POSITION_L), 900);
    }

    #[test]
    fn playback_runs_to_idle_with_motors_off() {
        let sim = SimBus::with_servos(&[1, 2, 3]);
        let mut drv = sim_driver(&sim);
        block_on(drv.init());
        drv.set_enabled(false);
        sim.clear_frames();
        let mut rom = RomSet::new(&ROM, 3);
        let mut player = SequencePlayer::new();
        assert!(player.start(&mut rom, 0, false, false));

        let mut ticks = 0;
        while player.is_active() {
            block_on(player.tick(&mut rom, &mut drv)).unwrap();
            sim.advance(5);
            ticks += 1;
            assert!(ticks < 1000);
        }
        assert!(sim.frames().is_empty());
    }
}
