//! Servo driver facade
//! ===========================================================
//!
//! Owns the bus, both output engines and the driver flags. The gait layer
//! calls [`ServoDriver::begin_update`], then [`ServoDriver::set_leg_output`]
//! once per leg, then [`ServoDriver::commit`]; the background loop calls
//! [`ServoDriver::background_step`]. While the driver is disabled every output
//! call returns `Ok(())` without touching the bus.

use super::bus::{BusRx, ServoBus, TxRxError};
use super::interpolate::{Interpolator, LinearInterpolator};
use super::protocol::SyncWrite;
use super::speed::SpeedEngine;
use crate::config::*;
use crate::drivers::clock::Clock;
use embedded_hal::digital::v2::OutputPin;
use embedded_io_async::Write;
use heapless::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputMode {
    /// Poses are walked by the interpolation engine, one frame at a time.
    Interpolated,
    /// One goal+speed synchronized write per commit.
    SpeedControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverState {
    pub enabled: bool,
    pub mode: OutputMode,
    /// Torque is off and the servos can be posed by hand.
    pub free: bool,
}

struct VoltageCache {
    value: Option<u16>,
    read_at: u64,
}

/// Joint angle in 0.1 degree (0 = centered) to AX-12 position units.
pub fn angle_to_position(angle: i16) -> u16 {
    let pos = angle as i32 * ANGLE_MULT / ANGLE_DIV + POSITION_CENTER;
    pos.clamp(0, POSITION_MAX as i32) as u16
}

pub struct ServoDriver<TX, RX, DIR, CLK, I = LinearInterpolator> {
    bus: ServoBus<TX, RX, DIR>,
    clock: CLK,
    config: RobotConfig,
    interp: I,
    speed: SpeedEngine,
    state: DriverState,
    voltage: VoltageCache,
}

impl<TX, RX, DIR, CLK> ServoDriver<TX, RX, DIR, CLK, LinearInterpolator>
where
    TX: Write,
    RX: BusRx,
    DIR: OutputPin,
    CLK: Clock,
{
    pub fn with_linear(bus: ServoBus<TX, RX, DIR>, clock: CLK, config: RobotConfig) -> Self {
        let interp = LinearInterpolator::new(config.channel_count());
        Self::new(bus, clock, config, interp)
    }
}

impl<TX, RX, DIR, CLK, I> ServoDriver<TX, RX, DIR, CLK, I>
where
    TX: Write,
    RX: BusRx,
    DIR: OutputPin,
    CLK: Clock,
    I: Interpolator,
{
    pub fn new(bus: ServoBus<TX, RX, DIR>, clock: CLK, config: RobotConfig, interp: I) -> Self {
        let speed = SpeedEngine::new(config.channel_count());
        Self {
            bus,
            clock,
            config,
            interp,
            speed,
            state: DriverState {
                enabled: true,
                mode: OutputMode::Interpolated,
                free: true,
            },
            voltage: VoltageCache {
                value: None,
                read_at: 0,
            },
        }
    }

    /* ================= lifecycle ============================ */

    /// Capture where the servos are right now into both output engines.
    pub async fn init(&mut self) {
        self.state.free = true;
        self.state.mode = OutputMode::Interpolated;
        let positions = self.read_positions(false).await;
        self.interp.load_positions(&positions);
        self.speed.load_positions(&positions);
        info!(
            "servo driver up: {} channels, frame {}ms",
            self.config.channel_count(),
            self.interp.frame_length()
        );
    }

    /// Present position of every channel. A servo that does not answer keeps
    /// the position the interpolation engine last gave it.
    pub async fn read_positions(&mut self, settle: bool) -> Vec<u16, MAX_CHANNELS> {
        let mut out = Vec::new();
        for ch in 0..self.config.channel_count() {
            let id = self.config.ids[ch];
            let pos = match self.bus.present_position(id).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("no position from servo {}: {:?}", id, e);
                    self.interp.position(ch).unwrap_or(POSITION_CENTER as u16)
                }
            };
            let _ = out.push(pos);
            if settle {
                self.clock.delay_ms(POSITION_READ_SETTLE_MS).await;
            }
        }
        out
    }

    /// Start the interpolation engine from wherever the servos are now.
    pub async fn read_pose(&mut self) {
        if !self.state.enabled {
            return;
        }
        let positions = self.read_positions(false).await;
        self.interp.load_positions(&positions);
    }

    /// Re-read positions and switch torque back on if the servos were free.
    pub async fn ensure_torque(&mut self) -> Result<(), TxRxError> {
        if !self.state.enabled || !self.state.free {
            return Ok(());
        }
        match self.state.mode {
            OutputMode::SpeedControl => {
                let positions = self.read_positions(true).await;
                self.speed.load_positions(&positions);
            }
            OutputMode::Interpolated => {
                let positions = self.read_positions(false).await;
                self.interp.load_positions(&positions);
            }
        }
        let res = self.torque_all(true).await;
        self.state.free = false;
        debug!("servos torqued");
        res
    }

    /// Release every servo so the body can be posed by hand.
    pub async fn free_servos(&mut self) -> Result<(), TxRxError> {
        if !self.state.enabled || self.state.free {
            return Ok(());
        }
        let res = self.torque_all(false).await;
        self.state.free = true;
        debug!("servos free");
        res
    }

    async fn torque_all(&mut self, on: bool) -> Result<(), TxRxError> {
        let mut res = Ok(());
        for ch in 0..self.config.channel_count() {
            let id = self.config.ids[ch];
            if let Err(e) = self.bus.set_torque(id, on).await {
                warn!("torque {} on servo {} failed: {:?}", on, id, e);
                res = Err(e);
            }
        }
        res
    }

    /* ================= per-cycle output ========================== */

    pub async fn begin_update(&mut self) -> Result<(), TxRxError> {
        if !self.state.enabled {
            return Ok(());
        }
        self.ensure_torque().await?;
        match self.state.mode {
            OutputMode::SpeedControl => {
                self.speed.roll_forward();
                Ok(())
            }
            OutputMode::Interpolated => self.wait_and_step().await.map(|_| ()),
        }
    }

    /// Route one leg's joint angles (0.1 degree, centered at 0) to the active engine.
    pub fn set_leg_output(&mut self, leg: usize, coxa: i16, femur: i16, tibia: i16, tars: Option<i16>) {
        if !self.state.enabled {
            return;
        }
        let Some(chans) = self.config.leg(leg).copied() else {
            return;
        };
        self.set_channel_output(chans.coxa as usize, angle_to_position(coxa));
        self.set_channel_output(chans.femur as usize, angle_to_position(femur));
        self.set_channel_output(chans.tibia as usize, angle_to_position(tibia));
        if let (Some(ch), Some(angle)) = (chans.tars, tars) {
            self.set_channel_output(ch as usize, angle_to_position(angle));
        }
    }

    fn set_channel_output(&mut self, channel: usize, pos: u16) {
        match self.state.mode {
            OutputMode::SpeedControl => self.speed.set_goal(channel, pos),
            OutputMode::Interpolated => self.interp.set_next(channel, pos),
        }
    }

    /// Finish the cycle. `time_ms` must be at least 1.
    pub async fn commit(&mut self, time_ms: u16) -> Result<(), TxRxError> {
        if !self.state.enabled {
            return Ok(());
        }
        match self.state.mode {
            OutputMode::SpeedControl => {
                let mut frame = self.speed.build_frame(&self.config.ids, time_ms)?;
                self.bus.sync_write(&mut frame).await?;
                self.speed.roll_forward();
            }
            OutputMode::Interpolated => {
                let now = self.clock.now_ms();
                self.interp.arm(time_ms as u32, now);
            }
        }
        Ok(())
    }

    /// Background work between cycles; nothing to do under speed control.
    pub async fn background_step(&mut self) -> Result<bool, TxRxError> {
        if self.state.mode == OutputMode::SpeedControl {
            return Ok(false);
        }
        self.interpolation_step().await
    }

    /* ================= interpolation engine access ================= */

    pub fn set_next_pose(&mut self, channel: usize, pos: u16) {
        self.interp.set_next(channel, pos);
    }

    pub fn arm_interpolation(&mut self, duration_ms: u32) {
        let now = self.clock.now_ms();
        self.interp.arm(duration_ms, now);
    }

    pub fn is_interpolating(&self) -> bool {
        self.interp.is_interpolating()
    }

    /// Produce one interpolation frame if it is due. `Ok(true)` when a frame went out.
    /// With motors off the move still runs to completion, only the bus is skipped.
    pub async fn interpolation_step(&mut self) -> Result<bool, TxRxError> {
        let now = self.clock.now_ms();
        let Some(positions) = self.interp.step(now) else {
            return Ok(false);
        };
        if !self.state.enabled {
            return Ok(false);
        }
        let mut frame = SyncWrite::positions();
        for (&id, &pos) in self.config.ids.iter().zip(positions.iter()) {
            frame.push_position(id, pos)?;
        }
        self.bus.sync_write(&mut frame).await?;
        Ok(true)
    }

    /// Wait for the next frame boundary, then step.
    pub async fn wait_and_step(&mut self) -> Result<bool, TxRxError> {
        if !self.interp.is_interpolating() {
            return Ok(false);
        }
        let due = self.interp.frame_due_at();
        self.clock.delay_until(due).await;
        self.interpolation_step().await
    }

    /// Step until the armed move is finished.
    pub async fn finish_interpolation(&mut self) -> Result<(), TxRxError> {
        while self.interp.is_interpolating() {
            self.wait_and_step().await?;
        }
        Ok(())
    }

    /* ================= battery ============================ */

    /// Battery voltage in 0.01 V read through the first servo; 0 when it never answers.
    /// While a move is being interpolated the last reading is reused for a while to
    /// keep the bus free.
    pub async fn battery_voltage(&mut self) -> u16 {
        let now = self.clock.now_ms();
        if let Some(v) = self.voltage.value {
            if self.interp.is_interpolating()
                && now.saturating_sub(self.voltage.read_at) < VOLTAGE_CACHE_MS
            {
                return v;
            }
        }
        let Some(&id) = self.config.ids.first() else {
            return 0;
        };
        for _ in 0..VOLTAGE_READ_ATTEMPTS {
            if let Ok(v) = self.bus.present_voltage(id).await {
                let v = v as u16 * 10;
                self.voltage = VoltageCache {
                    value: Some(v),
                    read_at: self.clock.now_ms(),
                };
                return v;
            }
        }
        warn!("battery voltage: servo {} did not answer", id);
        0
    }

    /* ================= operator toggles ===================== */

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
        info!("motors {}", if enabled { "on" } else { "off" });
    }

    pub fn set_mode(&mut self, mode: OutputMode) {
        if self.state.mode == mode {
            return;
        }
        // the engine taking over starts from wherever the other one left the servos
        match mode {
            OutputMode::SpeedControl => {
                let mut positions: Vec<u16, MAX_CHANNELS> = Vec::new();
                for ch in 0..self.config.channel_count() {
                    let _ = positions.push(self.interp.position(ch).unwrap_or(POSITION_CENTER as u16));
                }
                self.speed.load_positions(&positions);
            }
            OutputMode::Interpolated => {
                let mut positions: Vec<u16, MAX_CHANNELS> = Vec::new();
                for ch in 0..self.config.channel_count() {
                    let _ = positions.push(self.speed.goal(ch).unwrap_or(POSITION_CENTER as u16));
                }
                self.interp.load_positions(&positions);
            }
        }
        self.state.mode = mode;
        info!("output mode {:?}", mode);
    }

    pub fn toggle_mode(&mut self) -> OutputMode {
        let next = match self.state.mode {
            OutputMode::Interpolated => OutputMode::SpeedControl,
            OutputMode::SpeedControl => OutputMode::Interpolated,
        };
        self.set_mode(next);
        next
    }

    pub fn set_frame_length(&mut self, ms: u8) {
        if ms != 0 {
            self.interp.set_frame_length(ms);
            info!("servo cycles per second: {}", 1000 / ms as u32);
        }
    }

    /* ================= misc access ============================ */

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.config.channel_count()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub async fn delay_ms(&mut self, ms: u32) {
        self.clock.delay_ms(ms).await
    }

    pub fn interpolator(&self) -> &I {
        &self.interp
    }

    pub fn speed_engine(&self) -> &SpeedEngine {
        &self.speed
    }

    /// Raw bus access for pass-through traffic. Callers must not hold it across a commit.
    pub fn bus(&mut self) -> &mut ServoBus<TX, RX, DIR> {
        &mut self.bus
    }
}
