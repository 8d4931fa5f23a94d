//! Motion controller: owns the servo driver, the sequence library, the player
//! and the host programmer, and is the one place operator commands and
//! background ticks land.

use embedded_hal::digital::v2::OutputPin;
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};
use embedded_storage::Storage;
use heapless::Vec;
use portable_atomic::Ordering;

use crate::config::{MAX_CHANNELS, POSITION_READ_SETTLE_MS};
use crate::drivers::clock::Clock;
use crate::drivers::servo::{BusRx, Interpolator, ServoDriver, TxRxError};
use crate::host::{HostError, PoseProgrammer, SelfTestIo};
use crate::ipc::{Command, BODY_INVERTED};
use crate::sequence::{SequenceLibrary, SequencePlayer};

pub struct MotionController<TX, RX, DIR, CLK, I, S> {
    driver: ServoDriver<TX, RX, DIR, CLK, I>,
    library: SequenceLibrary<S>,
    player: SequencePlayer,
    programmer: PoseProgrammer,
}

impl<TX, RX, DIR, CLK, I, S> MotionController<TX, RX, DIR, CLK, I, S>
where
    TX: Write,
    RX: BusRx,
    DIR: OutputPin,
    CLK: Clock,
    I: Interpolator,
    S: Storage,
{
    pub fn new(driver: ServoDriver<TX, RX, DIR, CLK, I>, library: SequenceLibrary<S>) -> Self {
        let programmer = PoseProgrammer::new(driver.channel_count() as u8);
        Self {
            driver,
            library,
            player: SequencePlayer::new(),
            programmer,
        }
    }

    pub async fn init(&mut self) {
        self.driver.init().await;
    }

    /// Output path for the gait layer.
    pub fn driver(&mut self) -> &mut ServoDriver<TX, RX, DIR, CLK, I> {
        &mut self.driver
    }

    pub fn player(&self) -> &SequencePlayer {
        &self.player
    }

    pub fn library(&mut self) -> &mut SequenceLibrary<S> {
        &mut self.library
    }

    pub fn start_sequence(&mut self, index: u8, looping: bool) -> bool {
        let inverted = BODY_INVERTED.load(Ordering::Relaxed);
        self.player.start(&mut self.library, index, inverted, looping)
    }

    pub async fn apply(&mut self, cmd: Command) -> Result<(), TxRxError> {
        debug!("command {:?}", cmd);
        match cmd {
            Command::SetMotors(on) => self.driver.set_enabled(on),
            Command::ToggleMotors => {
                let on = !self.driver.state().enabled;
                self.driver.set_enabled(on);
            }
            Command::ToggleSpeedControl => {
                self.driver.toggle_mode();
            }
            Command::SetFrameLength(ms) => self.driver.set_frame_length(ms),
            Command::FreeServos => self.driver.free_servos().await?,
            Command::StartSequence { index, looping } => {
                self.start_sequence(index, looping);
            }
            Command::StopSequence => self.player.abort(),
            Command::SetSpeed(speed) => self.player.set_speed(speed),
            Command::ReportPositions => {
                self.report_positions().await;
            }
            Command::ReportBattery => {
                let v = self.driver.battery_voltage().await;
                info!("battery {} cV", v);
            }
        }
        Ok(())
    }

    /// Present position of every servo, read one at a time.
    pub async fn report_positions(&mut self) -> Vec<(u8, Option<u16>), MAX_CHANNELS> {
        let mut out = Vec::new();
        for ch in 0..self.driver.channel_count() {
            let id = self.driver.config().ids[ch];
            let pos = self.driver.bus().present_position(id).await.ok();
            match pos {
                Some(p) => info!("servo {} = {}", id, p),
                None => warn!("servo {} did not answer", id),
            }
            let _ = out.push((id, pos));
            self.driver.delay_ms(POSITION_READ_SETTLE_MS).await;
        }
        out
    }

    /// Background work: sequence playback when one runs, otherwise the
    /// driver's own interpolation step.
    pub async fn tick(&mut self) -> Result<(), TxRxError> {
        if self.player.is_active() {
            self.player.tick(&mut self.library, &mut self.driver).await
        } else {
            self.driver.background_step().await.map(|_| ())
        }
    }

    /// Bytes from the programming link.
    pub async fn host_input<L, IO>(&mut self, bytes: &[u8], link: &mut L, io: &mut IO) -> Result<(), HostError>
    where
        L: Read + Write + ReadReady,
        IO: SelfTestIo,
    {
        self.programmer
            .feed(bytes, link, &mut self.driver, self.library.store(), io)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::servo::{protocol as p, OutputMode};
    use crate::host::parser::frame;
    use crate::sequence::{RomSet, SequenceStore, StoreLayout};
    use crate::sim::{sim_driver, MockHost, PinLog, RamStore, SimBus, SimClock, SimDir, SimRx, SimTx};
    use crate::drivers::servo::LinearInterpolator;
    use embassy_futures::block_on;

    type Ctl = MotionController<SimTx, SimRx, SimDir, SimClock, LinearInterpolator, RamStore<2048>>;

    fn controller(sim: &SimBus) -> Ctl {
        let drv = sim_driver(sim);
        let n = drv.channel_count() as u8;
        let store = SequenceStore::new(RamStore::new(), StoreLayout::default(), n);
        let mut ctl = MotionController::new(drv, SequenceLibrary::new(RomSet::EMPTY, store));
        block_on(ctl.init());
        ctl
    }

    fn hexapod() -> SimBus {
        SimBus::with_servos(&(1..=18).collect::<std::vec::Vec<u8>>())
    }

    #[test]
    fn operator_toggles_reach_the_driver() {
        let sim = hexapod();
        let mut ctl = controller(&sim);
        block_on(ctl.apply(Command::ToggleSpeedControl)).unwrap();
        assert_eq!(ctl.driver().state().mode, OutputMode::SpeedControl);
        block_on(ctl.apply(Command::ToggleMotors)).unwrap();
        assert!(!ctl.driver().state().enabled);
        block_on(ctl.apply(Command::SetMotors(true))).unwrap();
        assert!(ctl.driver().state().enabled);
        block_on(ctl.apply(Command::SetFrameLength(20))).unwrap();
        block_on(ctl.apply(Command::SetFrameLength(0))).unwrap();
        assert_eq!(ctl.driver().interpolator().frame_length(), 20);
    }

    #[test]
    fn undefined_sequence_leaves_player_idle() {
        let sim = hexapod();
        let mut ctl = controller(&sim);
        block_on(ctl.apply(Command::StartSequence { index: 4, looping: false })).unwrap();
        assert!(!ctl.player().is_active());
        assert_eq!(ctl.player().current_step(), 0xFF);
    }

    #[test]
    fn host_saved_sequence_plays_back_through_ticks() {
        let sim = hexapod();
        let mut ctl = controller(&sim);
        let host = MockHost::new();
        let mut link = host.link();
        let mut pins = PinLog::default();

        let mut pose = std::vec![0u8];
        for _ in 0..18 {
            pose.extend_from_slice(&700u16.to_le_bytes());
        }
        let mut bytes = frame(253, 8, &pose);
        bytes.extend(frame(253, 9, &[0, 0x2C, 0x01, 0xFF, 0, 0]));
        bytes.extend(frame(253, 12, &[0]));
        block_on(ctl.host_input(&bytes, &mut link, &mut pins)).unwrap();
        assert!(ctl.library().is_defined(0));

        BODY_INVERTED.store(false, Ordering::Relaxed);
        block_on(ctl.apply(Command::StartSequence { index: 0, looping: false })).unwrap();
        assert_eq!(ctl.player().num_steps(), 1);
        let mut ticks = 0;
        while ctl.player().is_active() {
            block_on(ctl.tick()).unwrap();
            sim.advance(5);
            ticks += 1;
            assert!(ticks < 1000);
        }
        assert_eq!(sim.register_u16(7, p::REG_GOAL_POSITION_L), 700);
    }

    #[test]
    fn position_report_covers_every_servo() {
        let sim = SimBus::with_servos(&[1, 2, 3]);
        sim.remove_servo(2);
        let mut ctl = controller(&sim);
        let report = block_on(ctl.report_positions());
        assert_eq!(report.as_slice(), &[(1, Some(512)), (2, None), (3, Some(512))]);
    }
}
