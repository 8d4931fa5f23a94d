//! PyPose programming session
//! ===========================================================
//!
//! Frames addressed to id 253 are for the controller itself: they stage poses
//! and a transition list, play them, and save them to the sequence store.
//! Every other id is forwarded to that servo as a raw register read/write.

use embedded_hal::digital::v2::OutputPin;
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};
use embedded_storage::Storage;
use heapless::Vec;

use super::parser::{Packet, PacketParser, Parsed};
use super::{HostError, SelfTestIo};
use crate::config::HOST_PARAMS_MAX;
use crate::drivers::clock::Clock;
use crate::drivers::servo::protocol::{self as p, status_reply};
use crate::drivers::servo::{BusRx, Interpolator, ServoDriver};
use crate::sequence::{SequenceStore, StagedSequence, Transition};

/* ---- controller instructions ---- */
pub const INST_POSE_SIZE: u8 = 7;
pub const INST_LOAD_POSE: u8 = 8;
pub const INST_LOAD_SEQ: u8 = 9;
pub const INST_PLAY_SEQ: u8 = 10;
pub const INST_LOOP_SEQ: u8 = 11;
pub const INST_SAVE_SEQ: u8 = 12;
pub const INST_SELF_TEST: u8 = 25;

/// Byte the host sends to stop a running play/loop.
pub const HALT: u8 = b'H';

const SELF_TEST_SERVO: u8 = 1;

async fn reply<L: Write>(link: &mut L, id: u8, error: u8) -> Result<(), HostError> {
    let mut buf = [0u8; 6];
    let pkt = status_reply(id, error, &mut buf);
    link.write_all(pkt).await.map_err(|_| HostError::Link)?;
    link.flush().await.map_err(|_| HostError::Link)
}

async fn halt_requested<L: Read + ReadReady>(link: &mut L) -> Result<bool, HostError> {
    if !link.read_ready().map_err(|_| HostError::Link)? {
        return Ok(false);
    }
    let mut b = [0u8; 1];
    let n = link.read(&mut b).await.map_err(|_| HostError::Link)?;
    Ok(n == 1 && b[0] == HALT)
}

async fn pin_sweep<TX, RX, DIR, CLK, I, IO>(driver: &mut ServoDriver<TX, RX, DIR, CLK, I>, io: &mut IO)
where
    TX: Write,
    RX: BusRx,
    DIR: OutputPin,
    CLK: Clock,
    I: Interpolator,
    IO: SelfTestIo,
{
    for i in 0..8u8 {
        io.set_pin(i, true);
        io.set_pin(31 - i, true);
        driver.delay_ms(500).await;
        io.set_pin(i, false);
        io.set_pin(31 - i, false);
    }
}

pub struct PoseProgrammer {
    parser: PacketParser,
    staged: StagedSequence,
}

impl PoseProgrammer {
    pub fn new(pose_size: u8) -> Self {
        Self {
            parser: PacketParser::new(),
            staged: StagedSequence::new(pose_size),
        }
    }

    pub fn staged(&self) -> &StagedSequence {
        &self.staged
    }

    /// Feed bytes received from the host, executing every complete frame.
    pub async fn feed<L, S, IO, TX, RX, DIR, CLK, I>(
        &mut self,
        bytes: &[u8],
        link: &mut L,
        driver: &mut ServoDriver<TX, RX, DIR, CLK, I>,
        store: &mut SequenceStore<S>,
        io: &mut IO,
    ) -> Result<(), HostError>
    where
        L: Read + Write + ReadReady,
        S: Storage,
        IO: SelfTestIo,
        TX: Write,
        RX: BusRx,
        DIR: OutputPin,
        CLK: Clock,
        I: Interpolator,
    {
        for &b in bytes {
            match self.parser.push(b) {
                None => {}
                Some(Parsed::BadChecksum { id }) => {
                    warn!("host frame for id {} failed checksum", id);
                    reply(link, id, p::ERRBIT_INSTRUCTION).await?;
                }
                Some(Parsed::Packet(pkt)) if pkt.id == p::HOST_ID => {
                    reply(link, p::HOST_ID, 0).await?;
                    self.execute(&pkt, link, driver, store, io).await?;
                }
                Some(Parsed::Packet(pkt)) => Self::pass_through(&pkt, link, driver).await?,
            }
        }
        Ok(())
    }

    async fn execute<L, S, IO, TX, RX, DIR, CLK, I>(
        &mut self,
        pkt: &Packet,
        link: &mut L,
        driver: &mut ServoDriver<TX, RX, DIR, CLK, I>,
        store: &mut SequenceStore<S>,
        io: &mut IO,
    ) -> Result<(), HostError>
    where
        L: Read + Write + ReadReady,
        S: Storage,
        IO: SelfTestIo,
        TX: Write,
        RX: BusRx,
        DIR: OutputPin,
        CLK: Clock,
        I: Interpolator,
    {
        match pkt.instruction {
            INST_POSE_SIZE => {
                self.staged.set_pose_size(pkt.param(0));
                driver.read_pose().await;
            }
            INST_LOAD_POSE => {
                let mut words: Vec<u16, { HOST_PARAMS_MAX / 2 }> = Vec::new();
                for i in 0..self.staged.pose_size() as usize {
                    let w = u16::from_le_bytes([pkt.param(2 * i + 1), pkt.param(2 * i + 2)]);
                    if words.push(w).is_err() {
                        break;
                    }
                }
                if !self.staged.load_pose(pkt.param(0), &words) {
                    warn!("pose {} does not fit the staging buffer", pkt.param(0));
                }
            }
            INST_LOAD_SEQ => {
                let count = (pkt.length as usize).saturating_sub(2) / 3;
                self.staged.load_transitions(
                    pkt.params()
                        .chunks_exact(3)
                        .take(count)
                        .map(|c| Transition::new(c[0], u16::from_le_bytes([c[1], c[2]]))),
                );
            }
            INST_PLAY_SEQ => self.play(link, driver, false).await?,
            INST_LOOP_SEQ => self.play(link, driver, true).await?,
            INST_SAVE_SEQ => match store.save(pkt.param(0), &self.staged) {
                Ok(slot) => info!("host sequence stored in slot {}", slot),
                Err(e) => warn!("host sequence not stored: {:?}", e),
            },
            INST_SELF_TEST => {
                pin_sweep(driver, io).await;
                for pos in (452..552u16).step_by(20) {
                    if let Err(e) = driver.bus().set_position(SELF_TEST_SERVO, pos).await {
                        warn!("self test: servo {} did not answer: {:?}", SELF_TEST_SERVO, e);
                    }
                    driver.delay_ms(200).await;
                }
                driver.delay_ms(1500).await;
                pin_sweep(driver, io).await;
            }
            other => warn!("unknown host instruction {}", other),
        }
        Ok(())
    }

    /// Step through the staged transitions, once or until the host halts.
    async fn play<L, TX, RX, DIR, CLK, I>(
        &self,
        link: &mut L,
        driver: &mut ServoDriver<TX, RX, DIR, CLK, I>,
        looping: bool,
    ) -> Result<(), HostError>
    where
        L: Read + ReadReady,
        TX: Write,
        RX: BusRx,
        DIR: OutputPin,
        CLK: Clock,
        I: Interpolator,
    {
        let channels = driver.channel_count();
        loop {
            if self.staged.transitions().is_empty() {
                return Ok(());
            }
            for t in self.staged.transitions() {
                if halt_requested(link).await? {
                    info!("host playback halted");
                    return Ok(());
                }
                let Some(pose) = self.staged.pose(t.pose) else {
                    warn!("staged pose {} out of range", t.pose);
                    continue;
                };
                for (ch, &pos) in pose.iter().enumerate().take(channels) {
                    driver.set_next_pose(ch, pos);
                }
                driver.arm_interpolation(t.time as u32);
                driver.finish_interpolation().await?;
            }
            if !looping {
                return Ok(());
            }
        }
    }

    async fn pass_through<L, TX, RX, DIR, CLK, I>(
        pkt: &Packet,
        link: &mut L,
        driver: &mut ServoDriver<TX, RX, DIR, CLK, I>,
    ) -> Result<(), HostError>
    where
        L: Write,
        TX: Write,
        RX: BusRx,
        DIR: OutputPin,
        CLK: Clock,
        I: Interpolator,
    {
        match pkt.instruction {
            p::INST_READ => {
                let mut buf = [0u8; p::RXPACKET_MAX_LEN];
                match driver.bus().read_raw(pkt.id, pkt.param(0), pkt.param(1), &mut buf).await {
                    Ok(status) => {
                        link.write_all(status).await.map_err(|_| HostError::Link)?;
                        link.flush().await.map_err(|_| HostError::Link)?;
                    }
                    Err(e) => debug!("pass-through read from {} failed: {:?}", pkt.id, e),
                }
            }
            p::INST_WRITE => {
                let res = if pkt.length == 4 {
                    driver.bus().write_register(pkt.id, pkt.param(0), &[pkt.param(1)]).await
                } else {
                    let value = u16::from_le_bytes([pkt.param(1), pkt.param(2)]);
                    driver.bus().write_register_u16(pkt.id, pkt.param(0), value).await
                };
                if let Err(e) = res {
                    debug!("pass-through write to {} failed: {:?}", pkt.id, e);
                }
                reply(link, pkt.id, 0).await?;
            }
            other => debug!("pass-through instruction {} ignored", other),
        }
        Ok(())
    }
}
