//! AX-12 half-duplex bus transport
//! ===========================================================

use super::protocol::{self as p, Frame, SyncWrite};
use embedded_hal::digital::v2::OutputPin;
use embedded_io::{Error as _, ErrorKind, ReadExactError};
use embedded_io_async::{Read, Write};

/* ------------------------------------------------------------------------- */
/*  Error enum                                                               */
/* ------------------------------------------------------------------------- */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxRxError {
    Io,
    /// No reply before the receiver gave up.
    Timeout,
    BadChecksum,
    BadFormat,
    BufferFull,
}

impl From<p::StatusError> for TxRxError {
    fn from(e: p::StatusError) -> Self {
        match e {
            p::StatusError::BadFormat => Self::BadFormat,
            p::StatusError::BadChecksum => Self::BadChecksum,
        }
    }
}

impl From<p::FrameError> for TxRxError {
    fn from(_: p::FrameError) -> Self {
        Self::BufferFull
    }
}

fn map_read<E: embedded_io::Error>(e: ReadExactError<E>) -> TxRxError {
    match e {
        ReadExactError::UnexpectedEof => TxRxError::Timeout,
        ReadExactError::Other(e) if e.kind() == ErrorKind::TimedOut => TxRxError::Timeout,
        ReadExactError::Other(_) => TxRxError::Io,
    }
}

/// Receive half of the bus. Reads must give up with `ErrorKind::TimedOut`
/// when the line stays quiet, so a missing servo never stalls the loop.
#[allow(async_fn_in_trait)]
pub trait BusRx: Read {
    /// Throw away anything left over from earlier traffic.
    async fn clear(&mut self);
}

/// Direction pin for transceivers that switch direction on their own.
pub struct NoDirection;

impl OutputPin for NoDirection {
    type Error = core::convert::Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/* ------------------------------------------------------------------------- */
/*  Bus struct                                                               */
/* ------------------------------------------------------------------------- */
pub struct ServoBus<TX, RX, DIR> {
    tx: TX,
    rx: RX,
    dir: DIR,
}

impl<TX, RX, DIR> ServoBus<TX, RX, DIR>
where
    TX: Write,
    RX: BusRx,
    DIR: OutputPin,
{
    pub fn new(tx: TX, rx: RX, dir: DIR) -> Self {
        Self { tx, rx, dir }
    }

    /* ================= low‑level helpers ========================= */

    /// Put one frame on the wire. The transceiver is held in transmit for the
    /// whole frame so nothing else can interleave with it.
    pub async fn send(&mut self, pkt: &[u8]) -> Result<(), TxRxError> {
        self.dir.set_high().map_err(|_| TxRxError::Io)?;
        let res = async {
            self.tx.write_all(pkt).await.map_err(|_| TxRxError::Io)?;
            self.tx.flush().await.map_err(|_| TxRxError::Io)
        }
        .await;
        self.dir.set_low().map_err(|_| TxRxError::Io)?;
        res
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TxRxError> {
        self.rx.read_exact(buf).await.map_err(map_read)
    }

    /* ================= public API ============================ */

    /* ---- PING ---- */
    pub async fn ping(&mut self, id: u8) -> Result<(), TxRxError> {
        let mut f = Frame::ping(id);
        self.rx.clear().await;
        self.send(f.finish()).await?;

        let mut resp = [0u8; 6];
        self.read_exact(&mut resp).await?;
        let st = p::parse_status(&resp)?;
        if st.id != id {
            return Err(TxRxError::BadFormat);
        }
        Ok(())
    }

    /// Read `len` bytes starting at `addr` and return the servo's complete
    /// status packet (`FF FF id len err data.. chk`) inside `buf`.
    pub async fn read_raw<'b>(
        &mut self,
        id: u8,
        addr: u8,
        len: u8,
        buf: &'b mut [u8; p::RXPACKET_MAX_LEN],
    ) -> Result<&'b [u8], TxRxError> {
        let total = 6 + len as usize; // FF FF ID LEN ERR data… CS
        if total > buf.len() {
            return Err(TxRxError::BufferFull);
        }
        let mut f = Frame::read(id, addr, len);
        self.rx.clear().await;
        self.send(f.finish()).await?;

        self.read_exact(&mut buf[..total]).await?;
        let st = p::parse_status(&buf[..total])?;
        if st.id != id {
            return Err(TxRxError::BadFormat);
        }
        Ok(&buf[..total])
    }

    /// One- or two-byte register read, little endian.
    pub async fn read_register(&mut self, id: u8, addr: u8, len: u8) -> Result<u16, TxRxError> {
        if !(1..=2).contains(&len) {
            return Err(TxRxError::BufferFull);
        }
        let mut buf = [0u8; p::RXPACKET_MAX_LEN];
        let pkt = self.read_raw(id, addr, len, &mut buf).await?;
        let lo = pkt[p::idx::PARAM_0] as u16;
        let hi = if len == 2 {
            pkt[p::idx::PARAM_0 + 1] as u16
        } else {
            0
        };
        Ok(lo | (hi << 8))
    }

    /// Write raw bytes to a register, wait for the 6‑byte status.
    pub async fn write_register(&mut self, id: u8, addr: u8, data: &[u8]) -> Result<(), TxRxError> {
        let mut f = Frame::write(id, addr, data)?;
        self.rx.clear().await;
        self.send(f.finish()).await?;

        let mut status = [0u8; 6];
        self.read_exact(&mut status).await?;
        let st = p::parse_status(&status)?;
        if st.id != id || st.error != 0 {
            return Err(TxRxError::BadFormat);
        }
        Ok(())
    }

    pub async fn write_register_u16(&mut self, id: u8, addr: u8, value: u16) -> Result<(), TxRxError> {
        self.write_register(id, addr, &value.to_le_bytes()).await
    }

    /// Broadcast a prepared synchronized write. The bus never answers these.
    pub async fn sync_write(&mut self, frame: &mut SyncWrite) -> Result<(), TxRxError> {
        self.send(frame.finish()).await
    }

    pub async fn set_torque(&mut self, id: u8, on: bool) -> Result<(), TxRxError> {
        self.write_register(id, p::REG_TORQUE_ENABLE, &[on as u8]).await
    }

    pub async fn set_position(&mut self, id: u8, pos: u16) -> Result<(), TxRxError> {
        self.write_register_u16(id, p::REG_GOAL_POSITION_L, pos).await
    }

    pub async fn present_position(&mut self, id: u8) -> Result<u16, TxRxError> {
        self.read_register(id, p::REG_PRESENT_POSITION_L, 2).await
    }

    /// Supply voltage in 0.1 V.
    pub async fn present_voltage(&mut self, id: u8) -> Result<u8, TxRxError> {
        Ok(self.read_register(id, p::REG_PRESENT_VOLTAGE, 1).await? as u8)
    }

    pub fn release(self) -> (TX, RX, DIR) {
        (self.tx, self.rx, self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;
    use embassy_futures::block_on;

    #[test]
    fn register_read_round_trips_through_simulated_servo() {
        let sim = SimBus::with_servos(&[1, 2]);
        sim.set_register_u16(2, p::REG_PRESENT_POSITION_L, 700);
        let mut bus = sim.bus();
        assert_eq!(block_on(bus.present_position(2)), Ok(700));
        // last frame on the wire is the read request
        let frames = sim.frames();
        assert_eq!(frames.last().unwrap()[p::idx::INSTRUCTION], p::INST_READ);
    }

    #[test]
    fn missing_servo_reads_time_out() {
        let sim = SimBus::with_servos(&[1]);
        let mut bus = sim.bus();
        assert_eq!(block_on(bus.present_position(9)), Err(TxRxError::Timeout));
        assert_eq!(block_on(bus.ping(9)), Err(TxRxError::Timeout));
        assert_eq!(block_on(bus.ping(1)), Ok(()));
    }

    #[test]
    fn corrupted_reply_is_reported() {
        let sim = SimBus::with_servos(&[1]);
        sim.corrupt_next_reply();
        let mut bus = sim.bus();
        assert_eq!(block_on(bus.present_voltage(1)), Err(TxRxError::BadChecksum));
    }

    #[test]
    fn torque_write_lands_in_servo_memory() {
        let sim = SimBus::with_servos(&[4]);
        let mut bus = sim.bus();
        block_on(bus.set_torque(4, true)).unwrap();
        assert_eq!(sim.register(4, p::REG_TORQUE_ENABLE), 1);
        block_on(bus.set_torque(4, false)).unwrap();
        assert_eq!(sim.register(4, p::REG_TORQUE_ENABLE), 0);
    }

    #[test]
    fn direction_pin_returns_to_receive_after_each_frame() {
        let sim = SimBus::with_servos(&[1]);
        let mut bus = sim.bus();
        block_on(bus.ping(1)).unwrap();
        assert_eq!(sim.direction_toggles(), 1);
        assert!(!sim.transmitting());
    }

    #[test]
    fn self_switching_transceiver_needs_no_pin() {
        let sim = SimBus::with_servos(&[3]);
        let (tx, rx, _) = sim.bus().release();
        let mut bus = ServoBus::new(tx, rx, NoDirection);
        assert_eq!(block_on(bus.present_position(3)), Ok(512));
        assert_eq!(sim.direction_toggles(), 0);
    }
}

#[cfg(feature = "firmware")]
pub use timed::{TimedRx, TimedRxError};

/// Ring-buffered UART receiver that gives up after a quiet period.
#[cfg(feature = "firmware")]
mod timed {
    use embassy_stm32::usart::{self, RingBufferedUartRx};
    use embassy_time::{with_timeout, Duration};
    use embedded_io::{ErrorKind, ErrorType};
    use embedded_io_async::Read;

    use super::BusRx;

    const REPLY_TIMEOUT: Duration = Duration::from_millis(3);
    const DRAIN_WINDOW: Duration = Duration::from_micros(500);

    #[derive(Debug, defmt::Format)]
    pub enum TimedRxError {
        Timeout,
        Uart(usart::Error),
    }

    impl embedded_io::Error for TimedRxError {
        fn kind(&self) -> ErrorKind {
            match self {
                Self::Timeout => ErrorKind::TimedOut,
                Self::Uart(_) => ErrorKind::Other,
            }
        }
    }

    pub struct TimedRx {
        rx: RingBufferedUartRx<'static>,
        timeout: Duration,
    }

    impl TimedRx {
        pub fn new(rx: RingBufferedUartRx<'static>) -> Self {
            Self { rx, timeout: REPLY_TIMEOUT }
        }
    }

    impl ErrorType for TimedRx {
        type Error = TimedRxError;
    }

    impl Read for TimedRx {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            match with_timeout(self.timeout, self.rx.read(buf)).await {
                Ok(r) => r.map_err(TimedRxError::Uart),
                Err(_) => Err(TimedRxError::Timeout),
            }
        }
    }

    impl BusRx for TimedRx {
        async fn clear(&mut self) {
            let mut trash = [0u8; 16];
            // drain until the line stays quiet
            while let Ok(Ok(n)) = with_timeout(DRAIN_WINDOW, self.rx.read(&mut trash)).await {
                if n == 0 {
                    break;
                }
            }
        }
    }
}
