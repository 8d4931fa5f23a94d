//! In-memory stand-ins for the robot's peripherals, used by the unit tests.
//!
//! `SimBus` answers AX-12 traffic the way a chain of real servos would, a
//! `RamStore` plays the flash, `SimClock` is a manually driven millisecond
//! clock and `MockHost` is the PC end of the programming link.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::digital::v2::OutputPin;
use embedded_io::{ErrorKind, ErrorType, ReadReady};
use embedded_io_async::{Read, Write};
use embedded_storage::{ReadStorage, Storage};

use crate::config::{MirrorEntry, RobotConfig};
use crate::drivers::clock::Clock;
use crate::drivers::servo::bus::{BusRx, ServoBus};
use crate::drivers::servo::protocol as p;
use crate::drivers::servo::ServoDriver;
use crate::host::SelfTestIo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimIoError {
    TimedOut,
}

impl embedded_io::Error for SimIoError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::TimedOut
    }
}

/* ------------------------------------------------------------------------- */
/*  Servo chain                                                              */
/* ------------------------------------------------------------------------- */

#[derive(Default)]
struct SimState {
    ids: Vec<u8>,
    servos: BTreeMap<u8, [u8; 64]>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    frames: Vec<Vec<u8>>,
    corrupt_next: bool,
    transmitting: bool,
    toggles: usize,
    now: u64,
}

impl SimState {
    fn reply(&mut self, id: u8, data: &[u8]) {
        let mut pkt = vec![0xFF, 0xFF, id, data.len() as u8 + 2, 0];
        pkt.extend_from_slice(data);
        let chk = p::checksum(&pkt[2..]);
        pkt.push(chk);
        if self.corrupt_next {
            self.corrupt_next = false;
            let last = pkt.len() - 1;
            pkt[last] ^= 0x5A;
        }
        self.rx.extend(pkt);
    }

    fn handle(&mut self, pkt: Vec<u8>) {
        self.frames.push(pkt.clone());
        if pkt.len() < 6 || pkt[..2] != p::HEADER {
            return;
        }
        let id = pkt[p::idx::ID];
        let ins = pkt[p::idx::INSTRUCTION];
        let params = &pkt[p::idx::PARAM_0..pkt.len() - 1];

        if ins == p::INST_SYNC_WRITE {
            let start = params[0] as usize;
            let len = params[1] as usize;
            for chunk in params[2..].chunks(len + 1) {
                if let Some(regs) = self.servos.get_mut(&chunk[0]) {
                    regs[start..start + len].copy_from_slice(&chunk[1..]);
                }
            }
            return;
        }
        if id == p::BROADCAST_ID {
            return;
        }
        let Some(regs) = self.servos.get_mut(&id) else {
            return;
        };
        match ins {
            p::INST_READ => {
                let (a, l) = (params[0] as usize, params[1] as usize);
                let data = regs[a..a + l].to_vec();
                self.reply(id, &data);
            }
            p::INST_WRITE => {
                let a = params[0] as usize;
                regs[a..a + params.len() - 1].copy_from_slice(&params[1..]);
                self.reply(id, &[]);
            }
            _ => self.reply(id, &[]),
        }
    }
}

/// A chain of simulated servos plus the shared clock.
#[derive(Clone)]
pub struct SimBus {
    state: Rc<RefCell<SimState>>,
}

impl SimBus {
    pub fn with_servos(ids: &[u8]) -> Self {
        let mut state = SimState::default();
        for &id in ids {
            let mut regs = [0u8; 64];
            regs[p::REG_ID as usize] = id;
            regs[p::REG_PRESENT_POSITION_L as usize..][..2].copy_from_slice(&512u16.to_le_bytes());
            regs[p::REG_PRESENT_VOLTAGE as usize] = 120;
            state.servos.insert(id, regs);
        }
        state.ids = ids.to_vec();
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn bus(&self) -> ServoBus<SimTx, SimRx, SimDir> {
        ServoBus::new(
            SimTx(self.state.clone()),
            SimRx(self.state.clone()),
            SimDir(self.state.clone()),
        )
    }

    pub fn clock(&self) -> SimClock {
        SimClock(self.state.clone())
    }

    /// Channel `i` drives the `i`-th servo given to `with_servos`.
    pub fn config(&self) -> RobotConfig {
        let ids = self.state.borrow().ids.clone();
        if ids == (1..=18).collect::<Vec<u8>>() {
            return RobotConfig::phoenix_hexapod();
        }
        let mirror: Vec<MirrorEntry> = (0..ids.len() as u8).map(MirrorEntry::from_packed).collect();
        RobotConfig::new(&ids, &[], &mirror).unwrap()
    }

    pub fn set_register(&self, id: u8, addr: u8, value: u8) {
        self.state.borrow_mut().servos.get_mut(&id).unwrap()[addr as usize] = value;
    }

    pub fn set_register_u16(&self, id: u8, addr: u8, value: u16) {
        let mut st = self.state.borrow_mut();
        let regs = st.servos.get_mut(&id).unwrap();
        regs[addr as usize..][..2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn register(&self, id: u8, addr: u8) -> u8 {
        self.state.borrow().servos[&id][addr as usize]
    }

    pub fn register_u16(&self, id: u8, addr: u8) -> u16 {
        let st = self.state.borrow();
        let regs = &st.servos[&id];
        u16::from_le_bytes([regs[addr as usize], regs[addr as usize + 1]])
    }

    pub fn remove_servo(&self, id: u8) {
        self.state.borrow_mut().servos.remove(&id);
    }

    /// Every frame the controller put on the wire, oldest first.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.borrow().frames.clone()
    }

    pub fn clear_frames(&self) {
        self.state.borrow_mut().frames.clear();
    }

    pub fn corrupt_next_reply(&self) {
        self.state.borrow_mut().corrupt_next = true;
    }

    pub fn direction_toggles(&self) -> usize {
        self.state.borrow().toggles
    }

    pub fn transmitting(&self) -> bool {
        self.state.borrow().transmitting
    }

    pub fn now(&self) -> u64 {
        self.state.borrow().now
    }

    pub fn advance(&self, ms: u64) {
        self.state.borrow_mut().now += ms;
    }
}

pub struct SimTx(Rc<RefCell<SimState>>);
pub struct SimRx(Rc<RefCell<SimState>>);
pub struct SimDir(Rc<RefCell<SimState>>);

impl ErrorType for SimTx {
    type Error = SimIoError;
}

impl Write for SimTx {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.borrow_mut().pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        let mut st = self.0.borrow_mut();
        let pkt = std::mem::take(&mut st.pending);
        if !pkt.is_empty() {
            st.handle(pkt);
        }
        Ok(())
    }
}

impl ErrorType for SimRx {
    type Error = SimIoError;
}

impl Read for SimRx {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut st = self.0.borrow_mut();
        if st.rx.is_empty() {
            return Err(SimIoError::TimedOut);
        }
        let n = buf.len().min(st.rx.len());
        for b in buf.iter_mut().take(n) {
            *b = st.rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl BusRx for SimRx {
    async fn clear(&mut self) {
        self.0.borrow_mut().rx.clear();
    }
}

impl OutputPin for SimDir {
    type Error = core::convert::Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().transmitting = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut st = self.0.borrow_mut();
        st.transmitting = true;
        st.toggles += 1;
        Ok(())
    }
}

/// Clock that only moves when something waits on it.
pub struct SimClock(Rc<RefCell<SimState>>);

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.0.borrow().now
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().now += ms as u64;
    }
}

pub type SimDriver = ServoDriver<SimTx, SimRx, SimDir, SimClock>;

pub fn sim_driver(sim: &SimBus) -> SimDriver {
    ServoDriver::with_linear(sim.bus(), sim.clock(), sim.config())
}

/* ------------------------------------------------------------------------- */
/*  Flash                                                                    */
/* ------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamError {
    OutOfBounds,
}

/// `N` bytes of erased (0xFF) storage.
pub struct RamStore<const N: usize> {
    pub data: [u8; N],
    pub writes: usize,
}

impl<const N: usize> RamStore<N> {
    pub fn new() -> Self {
        Self {
            data: [0xFF; N],
            writes: 0,
        }
    }
}

impl<const N: usize> ReadStorage for RamStore<N> {
    type Error = RamError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let at = offset as usize;
        let src = self.data.get(at..at + bytes.len()).ok_or(RamError::OutOfBounds)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Storage for RamStore<N> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let at = offset as usize;
        let dst = self.data.get_mut(at..at + bytes.len()).ok_or(RamError::OutOfBounds)?;
        dst.copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}

/* ------------------------------------------------------------------------- */
/*  Host link                                                                */
/* ------------------------------------------------------------------------- */

#[derive(Default)]
struct HostState {
    input: VecDeque<u8>,
    output: Vec<u8>,
    hold_polls: usize,
}

/// PC side of the programming link.
#[derive(Clone, Default)]
pub struct MockHost {
    state: Rc<RefCell<HostState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self) -> HostLink {
        HostLink(self.state.clone())
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.state.borrow_mut().input.extend(bytes.iter().copied());
    }

    /// Pretend nothing is waiting for the next `polls` readiness checks.
    pub fn hold_input(&self, polls: usize) {
        self.state.borrow_mut().hold_polls = polls;
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().output)
    }

    pub fn pending_input(&self) -> usize {
        self.state.borrow().input.len()
    }
}

pub struct HostLink(Rc<RefCell<HostState>>);

impl ErrorType for HostLink {
    type Error = core::convert::Infallible;
}

impl Read for HostLink {
    /// Returns 0 once the fed input is used up.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut st = self.0.borrow_mut();
        let n = buf.len().min(st.input.len());
        for b in buf.iter_mut().take(n) {
            *b = st.input.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl ReadReady for HostLink {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        let mut st = self.0.borrow_mut();
        if st.hold_polls > 0 {
            st.hold_polls -= 1;
            return Ok(false);
        }
        Ok(!st.input.is_empty())
    }
}

impl Write for HostLink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.borrow_mut().output.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Records every pin change the self test makes.
#[derive(Clone, Default)]
pub struct PinLog {
    pub events: Rc<RefCell<Vec<(u8, bool)>>>,
}

impl SelfTestIo for PinLog {
    fn set_pin(&mut self, pin: u8, high: bool) {
        self.events.borrow_mut().push((pin, high));
    }
}
