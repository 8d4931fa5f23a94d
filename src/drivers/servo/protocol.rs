// Dynamixel AX-12 (protocol 1.0) constants, register list and frame builders.

/* ───── Packet anatomy ──────────────────────────────────────────────── */
pub const HDR_BYTE: u8 = 0xFF; // sync byte
pub const HEADER: [u8; 2] = [HDR_BYTE, HDR_BYTE];

/// Indexes within every transmitted / received frame
pub mod idx {
    pub const ID: usize = 2; // servo ID
    pub const LENGTH: usize = 3; // bytes after this field incl. ERR/INST
    pub const INSTRUCTION: usize = 4; // only in tx packet
    pub const ERROR: usize = 4; // only in status packet
    pub const PARAM_0: usize = 5; // first parameter / data byte
}

pub const TXPACKET_MAX_LEN: usize = 250;
pub const RXPACKET_MAX_LEN: usize = 32;

/* ────────────────── Basic IDs ─────────────────── */
pub const BROADCAST_ID: u8 = 0xFE; // 254
pub const HOST_ID: u8 = 0xFD; // 253, reserved for the programming host
pub const MAX_ID: u8 = 0xFC; // 252

/* ────────────────── Instructions ──────────────── */
pub const INST_PING: u8 = 1;
pub const INST_READ: u8 = 2;
pub const INST_WRITE: u8 = 3;
pub const INST_REG_WRITE: u8 = 4;
pub const INST_ACTION: u8 = 5;
pub const INST_RESET: u8 = 6;
pub const INST_SYNC_WRITE: u8 = 0x83;

/* ────────────────── Error bits in status packet ─ */
pub const ERRBIT_VOLTAGE: u8 = 1 << 0;
pub const ERRBIT_ANGLE: u8 = 1 << 1;
pub const ERRBIT_OVERHEAT: u8 = 1 << 2;
pub const ERRBIT_RANGE: u8 = 1 << 3;
pub const ERRBIT_CHECKSUM: u8 = 1 << 4;
pub const ERRBIT_OVERLOAD: u8 = 1 << 5;
pub const ERRBIT_INSTRUCTION: u8 = 1 << 6;

/* ────────────────── Register addresses ────────── */
/* EEPROM */
pub const REG_MODEL_L: u8 = 0;
pub const REG_VERSION: u8 = 2;
pub const REG_ID: u8 = 3;
pub const REG_BAUD_RATE: u8 = 4;
pub const REG_RETURN_DELAY_TIME: u8 = 5;
pub const REG_CW_ANGLE_LIMIT_L: u8 = 6;
pub const REG_CCW_ANGLE_LIMIT_L: u8 = 8;
pub const REG_LIMIT_TEMPERATURE: u8 = 11;
pub const REG_DOWN_LIMIT_VOLTAGE: u8 = 12;
pub const REG_UP_LIMIT_VOLTAGE: u8 = 13;
pub const REG_MAX_TORQUE_L: u8 = 14;
pub const REG_STATUS_RETURN_LEVEL: u8 = 16;
pub const REG_ALARM_LED: u8 = 17;
pub const REG_ALARM_SHUTDOWN: u8 = 18;
/* RAM */
pub const REG_TORQUE_ENABLE: u8 = 24;
pub const REG_LED: u8 = 25;
pub const REG_CW_COMPLIANCE_MARGIN: u8 = 26;
pub const REG_CCW_COMPLIANCE_MARGIN: u8 = 27;
pub const REG_CW_COMPLIANCE_SLOPE: u8 = 28;
pub const REG_CCW_COMPLIANCE_SLOPE: u8 = 29;
pub const REG_GOAL_POSITION_L: u8 = 30;
pub const REG_GOAL_POSITION_H: u8 = 31;
pub const REG_GOAL_SPEED_L: u8 = 32;
pub const REG_GOAL_SPEED_H: u8 = 33;
pub const REG_TORQUE_LIMIT_L: u8 = 34;
pub const REG_PRESENT_POSITION_L: u8 = 36;
pub const REG_PRESENT_POSITION_H: u8 = 37;
pub const REG_PRESENT_SPEED_L: u8 = 38;
pub const REG_PRESENT_LOAD_L: u8 = 40;
pub const REG_PRESENT_VOLTAGE: u8 = 42;
pub const REG_PRESENT_TEMPERATURE: u8 = 43;
pub const REG_REGISTERED: u8 = 44;
pub const REG_MOVING: u8 = 46;
pub const REG_LOCK: u8 = 47;
pub const REG_PUNCH_L: u8 = 48;

/* ────────────────── Frame helpers ─────────────── */

/// `0xFF - (sum mod 256)` over everything after the two header bytes.
#[inline]
pub fn checksum(body: &[u8]) -> u8 {
    !body.iter().fold(0u8, |a, &b| a.wrapping_add(b))
}

#[inline]
pub fn lo_byte(w: u16) -> u8 {
    w as u8
}
#[inline]
pub fn hi_byte(w: u16) -> u8 {
    (w >> 8) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    Overflow,
}

/// One instruction packet, `FF FF id len ins params.. chk`.
pub struct Frame {
    buf: [u8; TXPACKET_MAX_LEN],
    len: usize,
}

impl Frame {
    pub fn new(id: u8, instruction: u8) -> Self {
        let mut buf = [0u8; TXPACKET_MAX_LEN];
        buf[..2].copy_from_slice(&HEADER);
        buf[idx::ID] = id;
        buf[idx::INSTRUCTION] = instruction;
        Self {
            buf,
            len: idx::PARAM_0,
        }
    }

    pub fn param(&mut self, b: u8) -> Result<&mut Self, FrameError> {
        // leave room for the checksum
        if self.len + 1 >= TXPACKET_MAX_LEN {
            return Err(FrameError::Overflow);
        }
        self.buf[self.len] = b;
        self.len += 1;
        Ok(self)
    }

    pub fn params(&mut self, bytes: &[u8]) -> Result<&mut Self, FrameError> {
        for &b in bytes {
            self.param(b)?;
        }
        Ok(self)
    }

    /// Fill in length and checksum; returns the wire bytes.
    pub fn finish(&mut self) -> &[u8] {
        self.buf[idx::LENGTH] = (self.len - idx::INSTRUCTION + 1) as u8;
        self.buf[self.len] = checksum(&self.buf[idx::ID..self.len]);
        &self.buf[..self.len + 1]
    }

    pub fn ping(id: u8) -> Self {
        Self::new(id, INST_PING)
    }

    pub fn read(id: u8, addr: u8, len: u8) -> Self {
        let mut f = Self::new(id, INST_READ);
        f.buf[idx::PARAM_0] = addr;
        f.buf[idx::PARAM_0 + 1] = len;
        f.len += 2;
        f
    }

    pub fn write(id: u8, addr: u8, data: &[u8]) -> Result<Self, FrameError> {
        let mut f = Self::new(id, INST_WRITE);
        f.param(addr)?.params(data)?;
        Ok(f)
    }
}

/// Broadcast synchronized write: one frame, `data_len` bytes per servo starting at `start`.
pub struct SyncWrite {
    frame: Frame,
    data_len: u8,
    count: usize,
}

impl SyncWrite {
    pub fn new(start: u8, data_len: u8) -> Self {
        let mut frame = Frame::new(BROADCAST_ID, INST_SYNC_WRITE);
        frame.buf[idx::PARAM_0] = start;
        frame.buf[idx::PARAM_0 + 1] = data_len;
        frame.len += 2;
        Self {
            frame,
            data_len,
            count: 0,
        }
    }

    /// Goal position + moving speed, 4 bytes per servo.
    pub fn positions_and_speeds() -> Self {
        Self::new(REG_GOAL_POSITION_L, 4)
    }

    /// Goal position only, 2 bytes per servo.
    pub fn positions() -> Self {
        Self::new(REG_GOAL_POSITION_L, 2)
    }

    pub fn push(&mut self, id: u8, data: &[u8]) -> Result<(), FrameError> {
        if data.len() != self.data_len as usize || id > MAX_ID {
            return Err(FrameError::Overflow);
        }
        if self.frame.len + 1 + data.len() >= TXPACKET_MAX_LEN {
            return Err(FrameError::Overflow);
        }
        self.frame.param(id)?.params(data)?;
        self.count += 1;
        Ok(())
    }

    pub fn push_position(&mut self, id: u8, pos: u16) -> Result<(), FrameError> {
        self.push(id, &[lo_byte(pos), hi_byte(pos)])
    }

    pub fn push_position_speed(&mut self, id: u8, pos: u16, speed: u16) -> Result<(), FrameError> {
        self.push(id, &[lo_byte(pos), hi_byte(pos), lo_byte(speed), hi_byte(speed)])
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(&mut self) -> &[u8] {
        self.frame.finish()
    }
}

/// Validated status packet, `FF FF id len err data.. chk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status<'a> {
    pub id: u8,
    pub error: u8,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusError {
    BadFormat,
    BadChecksum,
}

pub fn parse_status(pkt: &[u8]) -> Result<Status<'_>, StatusError> {
    if pkt.len() < 6 || pkt[..2] != HEADER {
        return Err(StatusError::BadFormat);
    }
    let len = pkt[idx::LENGTH] as usize;
    if len < 2 || pkt.len() != len + 4 {
        return Err(StatusError::BadFormat);
    }
    let last = pkt.len() - 1;
    if checksum(&pkt[idx::ID..last]) != pkt[last] {
        return Err(StatusError::BadChecksum);
    }
    Ok(Status {
        id: pkt[idx::ID],
        error: pkt[idx::ERROR],
        data: &pkt[idx::PARAM_0..last],
    })
}

/// Bare status reply (no data), built in `out`.
pub fn status_reply(id: u8, error: u8, out: &mut [u8; 6]) -> &[u8] {
    *out = [HDR_BYTE, HDR_BYTE, id, 2, error, 0];
    out[5] = checksum(&out[idx::ID..5]);
    &out[..]
}
