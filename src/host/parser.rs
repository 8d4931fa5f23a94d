//! Byte-at-a-time framing for the programming link.
//!
//! `FF id len ins params.. chk`; the frame is good when id, length,
//! instruction, params and checksum add up to 255 (mod 256).

use crate::config::HOST_PARAMS_MAX;
use heapless::Vec;

// params plus the trailing checksum
const FRAME_DATA_MAX: usize = HOST_PARAMS_MAX + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    AwaitStart,
    ReadId,
    ReadLength,
    ReadInstruction,
    ReadParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u8,
    /// Instruction + params + checksum, as sent.
    pub length: u8,
    pub instruction: u8,
    data: Vec<u8, FRAME_DATA_MAX>,
}

impl Packet {
    /// Parameter bytes, checksum stripped.
    pub fn params(&self) -> &[u8] {
        &self.data[..self.data.len().saturating_sub(1)]
    }

    pub fn param(&self, i: usize) -> u8 {
        self.params().get(i).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Packet(Packet),
    BadChecksum { id: u8 },
}

pub struct PacketParser {
    mode: Mode,
    id: u8,
    length: u8,
    instruction: u8,
    sum: u8,
    data: Vec<u8, FRAME_DATA_MAX>,
}

impl Default for PacketParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketParser {
    pub const fn new() -> Self {
        Self {
            mode: Mode::AwaitStart,
            id: 0,
            length: 0,
            instruction: 0,
            sum: 0,
            data: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.mode = Mode::AwaitStart;
    }

    pub fn push(&mut self, b: u8) -> Option<Parsed> {
        match self.mode {
            Mode::AwaitStart => {
                if b == 0xFF {
                    self.mode = Mode::ReadId;
                }
            }
            Mode::ReadId => {
                // any number of 0xFF may precede the id
                if b != 0xFF {
                    self.id = b;
                    self.mode = Mode::ReadLength;
                }
            }
            Mode::ReadLength => {
                if b < 2 {
                    // no room for instruction and checksum
                    self.mode = Mode::AwaitStart;
                } else {
                    self.length = b;
                    self.sum = self.id.wrapping_add(b);
                    self.mode = Mode::ReadInstruction;
                }
            }
            Mode::ReadInstruction => {
                self.instruction = b;
                self.sum = self.sum.wrapping_add(b);
                self.data.clear();
                self.mode = Mode::ReadParams;
            }
            Mode::ReadParams => {
                if self.data.push(b).is_err() {
                    warn!("host frame with more than {} params dropped", HOST_PARAMS_MAX);
                    self.mode = Mode::AwaitStart;
                    return None;
                }
                self.sum = self.sum.wrapping_add(b);
                if self.data.len() + 1 == self.length as usize {
                    self.mode = Mode::AwaitStart;
                    if self.sum != 0xFF {
                        return Some(Parsed::BadChecksum { id: self.id });
                    }
                    return Some(Parsed::Packet(Packet {
                        id: self.id,
                        length: self.length,
                        instruction: self.instruction,
                        data: self.data.clone(),
                    }));
                }
            }
        }
        None
    }
}

/// Build a host frame with its checksum, the way the PC tool sends them.
#[cfg(test)]
pub fn frame(id: u8, instruction: u8, params: &[u8]) -> std::vec::Vec<u8> {
    let mut f = std::vec![0xFF, 0xFF, id, params.len() as u8 + 2, instruction];
    f.extend_from_slice(params);
    let chk = crate::drivers::servo::protocol::checksum(&f[2..]);
    f.push(chk);
    f
}
