//! One index space over both providers: ROM sequences first, then the
//! flash chain.

use embedded_storage::Storage;

use super::rom::RomSet;
use super::store::SequenceStore;
use super::{SequenceInfo, SequenceSource};

pub struct SequenceLibrary<S> {
    rom: RomSet,
    store: SequenceStore<S>,
}

impl<S: Storage> SequenceLibrary<S> {
    pub fn new(rom: RomSet, store: SequenceStore<S>) -> Self {
        Self { rom, store }
    }

    pub fn rom_count(&self) -> u8 {
        self.rom.len() as u8
    }

    pub fn store(&mut self) -> &mut SequenceStore<S> {
        &mut self.store
    }

    pub fn is_defined(&mut self, index: u8) -> bool {
        self.lookup(index).is_some()
    }
}

impl<S: Storage> SequenceSource for SequenceLibrary<S> {
    fn lookup(&mut self, index: u8) -> Option<SequenceInfo> {
        let rom = self.rom_count();
        if index < rom {
            return self.rom.lookup(index);
        }
        let mut info = self.store.lookup(index - rom)?;
        info.index = index;
        Some(info)
    }

    fn load_step(&mut self, info: &SequenceInfo, step: u8, pose: &mut [u16]) -> Option<u16> {
        let rom = self.rom_count();
        if info.index < rom {
            return self.rom.load_step(info, step, pose);
        }
        let local = SequenceInfo {
            index: info.index - rom,
            ..*info
        };
        self.store.load_step(&local, step, pose)
    }
}
