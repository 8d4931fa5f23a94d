//! Byte-addressable non-volatile store adapter.
//!
//! Sequence data lives in a fixed window of a larger storage device (on the
//! robot, a read-modify-write view over the last flash pages). Offsets handed
//! to the window are relative to its start and bounds checked.

use embedded_storage::{ReadStorage, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WindowError<E> {
    OutOfBounds,
    Device(E),
}

pub struct StoreWindow<S> {
    inner: S,
    base: u32,
    size: usize,
}

impl<S: ReadStorage> StoreWindow<S> {
    /// `size` bytes of `inner` starting at `base`; clipped to the device.
    pub fn new(inner: S, base: u32, size: usize) -> Self {
        let avail = inner.capacity().saturating_sub(base as usize);
        Self {
            inner,
            base,
            size: size.min(avail),
        }
    }

    fn check(&self, offset: u32, len: usize) -> Result<u32, WindowError<S::Error>> {
        let end = offset as usize + len;
        if end > self.size {
            return Err(WindowError::OutOfBounds);
        }
        Ok(self.base + offset)
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ReadStorage> ReadStorage for StoreWindow<S> {
    type Error = WindowError<S::Error>;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let at = self.check(offset, bytes.len())?;
        self.inner.read(at, bytes).map_err(WindowError::Device)
    }

    fn capacity(&self) -> usize {
        self.size
    }
}

impl<S: Storage> Storage for StoreWindow<S> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let at = self.check(offset, bytes.len())?;
        self.inner.write(at, bytes).map_err(WindowError::Device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RamStore;

    #[test]
    fn window_offsets_and_bounds() {
        let mut w = StoreWindow::new(RamStore::<64>::new(), 16, 32);
        assert_eq!(w.capacity(), 32);
        w.write(0, &[1, 2, 3]).unwrap();
        w.write(30, &[9, 9]).unwrap();
        assert_eq!(w.write(31, &[9, 9]), Err(WindowError::OutOfBounds));

        let mut buf = [0u8; 3];
        w.read(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);

        let mut raw = w.into_inner();
        let mut b = [0u8; 1];
        raw.read(16, &mut b).unwrap();
        assert_eq!(b[0], 1);
    }

    #[test]
    fn window_is_clipped_to_device() {
        let w = StoreWindow::new(RamStore::<64>::new(), 48, 2048);
        assert_eq!(w.capacity(), 16);
    }
}
