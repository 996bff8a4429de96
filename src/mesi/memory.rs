//! Shared backing memory, one byte per address.

use parking_lot::Mutex;

use super::common::Addr;
use super::error::SimError;

/// Backing store shared by all cores. Fills and flushes each hold the memory lock,
/// so a flush by one core and a fill by another never interleave.
pub struct SharedMemory {
    cells: Mutex<Vec<u8>>,
}

impl SharedMemory {
    /// Zero-initialized memory of `size` bytes.
    pub fn new(size: usize) -> Self {
        SharedMemory { cells: Mutex::new(vec![0; size]) }
    }

    pub fn size(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn check(&self, addr: Addr) -> Result<(), SimError> {
        let size = self.size();
        if addr.0 < size {
            Ok(())
        } else {
            Err(SimError::AddressOutOfRange { addr, size })
        }
    }

    /// Reads `addr` for a cache line fill.
    pub fn fetch(&self, addr: Addr) -> Result<u8, SimError> {
        let cells = self.cells.lock();
        cells
            .get(addr.0)
            .copied()
            .ok_or(SimError::AddressOutOfRange { addr, size: cells.len() })
    }

    /// Writes back a flushed cache line.
    pub fn store(&self, addr: Addr, value: u8) -> Result<(), SimError> {
        let mut cells = self.cells.lock();
        let size = cells.len();
        let cell = cells.get_mut(addr.0).ok_or(SimError::AddressOutOfRange { addr, size })?;
        *cell = value;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.lock().clone()
    }
}
