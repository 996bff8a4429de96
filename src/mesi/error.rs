use std::time::Duration;

use thiserror::Error;

use super::common::{Addr, CoreId};

#[derive(Debug, Error)]
pub enum SimError {
    /// the bus log ran out of slots; fatal to the whole simulation
    #[error("bus overflow: all {capacity} bus slots are used")]
    BusOverflow { capacity: usize },

    /// an input line that is neither a load nor a store
    #[error("malformed instruction on line {line}: {text:?}")]
    MalformedInstruction { line: usize, text: String },

    #[error("address {addr} is out of range for a memory of {size} bytes")]
    AddressOutOfRange { addr: Addr, size: usize },

    /// no VALUE or FLUSHED answer appeared for a requested address
    #[error("core {core} waited {waited:?} for a fill of address {addr}")]
    Timeout { core: CoreId, addr: Addr, waited: Duration },

    #[error("invalid system spec: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// whether the condition ends the core (or the whole run) rather than one operation
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SimError::MalformedInstruction { .. } | SimError::AddressOutOfRange { .. }
        )
    }
}
