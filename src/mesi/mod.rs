mod processor;
mod cache;
mod bus;
mod common;
mod error;
mod memory;

pub use processor::{Processor, ProcState, CoreStats};
pub use cache::{Cache, CacheLine, LineState};
pub use bus::Bus;
pub use memory::SharedMemory;
pub use error::SimError;
pub use common::*;
