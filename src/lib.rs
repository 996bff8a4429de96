//! A MESI cache coherence simulator: cores with private direct-mapped caches
//! sharing one memory over a snooped, append-only bus log.

pub mod mesi;
pub mod simulator;
pub mod utils;

pub use simulator::{simulate, CoreOutcome, SimResult};
