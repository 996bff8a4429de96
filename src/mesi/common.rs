use std::fmt;
use std::time::Duration;

use super::error::SimError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemSpec {             // unit         defaults
    pub num_cores: usize,           // cores        2
    pub memory_size: usize,         // bytes        24
    pub cache_size: usize,          // lines        2
    pub bus_capacity: usize,        // entries      1024
    pub fill_timeout: Duration,     //              5s
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            num_cores: 2,
            memory_size: 24,
            cache_size: 2,
            bus_capacity: 1024,
            fill_timeout: Duration::from_secs(5),
        }
    }
}

impl SystemSpec {
    pub fn validate(&self) -> Result<(), SimError> {
        let invalid = |what: &str| Err(SimError::InvalidSpec(format!("{what} must be at least 1")));
        if self.num_cores == 0 {
            return invalid("number of cores");
        }
        if self.memory_size == 0 {
            return invalid("memory size");
        }
        if self.cache_size == 0 {
            return invalid("cache size");
        }
        if self.bus_capacity == 0 {
            return invalid("bus capacity");
        }
        Ok(())
    }
}

pub type CoreId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Addr(pub usize);

impl Addr {
    /// cache slot of this address in a direct-mapped cache of `cache_size` lines
    pub fn index(&self, cache_size: usize) -> usize {
        self.0 % cache_size
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// instructions

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instr {
    Read(Addr),
    Write(Addr, u8),
}

impl Instr {
    pub fn addr(&self) -> Addr {
        match self {
            Instr::Read(addr) | Instr::Write(addr, _) => *addr,
        }
    }
}

pub type Insts = Vec<Instr>;

/// What a core observed for one operation, reported to the outside world.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read { addr: Addr, value: u8 },
    Write { addr: Addr, value: u8 },
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read { addr, value } => write!(f, "Reading from address {addr}: {value}"),
            Access::Write { addr, value } => write!(f, "Writing to address {addr}: {value}"),
        }
    }
}

// the transactions that can appear on the bus

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusTransaction {
    Request { addr: Addr, from: CoreId },
    Flushed { addr: Addr, from: CoreId },
    Invalidate { addr: Addr, from: CoreId },
    Value { addr: Addr, value: u8 },
}

impl BusTransaction {
    pub fn addr(&self) -> Addr {
        match self {
            BusTransaction::Request { addr, .. }
            | BusTransaction::Flushed { addr, .. }
            | BusTransaction::Invalidate { addr, .. }
            | BusTransaction::Value { addr, .. } => *addr,
        }
    }
    /// originating core, `None` for data responses
    pub fn origin(&self) -> Option<CoreId> {
        match self {
            BusTransaction::Request { from, .. }
            | BusTransaction::Flushed { from, .. }
            | BusTransaction::Invalidate { from, .. } => Some(*from),
            BusTransaction::Value { .. } => None,
        }
    }
}

impl fmt::Display for BusTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusTransaction::Request { addr, from } => write!(f, "REQUEST    addr={addr} from={from}"),
            BusTransaction::Flushed { addr, from } => write!(f, "FLUSHED    addr={addr} from={from}"),
            BusTransaction::Invalidate { addr, from } => write!(f, "INVALIDATE addr={addr} from={from}"),
            BusTransaction::Value { addr, value } => write!(f, "VALUE      addr={addr} value={value}"),
        }
    }
}
