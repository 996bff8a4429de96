use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::bus::Bus;
use super::cache::Cache;
use super::common::*;
use super::error::SimError;
use super::memory::SharedMemory;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcState {
    #[default]
    Running,
    Finished,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoreStats {
    pub loads: usize,
    pub stores: usize,
    pub hits: usize,
    pub misses: usize,
    pub flushes: usize,
    pub bus_appends: usize,
    pub skipped: usize,
}

/// One core: executes its own instruction stream in order against its private
/// cache, catching up on the bus before every operation.
pub struct Processor {
    pub id: CoreId,
    pub state: ProcState,
    cache: Cache,
    last_seen: usize,
    bus: Arc<Bus>,
    memory: Arc<SharedMemory>,
    fill_timeout: Duration,
    bus_capacity: usize,
    stats: CoreStats,
}

impl Processor {
    pub fn new(id: CoreId, specs: &SystemSpec, bus: Arc<Bus>, memory: Arc<SharedMemory>) -> Self {
        Processor {
            id,
            state: ProcState::Running,
            cache: Cache::new(id, specs.cache_size),
            last_seen: 0,
            bus,
            memory,
            fill_timeout: specs.fill_timeout,
            bus_capacity: specs.bus_capacity,
            stats: CoreStats::default(),
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// index of the first bus transaction this core has not looked at yet
    pub fn last_seen(&self) -> usize {
        self.last_seen
    }

    pub fn stats(&self) -> CoreStats {
        CoreStats {
            flushes: self.cache.flushes(),
            bus_appends: self.cache.bus_appends(),
            ..self.stats
        }
    }

    /// Absorbs all bus activity since the last call.
    pub fn snoop(&mut self) -> Result<(), SimError> {
        let next = self.cache.snoop_since(self.last_seen, &self.bus)?;
        debug_assert!(next >= self.last_seen, "snoop index moved backwards");
        self.last_seen = next;
        Ok(())
    }

    /// Executes one load or store and returns what the target line holds afterwards.
    ///
    /// An address outside of memory is rejected before anything else happens, so the
    /// operation is a no-op.
    pub fn step(&mut self, instr: Instr) -> Result<Access, SimError> {
        debug_assert!(self.state == ProcState::Running, "core {} is already finished", self.id);
        // an overflowed bus ends the whole simulation, not just the core that hit it
        if self.bus.is_overflowed() {
            return Err(SimError::BusOverflow { capacity: self.bus_capacity });
        }
        let addr = instr.addr();
        self.memory.check(addr)?;
        self.snoop()?;

        let slot = self.cache.slot_of(addr);
        let hit = self.cache.line(slot).hit(addr);
        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }

        match instr {
            Instr::Read(_) => {
                self.stats.loads += 1;
                if !hit {
                    self.cache.evict_and_flush(slot, &self.memory, &self.bus)?;
                    self.cache.read_miss(slot, addr, &mut self.last_seen, &self.bus, &self.memory, self.fill_timeout)?;
                }
            },
            Instr::Write(_, value) => {
                self.stats.stores += 1;
                if hit {
                    self.cache.write_hit(slot, value, &self.bus)?;
                } else {
                    self.cache.evict_and_flush(slot, &self.memory, &self.bus)?;
                    self.cache.write_miss(slot, addr, value, &self.bus)?;
                }
            },
        }

        let line = self.cache.line(slot);
        debug!("core {}: {:?} -> {}", self.id, instr, line);
        Ok(match instr {
            Instr::Read(_) => Access::Read { addr: line.addr, value: line.value },
            Instr::Write(..) => Access::Write { addr: line.addr, value: line.value },
        })
    }

    /// Ends the stream: answers what is pending on the bus, then writes back every
    /// MODIFIED line so no data is lost when the cache goes away.
    pub fn retire(&mut self) -> Result<(), SimError> {
        if self.state == ProcState::Finished {
            return Ok(());
        }
        self.snoop()?;
        let flushed = self.cache.flush_all(&self.memory, &self.bus)?;
        self.state = ProcState::Finished;
        debug!("core {} retired, wrote back {flushed} line(s):\n{}", self.id, self.cache.dump());
        let s = self.stats();
        info!(
            "core {}: {} loads, {} stores, {} hits, {} misses, {} flushes, {} bus transactions, {} skipped",
            self.id, s.loads, s.stores, s.hits, s.misses, s.flushes, s.bus_appends, s.skipped
        );
        Ok(())
    }

    /// Runs a whole instruction stream, handing every completed access to `observer`.
    ///
    /// Per-operation errors are logged and the operation skipped; anything fatal
    /// stops the core.
    pub fn run<F>(&mut self, insts: impl IntoIterator<Item = Instr>, mut observer: F) -> Result<CoreStats, SimError>
    where
        F: FnMut(&Access),
    {
        for instr in insts {
            match self.step(instr) {
                Ok(access) => observer(&access),
                Err(e) if !e.is_fatal() => {
                    warn!("core {}: skipping {:?}: {e}", self.id, instr);
                    self.stats.skipped += 1;
                },
                Err(e) => return Err(e),
            }
        }
        self.retire()?;
        Ok(self.stats())
    }
}
