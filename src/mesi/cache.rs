use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, trace};

use super::bus::Bus;
use super::common::*;
use super::error::SimError;
use super::memory::SharedMemory;

// data cache

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineState {
    #[default]
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LineState::Invalid => "I",
            LineState::Shared => "S",
            LineState::Exclusive => "E",
            LineState::Modified => "M",
        };
        write!(f, "{s}")
    }
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheLine {
    pub addr: Addr,
    pub value: u8,
    pub state: LineState,
}

impl CacheLine {
    /// valid copy of exactly `addr`
    pub fn hit(&self, addr: Addr) -> bool {
        self.addr == addr && self.state != LineState::Invalid
    }
}

impl fmt::Display for CacheLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address: {}, State: {}, Value: {}", self.addr, self.state, self.value)
    }
}

// cache

/// Private direct-mapped cache of one core, and the protocol engine driving it.
///
/// The cache is never shared: other cores influence it only through the bus
/// transactions it observes in `snoop_since`.
pub struct Cache {
    pub id: CoreId,
    lines: Vec<CacheLine>,
    bus_appends: usize,
    flushes: usize,
}

impl Cache {
    pub fn new(id: CoreId, size: usize) -> Self {
        assert!(size > 0, "cache must have at least one line");
        // line i starts out mapped to address i, all invalid
        let lines = (0..size)
            .map(|i| CacheLine { addr: Addr(i), ..Default::default() })
            .collect();
        Self { id, lines, bus_appends: 0, flushes: 0 }
    }

    pub fn slot_of(&self, addr: Addr) -> usize {
        addr.index(self.lines.len())
    }

    pub fn line(&self, slot: usize) -> &CacheLine {
        &self.lines[slot]
    }

    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }

    /// the line `addr` maps to
    pub fn line_for(&self, addr: Addr) -> &CacheLine {
        &self.lines[self.slot_of(addr)]
    }

    pub fn bus_appends(&self) -> usize {
        self.bus_appends
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// one line per cache line, in slot order
    pub fn dump(&self) -> String {
        self.lines.iter().map(|l| format!("{l}\n")).collect()
    }

    // helper functions

    fn announce(&mut self, bus: &Bus, tx: BusTransaction) -> Result<usize, SimError> {
        let index = bus.append(tx)?;
        self.bus_appends += 1;
        Ok(index)
    }

    fn fill_from_memory(&mut self, slot: usize, addr: Addr, memory: &SharedMemory) -> Result<(), SimError> {
        let value = memory.fetch(addr)?;
        self.lines[slot] = CacheLine { addr, value, state: LineState::Exclusive };
        Ok(())
    }

    // protocol

    /// Applies one observed bus transaction to this cache.
    fn snoop_one(&mut self, tx: BusTransaction, bus: &Bus) -> Result<(), SimError> {
        let own = tx.origin() == Some(self.id);
        let slot = self.slot_of(tx.addr());
        let line = self.lines[slot];
        match tx {
            BusTransaction::Request { addr, from } if !own => {
                if line.state == LineState::Modified && line.addr == addr {
                    // supply the data; the line keeps its MODIFIED state
                    trace!("core {}: supplying {} = {} to core {from}", self.id, addr, line.value);
                    self.announce(bus, BusTransaction::Value { addr, value: line.value })?;
                }
            },
            BusTransaction::Invalidate { addr, from } if line.addr == addr => {
                // an echo of our own invalidate re-asserts ownership
                let state = if from == self.id { LineState::Modified } else { LineState::Invalid };
                trace!("core {}: {} {} -> {}", self.id, addr, line.state, state);
                self.lines[slot].state = state;
            },
            _ => (),
        }
        Ok(())
    }

    /// Processes every bus transaction from index `from` on and returns the index
    /// one past the last one examined.
    ///
    /// The bus length is re-read on every step, so transactions appended while the
    /// scan runs (including the VALUE answers this very scan produces) are examined
    /// before it returns.
    pub fn snoop_since(&mut self, from: usize, bus: &Bus) -> Result<usize, SimError> {
        let mut i = from;
        while let Some(tx) = bus.get(i) {
            i += 1;
            self.snoop_one(tx, bus)?;
        }
        Ok(i)
    }

    /// Writes the line in `slot` back to memory if it is MODIFIED, announcing the
    /// write-back with a FLUSHED. Returns whether anything was flushed.
    pub fn evict_and_flush(&mut self, slot: usize, memory: &SharedMemory, bus: &Bus) -> Result<bool, SimError> {
        let line = self.lines[slot];
        if line.state != LineState::Modified {
            return Ok(false);
        }
        debug!("core {}: flushing {} = {}", self.id, line.addr, line.value);
        memory.store(line.addr, line.value)?;
        self.lines[slot].state = LineState::Invalid;
        self.flushes += 1;
        self.announce(bus, BusTransaction::Flushed { addr: line.addr, from: self.id })?;
        Ok(true)
    }

    /// Fills `slot` with `addr`, either straight from memory (EXCLUSIVE) or, if another
    /// core may hold a newer copy, by asking for it on the bus and waiting.
    ///
    /// `cursor` is the core's snoop index; it advances while the core waits.
    pub fn read_miss(
        &mut self,
        slot: usize,
        addr: Addr,
        cursor: &mut usize,
        bus: &Bus,
        memory: &SharedMemory,
        timeout: Duration,
    ) -> Result<(), SimError> {
        match bus.request_unless_flushed(addr, self.id)? {
            None => {
                debug!("core {}: read miss on {addr}, filling from memory", self.id);
                self.fill_from_memory(slot, addr, memory)
            },
            Some(request) => {
                debug!("core {}: read miss on {addr}, requested at bus[{request}]", self.id);
                self.bus_appends += 1;
                self.lines[slot] = CacheLine { addr, value: 0, state: LineState::Invalid };
                self.await_fill(slot, addr, request + 1, cursor, bus, memory, timeout)
            },
        }
    }

    /// Blocks until a VALUE (-> SHARED, supplied value) or a FLUSHED (-> EXCLUSIVE,
    /// value from memory) for `addr` shows up on the bus at or after index `from`.
    ///
    /// While waiting the core keeps snooping in bus order from `cursor`, so it still
    /// answers requests for lines it holds MODIFIED. The qualifying entry is consumed
    /// and `cursor` ends up just past it. Fails with `Timeout` if nothing qualifying
    /// shows up within `timeout`.
    #[allow(clippy::too_many_arguments)]
    pub fn await_fill(
        &mut self,
        slot: usize,
        addr: Addr,
        from: usize,
        cursor: &mut usize,
        bus: &Bus,
        memory: &SharedMemory,
        timeout: Duration,
    ) -> Result<(), SimError> {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some(tx) = bus.get(*cursor) {
                let index = *cursor;
                *cursor += 1;
                if index >= from {
                    match tx {
                        BusTransaction::Value { addr: a, value } if a == addr => {
                            debug!("core {}: {addr} supplied by a peer: {value}", self.id);
                            self.lines[slot] = CacheLine { addr, value, state: LineState::Shared };
                            return Ok(());
                        },
                        BusTransaction::Flushed { addr: a, .. } if a == addr => {
                            debug!("core {}: {addr} flushed by its owner", self.id);
                            return self.fill_from_memory(slot, addr, memory);
                        },
                        _ => (),
                    }
                }
                self.snoop_one(tx, bus)?;
            }
            if !bus.wait_for_append(*cursor, deadline)? {
                return Err(SimError::Timeout { core: self.id, addr, waited: timeout });
            }
        }
    }

    /// Overwrites `slot` with `addr = value` as MODIFIED and tells every other holder
    /// to drop its copy.
    pub fn write_miss(&mut self, slot: usize, addr: Addr, value: u8, bus: &Bus) -> Result<(), SimError> {
        debug!("core {}: write miss on {addr}", self.id);
        self.lines[slot] = CacheLine { addr, value, state: LineState::Modified };
        self.announce(bus, BusTransaction::Invalidate { addr, from: self.id })?;
        Ok(())
    }

    pub fn write_hit(&mut self, slot: usize, value: u8, bus: &Bus) -> Result<(), SimError> {
        let CacheLine { addr, state, .. } = self.lines[slot];
        debug_assert!(state != LineState::Invalid, "write hit on an invalid line (core {}, address {addr})", self.id);
        self.lines[slot] = CacheLine { addr, value, state: LineState::Modified };
        if state == LineState::Shared {
            // other sharers must drop their copies; E and M have none
            self.announce(bus, BusTransaction::Invalidate { addr, from: self.id })?;
        }
        Ok(())
    }

    /// Flushes every MODIFIED line. Returns the number of lines written back.
    pub fn flush_all(&mut self, memory: &SharedMemory, bus: &Bus) -> Result<usize, SimError> {
        let mut n = 0;
        for slot in 0..self.lines.len() {
            if self.evict_and_flush(slot, memory, bus)? {
                n += 1;
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Cache, Bus, SharedMemory) {
        (Cache::new(0, 2), Bus::new(64), SharedMemory::new(24))
    }

    #[test]
    fn new_cache_is_invalid() {
        let (cache, _, _) = setup();
        assert!(cache.lines().iter().all(|l| l.state == LineState::Invalid));
        assert!(!cache.line_for(Addr(0)).hit(Addr(0)));
    }

    #[test]
    fn read_miss_without_owner_is_exclusive() {
        let (mut cache, bus, mem) = setup();
        mem.store(Addr(4), 11).unwrap();
        cache.read_miss(0, Addr(4), &mut 0, &bus, &mem, Duration::from_millis(10)).unwrap();
        assert_eq!(*cache.line(0), CacheLine { addr: Addr(4), value: 11, state: LineState::Exclusive });
        assert!(bus.is_empty());
    }

    #[test]
    fn read_miss_after_flush_reads_memory() {
        let (mut cache, bus, mem) = setup();
        mem.store(Addr(4), 11).unwrap();
        bus.append(BusTransaction::Invalidate { addr: Addr(4), from: 1 }).unwrap();
        bus.append(BusTransaction::Flushed { addr: Addr(4), from: 1 }).unwrap();
        cache.read_miss(0, Addr(4), &mut 0, &bus, &mem, Duration::from_millis(10)).unwrap();
        assert_eq!(cache.line(0).state, LineState::Exclusive);
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn read_miss_times_out_without_answer() {
        let (mut cache, bus, mem) = setup();
        bus.append(BusTransaction::Invalidate { addr: Addr(4), from: 1 }).unwrap();
        let err = cache.read_miss(0, Addr(4), &mut 0, &bus, &mem, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, SimError::Timeout { core: 0, addr: Addr(4), .. }));
        assert_eq!(bus.get(1), Some(BusTransaction::Request { addr: Addr(4), from: 0 }));
    }

    #[test]
    fn write_hit_transitions() {
        let (mut cache, bus, mem) = setup();
        cache.read_miss(1, Addr(3), &mut 0, &bus, &mem, Duration::from_millis(10)).unwrap();
        cache.write_hit(1, 5, &bus).unwrap();
        // E -> M is silent
        assert_eq!(cache.line(1).state, LineState::Modified);
        assert!(bus.is_empty());
        cache.write_hit(1, 6, &bus).unwrap();
        assert_eq!(cache.line(1).value, 6);
        assert!(bus.is_empty());
    }

    #[test]
    fn shared_write_hit_invalidates() {
        let (mut cache, bus, mem) = setup();
        bus.append(BusTransaction::Value { addr: Addr(1), value: 2 }).unwrap();
        let mut cursor = 0;
        cache.await_fill(1, Addr(1), 0, &mut cursor, &bus, &mem, Duration::from_millis(10)).unwrap();
        assert_eq!(cursor, 1);
        assert_eq!(cache.line(1).state, LineState::Shared);
        cache.write_hit(1, 3, &bus).unwrap();
        assert_eq!(cache.line(1).state, LineState::Modified);
        assert_eq!(bus.get(1), Some(BusTransaction::Invalidate { addr: Addr(1), from: 0 }));
    }

    #[test]
    fn snoop_answers_request_for_modified_line() {
        let (mut cache, bus, _) = setup();
        cache.write_miss(1, Addr(5), 9, &bus).unwrap();
        bus.append(BusTransaction::Request { addr: Addr(5), from: 1 }).unwrap();
        let next = cache.snoop_since(0, &bus).unwrap();
        assert_eq!(bus.get(2), Some(BusTransaction::Value { addr: Addr(5), value: 9 }));
        // the VALUE produced during the scan is part of it
        assert_eq!(next, 3);
        assert_eq!(cache.line(1).state, LineState::Modified);
    }

    #[test]
    fn snoop_ignores_own_request_and_other_addresses() {
        let (mut cache, bus, _) = setup();
        cache.write_miss(1, Addr(5), 9, &bus).unwrap();
        bus.append(BusTransaction::Request { addr: Addr(5), from: 0 }).unwrap();
        bus.append(BusTransaction::Invalidate { addr: Addr(7), from: 1 }).unwrap();
        assert_eq!(cache.snoop_since(0, &bus).unwrap(), 3);
        assert_eq!(bus.len(), 3);
        assert_eq!(cache.line(1).state, LineState::Modified);
    }

    #[test]
    fn snoop_invalidates_and_reasserts() {
        let (mut cache, bus, _) = setup();
        cache.write_miss(1, Addr(5), 9, &bus).unwrap();
        bus.append(BusTransaction::Invalidate { addr: Addr(5), from: 1 }).unwrap();
        // own invalidate first, then the peer's
        assert_eq!(cache.snoop_since(0, &bus).unwrap(), 2);
        assert_eq!(cache.line(1).state, LineState::Invalid);

        bus.append(BusTransaction::Invalidate { addr: Addr(5), from: 0 }).unwrap();
        cache.snoop_since(2, &bus).unwrap();
        assert_eq!(cache.line(1).state, LineState::Modified);
    }

    #[test]
    fn evict_flushes_modified_only() {
        let (mut cache, bus, mem) = setup();
        assert!(!cache.evict_and_flush(0, &mem, &bus).unwrap());
        cache.write_miss(0, Addr(0), 4, &bus).unwrap();
        assert!(cache.evict_and_flush(0, &mem, &bus).unwrap());
        assert_eq!(mem.fetch(Addr(0)).unwrap(), 4);
        assert_eq!(bus.get(1), Some(BusTransaction::Flushed { addr: Addr(0), from: 0 }));
        assert_eq!(cache.flushes(), 1);
        assert_eq!(cache.bus_appends(), 2);
    }

    #[test]
    fn dump_lists_every_line() {
        let (cache, _, _) = setup();
        assert_eq!(cache.dump(), "Address: 0, State: I, Value: 0\nAddress: 1, State: I, Value: 0\n");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "write hit on an invalid line")]
    fn write_hit_on_invalid_line_panics() {
        let (mut cache, bus, _) = setup();
        let _ = cache.write_hit(0, 1, &bus);
    }
}
