use std::time::Instant;

use log::trace;
use parking_lot::{Condvar, Mutex};

use super::common::*;
use super::error::SimError;

// the bus is an append-only log of transactions shared by all cores. appends are
// serialized by one lock; readers take the same lock only for the duration of a
// single lookup, so a scan always re-checks the current length as it goes.

struct Log {
    entries: Vec<BusTransaction>,
    overflowed: bool,
}

pub struct Bus {
    log: Mutex<Log>,
    appended: Condvar,      // notified on every append and on overflow
    capacity: usize,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        Bus {
            log: Mutex::new(Log { entries: Vec::with_capacity(capacity), overflowed: false }),
            appended: Condvar::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.log.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// set once an append hit the capacity, never cleared
    pub fn is_overflowed(&self) -> bool {
        self.log.lock().overflowed
    }

    /// the transaction at `index`, if it has been appended already
    pub fn get(&self, index: usize) -> Option<BusTransaction> {
        self.log.lock().entries.get(index).copied()
    }

    pub fn snapshot(&self) -> Vec<BusTransaction> {
        self.log.lock().entries.clone()
    }

    // helper functions

    fn push(&self, log: &mut Log, tx: BusTransaction) -> Result<usize, SimError> {
        if log.overflowed || log.entries.len() >= self.capacity {
            log.overflowed = true;
            return Err(SimError::BusOverflow { capacity: self.capacity });
        }
        log.entries.push(tx);
        let index = log.entries.len() - 1;
        trace!("bus[{index}] {tx}");
        Ok(index)
    }

    // appends

    /// Appends `tx` and returns its index. Indices are unique and strictly increasing.
    pub fn append(&self, tx: BusTransaction) -> Result<usize, SimError> {
        let res = {
            let mut log = self.log.lock();
            self.push(&mut log, tx)
        };
        // waiters also need to hear about an overflow
        self.appended.notify_all();
        res
    }

    /// Announces a read miss of `addr` by core `from`, unless memory already holds the
    /// latest value.
    ///
    /// Looks for the most recent transaction on `addr` that is not a REQUEST. If there
    /// is none, or it is a FLUSHED, memory is authoritative and `None` is returned.
    /// Otherwise some core owns (or recently owned) the address, so a REQUEST is
    /// appended and its index returned. The lookup and the append happen under one
    /// lock, so a FLUSHED can never slip in between them unnoticed.
    pub fn request_unless_flushed(&self, addr: Addr, from: CoreId) -> Result<Option<usize>, SimError> {
        let res = {
            let mut log = self.log.lock();
            let latest = log.entries
                .iter()
                .rev()
                .find(|tx| tx.addr() == addr && !matches!(tx, BusTransaction::Request { .. }))
                .copied();
            match latest {
                None | Some(BusTransaction::Flushed { .. }) => return Ok(None),
                Some(_) => self.push(&mut log, BusTransaction::Request { addr, from }).map(Some),
            }
        };
        self.appended.notify_all();
        res
    }

    /// Blocks until the bus holds more than `seen` transactions.
    ///
    /// Returns `Ok(false)` if `deadline` passes first, and fails with `BusOverflow`
    /// once the bus has overflowed.
    pub fn wait_for_append(&self, seen: usize, deadline: Instant) -> Result<bool, SimError> {
        let mut log = self.log.lock();
        let mut timed_out = false;
        while log.entries.len() <= seen {
            if log.overflowed {
                return Err(SimError::BusOverflow { capacity: self.capacity });
            }
            if timed_out {
                return Ok(false);
            }
            timed_out = self.appended.wait_until(&mut log, deadline).timed_out();
        }
        Ok(true)
    }
}
