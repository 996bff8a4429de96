use std::panic;
use std::sync::Arc;
use std::thread;

use log::{error, info};

use crate::mesi::*;

/// How one core's run ended.
#[derive(Debug)]
pub struct CoreOutcome {
    pub id: CoreId,
    pub result: Result<CoreStats, SimError>,
}

#[derive(Debug)]
pub struct SimResult {
    pub cores: Vec<CoreOutcome>,
    pub bus: Vec<BusTransaction>,
    pub memory: Vec<u8>,
}

impl SimResult {
    pub fn failed(&self) -> impl Iterator<Item = &CoreOutcome> {
        self.cores.iter().filter(|c| c.result.is_err())
    }
    pub fn is_ok(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Runs one thread per core, all sharing one bus and one memory.
///
/// `insts[i]` is the instruction stream of core `i`. Every completed access is
/// passed to `observer` from the thread of the core that made it.
pub fn simulate<F>(specs: SystemSpec, insts: Vec<Insts>, observer: F) -> Result<SimResult, SimError>
where
    F: Fn(CoreId, &Access) + Sync,
{
    specs.validate()?;
    if insts.len() != specs.num_cores {
        return Err(SimError::InvalidSpec(format!(
            "{} instruction streams for {} cores", insts.len(), specs.num_cores
        )));
    }

    let bus = Arc::new(Bus::new(specs.bus_capacity));
    let memory = Arc::new(SharedMemory::new(specs.memory_size));
    let observer = &observer;

    let cores = thread::scope(|s| -> Result<Vec<CoreOutcome>, SimError> {
        let handles = insts
            .into_iter()
            .enumerate()
            .map(|(id, insts)| {
                let mut proc = Processor::new(id, &specs, bus.clone(), memory.clone());
                thread::Builder::new()
                    .name(format!("core {id}"))
                    .spawn_scoped(s, move || {
                        let result = proc.run(insts, |access| observer(id, access));
                        if let Err(e) = &result {
                            error!("core {id} stopped: {e}");
                        }
                        CoreOutcome { id, result }
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        // a panicking core is a protocol bug; let it take the simulation down
        Ok(handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|p| panic::resume_unwind(p)))
            .collect())
    })?;

    info!("simulation done, {} bus transactions", bus.len());
    Ok(SimResult {
        cores,
        bus: bus.snapshot(),
        memory: memory.snapshot(),
    })
}
