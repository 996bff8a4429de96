use std::collections::HashMap;
use std::sync::Arc;

use cachesim_mesi::mesi::*;
use proptest::prelude::*;

fn instr() -> impl Strategy<Value = Instr> {
    prop_oneof![
        (0..12usize).prop_map(|a| Instr::Read(Addr(a))),
        (0..12usize, any::<u8>()).prop_map(|(a, v)| Instr::Write(Addr(a), v)),
    ]
}

fn single_core(cache_size: usize) -> (Processor, Arc<Bus>, Arc<SharedMemory>) {
    let specs = SystemSpec { num_cores: 1, memory_size: 12, cache_size, ..Default::default() };
    let bus = Arc::new(Bus::new(specs.bus_capacity));
    let memory = Arc::new(SharedMemory::new(specs.memory_size));
    (Processor::new(0, &specs, bus.clone(), memory.clone()), bus, memory)
}

proptest! {
    /// a lone core must behave exactly like plain memory
    #[test]
    fn single_core_behaves_like_memory(
        insts in prop::collection::vec(instr(), 1..64),
        cache_size in 1..5usize,
    ) {
        let (mut core, _, memory) = single_core(cache_size);
        let mut model: HashMap<Addr, u8> = HashMap::new();

        for inst in insts {
            let access = core.step(inst).unwrap();
            match inst {
                Instr::Read(addr) => {
                    let expected = model.get(&addr).copied().unwrap_or(0);
                    prop_assert_eq!(access, Access::Read { addr, value: expected });
                },
                Instr::Write(addr, value) => {
                    model.insert(addr, value);
                    prop_assert_eq!(access, Access::Write { addr, value });
                },
            }
        }

        core.retire().unwrap();
        let mem = memory.snapshot();
        for (addr, value) in model {
            prop_assert_eq!(mem[addr.0], value);
        }
    }

    /// transactions never change once appended, and the snoop index only moves forward
    #[test]
    fn bus_log_is_append_only(insts in prop::collection::vec(instr(), 1..64)) {
        let (mut core, bus, _) = single_core(2);
        let mut seen = Vec::new();
        let mut last_seen = core.last_seen();

        for inst in insts {
            core.step(inst).unwrap();
            let now = bus.snapshot();
            prop_assert!(now.len() >= seen.len());
            prop_assert_eq!(&now[..seen.len()], &seen[..]);
            prop_assert!(core.last_seen() >= last_seen);
            last_seen = core.last_seen();
            seen = now;
        }
    }
}
