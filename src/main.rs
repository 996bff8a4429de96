use std::path::PathBuf;
use std::time::{Duration, Instant};

use cachesim_mesi::mesi::SystemSpec;
use cachesim_mesi::{simulate, utils};
use clap::Parser;
use color_eyre::eyre;
use env_logger::Env;
use log::info;

/// Simulates cores with private caches kept coherent by MESI over a shared bus.
///
/// Core `i` executes the instructions in `<input-dir>/input_<i>.txt`, one per line:
/// `RD <addr>` or `WR <addr> <value>`.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// number of cores
    #[arg(short = 'n', long, default_value_t = 2)]
    cores: usize,

    /// shared memory size in bytes
    #[arg(long, default_value_t = 24)]
    memory_size: usize,

    /// lines per (direct-mapped) cache
    #[arg(long, default_value_t = 2)]
    cache_size: usize,

    /// maximum number of bus transactions
    #[arg(long, default_value_t = 1024)]
    bus_capacity: usize,

    /// how long a read miss waits for a peer to answer, in milliseconds
    #[arg(long, default_value_t = 5000)]
    fill_timeout_ms: u64,

    /// directory holding the input_<i>.txt files
    #[arg(short, long, default_value = ".")]
    input_dir: PathBuf,

    /// print the whole bus log after the run
    #[arg(long)]
    trace_bus: bool,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // logging
    let env = Env::default()
        .filter_or("MESI_LOG", "warn")
        .write_style_or("MESI_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    let args = Args::parse();
    let specs = SystemSpec {
        num_cores: args.cores,
        memory_size: args.memory_size,
        cache_size: args.cache_size,
        bus_capacity: args.bus_capacity,
        fill_timeout: Duration::from_millis(args.fill_timeout_ms),
    };
    specs.validate()?;

    // load instructions
    let insts = utils::read_core_files(&args.input_dir, specs.num_cores)?;

    let t0 = Instant::now();
    let result = simulate(specs, insts, |_, access| println!("{access}"))?;
    info!("finished simulation in {:?}", t0.elapsed());

    if args.trace_bus {
        for (i, tx) in result.bus.iter().enumerate() {
            println!("bus[{i}] {tx}");
        }
    }

    let failed = result.failed().count();
    if failed > 0 {
        eyre::bail!("{failed} of {} cores failed", result.cores.len());
    }
    Ok(())
}
