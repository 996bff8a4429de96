use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::mesi::{Addr, Instr, Insts, SimError};

/// Parses one line of an instruction file (`line_no` is 1-based).
///
/// Accepted forms are `RD <addr>` and `WR <addr> <value>`, or the numeric kinds
/// `0 <addr>` and `1 <addr> <value>`. Blank lines and `#` comments yield `None`.
pub fn parse_instr(line_no: usize, line: &str) -> Result<Option<Instr>, SimError> {
    let malformed = || SimError::MalformedInstruction { line: line_no, text: line.trim().to_string() };
    let mut parts = line.split_whitespace();
    let kind = match parts.next() {
        None => return Ok(None),
        Some(k) if k.starts_with('#') => return Ok(None),
        Some(k) => k,
    };
    let addr = parts.next().and_then(|a| a.parse::<usize>().ok()).map(Addr).ok_or_else(malformed)?;
    let inst = match kind {
        "RD" | "0" => Instr::Read(addr),
        "WR" | "1" => {
            let value = parts.next().and_then(|v| v.parse::<u8>().ok()).ok_or_else(malformed)?;
            Instr::Write(addr, value)
        },
        _ => return Err(malformed()),
    };
    if parts.next().is_some() {
        return Err(malformed());
    }
    Ok(Some(inst))
}

/// Parses a whole instruction stream. Malformed lines are returned next to the
/// instructions instead of aborting the parse.
pub fn parse_instructions(text: &str) -> (Insts, Vec<SimError>) {
    let mut insts = Vec::new();
    let mut errors = Vec::new();
    for (i, line) in text.lines().enumerate() {
        match parse_instr(i + 1, line) {
            Ok(Some(inst)) => insts.push(inst),
            Ok(None) => (),
            Err(e) => errors.push(e),
        }
    }
    (insts, errors)
}

pub fn input_file_name(core: usize) -> String {
    format!("input_{core}.txt")
}

/// Reads `input_<id>.txt` for every core from `dir`, skipping (and logging)
/// malformed lines.
pub fn read_core_files(dir: &Path, num_cores: usize) -> Result<Vec<Insts>, SimError> {
    (0..num_cores)
        .map(|id| {
            let path = dir.join(input_file_name(id));
            info!("reading file: {:?}", path);
            let text = fs::read_to_string(&path)?;
            let (insts, errors) = parse_instructions(&text);
            for e in errors {
                warn!("core {id}: {}: {e}", path.display());
            }
            Ok(insts)
        })
        .collect()
}
