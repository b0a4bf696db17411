//! Drives the simulator from several threads: every worker allocates a
//! region, fills it with its own pattern, reads it back and releases it.
//! Prints TLB statistics and pool usage at the end.
//!
//! ```text
//! vm-stress [threads] [rounds] [max_pages]
//! ```
//!
//! Log level comes from `VM_LOG` (`error`..`trace`, default `info`).

mod logger;

use crate::logger::StderrLogger;
use log::{Level, LevelFilter, error, info, log_enabled, trace, warn};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::{env, thread};
use vm_sim::{PAGE_SIZE, VirtualMemory, VmConfig, VmError};

const USAGE: &str = "usage: vm-stress [threads] [rounds] [max_pages]";

struct Args {
    threads: u32,
    rounds: u32,
    max_pages: u32,
}

fn positional<T: FromStr>(arg: Option<String>, name: &str, default: T) -> Result<T, String> {
    match arg {
        None => Ok(default),
        Some(s) => s.parse().map_err(|_| format!("invalid {name}: {s}")),
    }
}

fn parse_args() -> Result<Args, String> {
    let mut args = env::args().skip(1);
    let threads = positional(args.next(), "threads", 4)?;
    let rounds = positional(args.next(), "rounds", 200)?;
    let max_pages: u32 = positional(args.next(), "max_pages", 8)?;

    if threads == 0 || max_pages == 0 {
        return Err("threads and max_pages must be at least 1".into());
    }
    if max_pages.checked_mul(PAGE_SIZE).is_none() {
        return Err(format!("max_pages {max_pages} exceeds the address space"));
    }
    Ok(Args {
        threads,
        rounds,
        max_pages,
    })
}

fn log_level() -> LevelFilter {
    env::var("VM_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

#[allow(clippy::cast_possible_truncation)]
fn pattern(worker: u32, round: u32, len: usize) -> Vec<u8> {
    let seed = worker.wrapping_mul(31).wrapping_add(round.wrapping_mul(7)) as usize;
    (0..len).map(|i| ((i + seed) % 251) as u8).collect()
}

/// Returns the number of rounds whose data did not survive the round trip.
fn worker(vm: &VirtualMemory, id: u32, args: &Args) -> Result<u32, VmError> {
    let mut mismatches = 0;
    for round in 0..args.rounds {
        let pages = round.wrapping_add(id) % args.max_pages + 1;
        let bytes = pages * PAGE_SIZE;

        let va = vm.allocate(bytes)?;
        let data = pattern(id, round, bytes as usize);
        vm.write(va, &data)?;

        let mut back = vec![0; data.len()];
        let copied = vm.read(va, &mut back);
        if copied != data.len() || back != data {
            error!(
                "worker {id}: round {round}: {copied} of {} bytes at {va} read back wrong",
                data.len()
            );
            mismatches += 1;
        }

        vm.release(va, bytes)?;
    }
    Ok(mismatches)
}

fn main() -> ExitCode {
    if let Err(e) = StderrLogger::new(log_level()).init() {
        eprintln!("logger: {e}");
    }

    let args = match parse_args() {
        Ok(args) => Arc::new(args),
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let vm = match VirtualMemory::new(VmConfig::DEFAULT) {
        Ok(vm) => Arc::new(vm),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "{} thread(s), {} round(s), up to {} page(s) per allocation",
        args.threads, args.rounds, args.max_pages
    );

    let handles: Vec<_> = (0..args.threads)
        .map(|id| {
            let vm = Arc::clone(&vm);
            let args = Arc::clone(&args);
            thread::spawn(move || worker(&vm, id, &args))
        })
        .collect();

    let mut failed = 0;
    for (id, h) in handles.into_iter().enumerate() {
        match h.join() {
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => {
                warn!("worker {id}: {n} round(s) failed verification");
                failed += 1;
            }
            Ok(Err(e)) => {
                error!("worker {id}: {e}");
                failed += 1;
            }
            Err(_) => {
                error!("worker {id} panicked");
                failed += 1;
            }
        }
    }

    info!("tlb {}", vm.tlb_stats());
    if let Some(u) = vm.usage() {
        info!(
            "pool: {} pages, {} slot(s) and {} frame(s) in use, {} page table(s)",
            u.total_pages, u.used_slots, u.used_frames, u.inner_tables
        );
    }
    if log_enabled!(Level::Trace)
        && let Some(space) = vm.address_space()
    {
        trace!("tlb rows:\n{}", space.tlb().dump());
    }

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        error!("{failed} worker(s) failed");
        ExitCode::FAILURE
    }
}
