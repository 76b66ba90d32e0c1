use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use shmm_compute::format_matrix;
use shmm_region::{MmapAllocator, RegionAllocator, RegionError, SysvAllocator};
use shmm_runtime::{Isolation, Orchestrator, RunConfig, RunReport, RuntimeError};

/// Multiply two N x N matrices of ones, splitting rows across P workers
/// that share the operands and result through shared memory.
#[derive(Parser, Debug)]
#[command(name = "shmm", version)]
struct Args {
    /// Matrix dimension N.
    size: usize,

    /// Number of workers P. Must divide N.
    processes: usize,

    /// Shared memory mechanism.
    #[arg(long, value_enum, env = "SHMM_BACKEND", default_value_t = Backend::Sysv)]
    backend: Backend,

    /// Run workers as forked processes or as threads.
    #[arg(long, default_value_t = Isolation::Process)]
    isolation: Isolation,

    /// Print the matrices when N is at most this value.
    #[arg(long, default_value_t = 10)]
    print_limit: usize,

    /// Directory for region files (mmap backend only).
    #[arg(long, env = "SHMM_REGION_DIR")]
    region_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Sysv,
    Mmap,
}

const EXIT_CONFIGURATION: u8 = 3;
const EXIT_ALLOCATION: u8 = 4;
const EXIT_ATTACH: u8 = 5;
const EXIT_SPAWN: u8 = 6;
const EXIT_WAIT: u8 = 7;
const EXIT_WORKER_FAILED: u8 = 8;
const EXIT_TEARDOWN: u8 = 9;

fn exit_code(err: &RuntimeError) -> u8 {
    match err {
        RuntimeError::Compute(_) => EXIT_CONFIGURATION,
        RuntimeError::Region(RegionError::Allocation { .. }) => EXIT_ALLOCATION,
        RuntimeError::Region(
            RegionError::Attach { .. } | RegionError::Layout { .. } | RegionError::NotFound { .. },
        ) => EXIT_ATTACH,
        RuntimeError::Region(RegionError::Detach { .. } | RegionError::Destroy { .. }) => {
            EXIT_TEARDOWN
        }
        RuntimeError::Spawn { .. } => EXIT_SPAWN,
        RuntimeError::Wait { .. } => EXIT_WAIT,
    }
}

pub fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    match _main(args) {
        Ok(report) if report.is_complete() => ExitCode::SUCCESS,
        Ok(report) => {
            eprintln!(
                "ERROR: {} of {} workers failed; their rows are incomplete",
                report.failures.len(),
                report.workers
            );
            ExitCode::from(EXIT_WORKER_FAILED)
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn _main(args: Args) -> Result<RunReport, RuntimeError> {
    let print = args.size <= args.print_limit;
    let config = RunConfig::new(args.size, args.processes)
        .with_isolation(args.isolation)
        .capture_product(print);

    match args.backend {
        Backend::Sysv => execute(SysvAllocator::new(), config, print),
        Backend::Mmap => {
            let allocator = args.region_dir.map(MmapAllocator::new).unwrap_or_default();
            execute(allocator, config, print)
        }
    }
}

fn execute<A: RegionAllocator>(
    allocator: A,
    config: RunConfig,
    print: bool,
) -> Result<RunReport, RuntimeError> {
    config.validate()?;
    log::info!(
        "multiplying {0}x{0} on {1} backend with {2} workers",
        config.dimension,
        allocator.name(),
        config.workers
    );

    if print {
        let (a, b) = config.operands.materialize(config.dimension);
        println!("Matrix 1:");
        print!("{}", format_matrix(&a, config.dimension));
        println!("Matrix 2:");
        print!("{}", format_matrix(&b, config.dimension));
    }
    // Forked workers inherit unflushed buffers.
    let _ = io::stdout().flush();

    let n = config.dimension;
    let report = Orchestrator::new(allocator, config).run()?;

    if let Some(product) = &report.product {
        println!("Matrix 3:");
        print!("{}", format_matrix(product, n));
    }
    println!("{}", report.summary_line());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmm_compute::ComputeError;
    use shmm_region::RegionId;

    #[test]
    fn test_parse_positional() {
        let args = Args::try_parse_from(["shmm", "4", "2"]).unwrap();
        assert_eq!((args.size, args.processes), (4, 2));
        assert_eq!(args.isolation, Isolation::Process);
        assert_eq!(args.print_limit, 10);
    }

    #[test]
    fn test_parse_options() {
        let args = Args::try_parse_from([
            "shmm", "8", "4", "--backend", "mmap", "--isolation", "thread", "--region-dir", "/tmp/x",
        ])
        .unwrap();
        assert_eq!(args.backend, Backend::Mmap);
        assert_eq!(args.isolation, Isolation::Thread);
        assert_eq!(args.region_dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_wrong_argument_count_is_usage_error() {
        let err = Args::try_parse_from(["shmm", "4"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(Args::try_parse_from(["shmm", "4", "2", "9"]).is_err());
        assert!(Args::try_parse_from(["shmm", "four", "2"]).is_err());
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let config = RuntimeError::Compute(ComputeError::Configuration("x".into()));
        let alloc = RuntimeError::Region(RegionError::Allocation {
            id: RegionId(1),
            size: 8,
            source: io::Error::from_raw_os_error(12),
        });
        let attach = RuntimeError::Region(RegionError::Attach {
            id: RegionId(1),
            source: io::Error::from_raw_os_error(13),
        });
        let spawn = RuntimeError::Spawn { worker: 0, source: io::Error::from_raw_os_error(11) };
        let wait = RuntimeError::Wait { source: io::Error::from_raw_os_error(10) };

        let destroy = RuntimeError::Region(RegionError::Destroy {
            id: RegionId(1),
            source: io::Error::from_raw_os_error(22),
        });
        let detach = RuntimeError::Region(RegionError::Detach {
            id: RegionId(1),
            source: io::Error::from_raw_os_error(22),
        });
        let layout = RuntimeError::Region(RegionError::Layout {
            id: RegionId(1),
            reason: "odd length".into(),
        });

        let codes: Vec<u8> = [config, alloc, attach, spawn, wait, destroy, detach, layout]
            .iter()
            .map(exit_code)
            .collect();
        assert_eq!(codes, vec![3, 4, 5, 6, 7, 9, 9, 5]);
    }

    #[test]
    fn test_indivisible_run_fails_before_allocation() {
        let dir = std::env::temp_dir().join(format!("shmm-cli-test-{}", std::process::id()));
        let args = Args::try_parse_from([
            "shmm", "7", "3", "--backend", "mmap", "--region-dir", dir.to_str().unwrap(),
        ])
        .unwrap();
        let err = _main(args).unwrap_err();
        assert_eq!(exit_code(&err), EXIT_CONFIGURATION);
        assert!(!dir.exists());
    }
}
