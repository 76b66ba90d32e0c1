use std::fmt;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use shmm_compute::{worker, Band};
use shmm_region::{Mapping, RegionAllocator, RegionGuard, RegionKeys, SharedRegion};

use crate::config::{Isolation, RunConfig};
use crate::error::{Result, RuntimeError};
use crate::process::{self, ChildWorker, WorkerExit, WorkerFailure, EXIT_ATTACH, EXIT_COMPUTE, EXIT_OK, EXIT_PANIC};

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Init,
    RegionsReady,
    WorkersRunning,
    AllJoined,
    RegionsReleased,
}

impl Phase {
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Init => Some(Phase::RegionsReady),
            Phase::RegionsReady => Some(Phase::WorkersRunning),
            Phase::WorkersRunning => Some(Phase::AllJoined),
            Phase::AllJoined => Some(Phase::RegionsReleased),
            Phase::RegionsReleased => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::RegionsReady => "REGIONS_READY",
            Phase::WorkersRunning => "WORKERS_RUNNING",
            Phase::AllJoined => "ALL_JOINED",
            Phase::RegionsReleased => "REGIONS_RELEASED",
        };
        f.write_str(name)
    }
}

fn advance(phase: &mut Phase) {
    if let Some(next) = phase.next() {
        log::debug!("{} -> {}", phase, next);
        *phase = next;
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub dimension: usize,
    pub workers: usize,
    pub bands: Vec<Band>,
    /// From just before the first worker was spawned to just after the last
    /// one was joined.
    pub elapsed: Duration,
    /// Workers that exited unsuccessfully; their rows are unreliable.
    pub failures: Vec<WorkerFailure>,
    /// Copy of the result, taken after every worker had been joined.
    pub product: Option<Vec<f64>>,
}

impl RunReport {
    /// Elapsed seconds rounded to whole milliseconds.
    pub fn elapsed_secs_ms(&self) -> f64 {
        (self.elapsed.as_secs_f64() * 1000.0).round() / 1000.0
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Number of processes: {}\tExecution time: {:.3} sec",
            self.workers,
            self.elapsed_secs_ms()
        )
    }
}

/// The three regions of a run. Each is destroyed when dropped.
struct Regions<R: SharedRegion> {
    a: RegionGuard<R>,
    b: RegionGuard<R>,
    c: RegionGuard<R>,
}

impl<R: SharedRegion> Regions<R> {
    fn allocate<A>(allocator: &A, keys: &RegionKeys, size: usize) -> Result<Self>
    where
        A: RegionAllocator<Region = R>,
    {
        let a = RegionGuard::new(allocator.allocate(keys.a, size)?);
        let b = RegionGuard::new(allocator.allocate(keys.b, size)?);
        let c = RegionGuard::new(allocator.allocate(keys.c, size)?);
        Ok(Self { a, b, c })
    }

    /// Destroy all three, reporting the first failure.
    fn release(self) -> Result<()> {
        let a = self.a.release();
        let b = self.b.release();
        let c = self.c.release();
        Ok(a.and(b).and(c)?)
    }
}

/// Starts one worker process running `body`.
pub type Spawner = fn(Band, &mut dyn FnMut() -> i32) -> io::Result<ChildWorker>;

/// Drives a multiplication from region allocation to region release.
pub struct Orchestrator<A: RegionAllocator> {
    allocator: A,
    config: RunConfig,
    spawner: Spawner,
}

impl<A: RegionAllocator> Orchestrator<A> {
    pub fn new(allocator: A, config: RunConfig) -> Self {
        Self {
            allocator,
            config,
            spawner: process::spawn_worker,
        }
    }

    /// Replace how worker processes are started. Defaults to `fork`.
    pub fn with_spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Run the multiplication.
    ///
    /// The configuration is validated before any region exists. Regions
    /// are destroyed on every return path, including errors. A worker that
    /// fails does not stop the others; it is listed in
    /// [`RunReport::failures`].
    pub fn run(&self) -> Result<RunReport> {
        let n = self.config.dimension;
        let mut phase = Phase::Init;

        let bands = self.config.validate()?;
        let size = self.config.region_bytes()?;
        log::debug!(
            "{}x{} with {} {} workers on {} regions {:?}",
            n,
            n,
            self.config.workers,
            self.config.isolation,
            self.allocator.name(),
            self.config.keys
        );

        let regions = Regions::allocate(&self.allocator, &self.config.keys, size)?;
        let mut map_a = regions.a.region().attach()?;
        let mut map_b = regions.b.region().attach()?;
        let mut map_c = regions.c.region().attach()?;
        unsafe {
            self.config
                .operands
                .write_into(map_a.as_f64_slice_mut()?, map_b.as_f64_slice_mut()?);
        }
        advance(&mut phase);

        let (elapsed, failures) = match self.config.isolation {
            Isolation::Process => {
                run_processes(&bands, &regions, n, self.spawner, &mut phase)?
            }
            Isolation::Thread => {
                run_threads(&bands, &map_a, &map_b, &mut map_c, n, &mut phase)?
            }
        };
        advance(&mut phase);

        for failure in &failures {
            log::warn!("{}", failure);
        }

        // Every worker has been joined, so C is stable from here on.
        let product = if self.config.capture_product {
            Some(unsafe { map_c.as_f64_slice()? }.to_vec())
        } else {
            None
        };

        map_a.detach()?;
        map_b.detach()?;
        map_c.detach()?;
        regions.release()?;
        advance(&mut phase);

        Ok(RunReport {
            dimension: n,
            workers: self.config.workers,
            bands,
            elapsed,
            failures,
            product,
        })
    }
}

/// Body of a forked worker. Returns the process exit code.
fn worker_process<R: SharedRegion>(band: &Band, regions: &Regions<R>, n: usize) -> i32 {
    let (map_a, map_b, mut map_c) = match (
        regions.a.region().attach(),
        regions.b.region().attach(),
        regions.c.region().attach(),
    ) {
        (Ok(a), Ok(b), Ok(c)) => (a, b, c),
        _ => return EXIT_ATTACH,
    };

    let outcome = unsafe {
        match (
            map_a.as_f64_slice(),
            map_b.as_f64_slice(),
            map_c.f64_range_mut(band.elements(n)),
        ) {
            (Ok(a), Ok(b), Ok(c)) => worker::run(band, a, b, c, n).is_ok(),
            _ => false,
        }
    };

    let _ = map_a.detach();
    let _ = map_b.detach();
    let _ = map_c.detach();
    if outcome {
        EXIT_OK
    } else {
        EXIT_COMPUTE
    }
}

fn run_processes<R: SharedRegion>(
    bands: &[Band],
    regions: &Regions<R>,
    n: usize,
    spawner: Spawner,
    phase: &mut Phase,
) -> Result<(Duration, Vec<WorkerFailure>)> {
    let start = Instant::now();
    advance(phase);

    let mut children = Vec::with_capacity(bands.len());
    for band in bands {
        let mut body = || worker_process(band, regions, n);
        match spawner(*band, &mut body) {
            Ok(child) => {
                log::debug!("worker {} (pid {}) rows {}..{}", band.index, child.pid, band.start, band.end);
                children.push(child);
            }
            Err(source) => {
                log::warn!("spawn of worker {} failed, killing {} siblings", band.index, children.len());
                process::kill_and_reap(&children);
                return Err(RuntimeError::Spawn {
                    worker: band.index,
                    source,
                });
            }
        }
    }

    let mut failures = Vec::new();
    let mut wait_error = None;
    for child in &children {
        match process::wait(child) {
            Ok(exit) if exit.success() => {}
            Ok(exit) => failures.push(WorkerFailure {
                band: child.band,
                exit,
            }),
            Err(source) => {
                log::warn!("wait for worker {} failed: {}", child.band.index, source);
                if wait_error.is_none() {
                    wait_error = Some(source);
                }
            }
        }
    }
    let elapsed = start.elapsed();

    match wait_error {
        Some(source) => Err(RuntimeError::Wait { source }),
        None => Ok((elapsed, failures)),
    }
}

fn run_threads<M: Mapping>(
    bands: &[Band],
    map_a: &M,
    map_b: &M,
    map_c: &mut M,
    n: usize,
    phase: &mut Phase,
) -> Result<(Duration, Vec<WorkerFailure>)> {
    let a = unsafe { map_a.as_f64_slice()? };
    let b = unsafe { map_b.as_f64_slice()? };
    let c = unsafe { map_c.as_f64_slice_mut()? };
    let band_elems = bands.first().map_or(0, |band| band.len() * n);

    let start = Instant::now();
    advance(phase);
    let exits = thread::scope(|s| -> Result<Vec<(Band, WorkerExit)>> {
        let mut handles = Vec::with_capacity(bands.len());
        for (band, rows) in bands.iter().copied().zip(c.chunks_mut(band_elems)) {
            let handle = thread::Builder::new()
                .name(format!("shmm-worker-{}", band.index))
                .spawn_scoped(s, move || worker::run(&band, a, b, rows, n))
                .map_err(|source| RuntimeError::Spawn {
                    worker: band.index,
                    source,
                })?;
            handles.push((band, handle));
        }
        Ok(handles
            .into_iter()
            .map(|(band, handle)| {
                let exit = match handle.join() {
                    Ok(Ok(())) => WorkerExit::Code(EXIT_OK),
                    Ok(Err(_)) => WorkerExit::Code(EXIT_COMPUTE),
                    Err(_) => WorkerExit::Code(EXIT_PANIC),
                };
                (band, exit)
            })
            .collect())
    })?;
    let elapsed = start.elapsed();

    let failures = exits
        .into_iter()
        .filter(|(_, exit)| !exit.success())
        .map(|(band, exit)| WorkerFailure { band, exit })
        .collect();
    Ok((elapsed, failures))
}
