//! Forked worker processes.
//!
//! A child runs a closure on the memory image inherited from the parent and
//! leaves through `_exit`, so no destructor (in particular no region guard)
//! ever runs in the child.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};

use shmm_compute::Band;

/// The worker finished its band.
pub const EXIT_OK: i32 = 0;
/// The worker could not attach a shared region; nothing was written.
pub const EXIT_ATTACH: i32 = 70;
/// The band kernel rejected its inputs.
pub const EXIT_COMPUTE: i32 = 71;
/// The worker panicked.
pub const EXIT_PANIC: i32 = 72;

/// How a worker terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Code(i32),
    Signal(i32),
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        *self == WorkerExit::Code(EXIT_OK)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Code(EXIT_ATTACH) => write!(f, "exit code {} (attach failed)", EXIT_ATTACH),
            WorkerExit::Code(EXIT_COMPUTE) => write!(f, "exit code {} (bad shape)", EXIT_COMPUTE),
            WorkerExit::Code(EXIT_PANIC) => write!(f, "exit code {} (panicked)", EXIT_PANIC),
            WorkerExit::Code(code) => write!(f, "exit code {}", code),
            WorkerExit::Signal(sig) => write!(f, "killed by signal {}", sig),
        }
    }
}

/// A worker that did not finish its band. The band's rows of the result
/// hold whatever was last written there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerFailure {
    pub band: Band,
    pub exit: WorkerExit,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worker {} (rows {}..{}) {}",
            self.band.index, self.band.start, self.band.end, self.exit
        )
    }
}

#[derive(Debug)]
pub struct ChildWorker {
    pub band: Band,
    pub pid: libc::pid_t,
}

/// Fork a child that runs `body` and exits with the returned code.
pub fn spawn<F>(band: Band, body: F) -> io::Result<ChildWorker>
where
    F: FnOnce() -> i32,
{
    match unsafe { libc::fork() } {
        -1 => Err(io::Error::last_os_error()),
        0 => {
            let code = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(EXIT_PANIC);
            unsafe { libc::_exit(code) }
        }
        pid => Ok(ChildWorker { band, pid }),
    }
}

/// [`spawn`] for a borrowed closure; the default orchestrator spawner.
pub fn spawn_worker(band: Band, body: &mut dyn FnMut() -> i32) -> io::Result<ChildWorker> {
    spawn(band, body)
}

/// Block until `child` terminates.
pub fn wait(child: &ChildWorker) -> io::Result<WorkerExit> {
    loop {
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(child.pid, &mut status, 0) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if libc::WIFEXITED(status) {
            return Ok(WorkerExit::Code(libc::WEXITSTATUS(status)));
        }
        if libc::WIFSIGNALED(status) {
            return Ok(WorkerExit::Signal(libc::WTERMSIG(status)));
        }
    }
}

/// SIGKILL every child and reap it.
pub fn kill_and_reap(children: &[ChildWorker]) {
    for child in children {
        unsafe {
            libc::kill(child.pid, libc::SIGKILL);
        }
    }
    for child in children {
        if let Err(e) = wait(child) {
            log::warn!("could not reap worker {} (pid {}): {}", child.band.index, child.pid, e);
        }
    }
}
