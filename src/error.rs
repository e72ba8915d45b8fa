//! Error kinds surfaced by the kernel facade, the tables, and the engine.
//!
//! See spec §7: bulk per-thread failures inside the engine's run-cycles are
//! logged and skipped rather than propagated through this type (the caller
//! never sees them); only operations that determine protocol correctness,
//! or single-target operations like breakpoint install, return `Err`.

use nix::unistd::Pid;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("ptrace {verb} failed on {tid}: {source}")]
    KernelCallFailed {
        verb: &'static str,
        tid: Pid,
        #[source]
        source: nix::Error,
    },

    #[error("thread {tid} is not in ptrace-stop")]
    NotStopped { tid: Pid },

    #[error("address {addr:#x} is not mapped in the tracee")]
    BadAddress { addr: u64 },

    #[error("no such thread: {tid}")]
    NoSuchThread { tid: Pid },

    #[error("primary waitpid in wait_all_and_disarm failed")]
    WaitFailed(#[source] nix::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;
