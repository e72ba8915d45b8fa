//! Core of a process-tracing debugger backend for a ptrace-like kernel
//! primitive (spec.md §1). Mediates between a controlling debugger and the
//! traced threads of a single tracee: a thread table that caches registers
//! between stops, a software breakpoint table, and a run/stop protocol that
//! drives threads forward while keeping both tables consistent with tracee
//! memory (spec.md §3 invariants).
//!
//! Out of scope, by design (spec.md §1): the debugger UI, symbol resolution,
//! process spawning, signal-injection policy, the scripting API, and
//! anything beyond x86_64 for the architecture adapter.

pub mod arch;
pub mod breakpoint_table;
pub mod engine;
pub mod error;
pub mod kernel;
#[cfg(test)]
mod testutil;
pub mod thread_table;
pub mod wait_status;

pub use breakpoint_table::{Breakpoint, BreakpointTable};
pub use error::{Result, TraceError};
pub use kernel::{KernelTrace, LinuxPtrace, TraceOptions};
pub use thread_table::ThreadTable;
pub use wait_status::ThreadStatus;

use nix::unistd::Pid;

use engine::Engine;

/// Ties the thread table, breakpoint table, and run/stop engine together
/// over a single tracee, matching the external interface of spec.md §6. The
/// four run/stop operations and the register/breakpoint bookkeeping calls
/// are serialized with each other (spec §3 invariant 4) simply by being
/// `&mut self` methods on one value — there is no internal locking because
/// the core is single-threaded-cooperative from the tracer's side (spec §5).
pub struct Debugger<K = LinuxPtrace> {
    pid: Pid,
    threads: ThreadTable,
    breakpoints: BreakpointTable,
    engine: Engine<K>,
}

impl Debugger<LinuxPtrace> {
    /// Build a debugger for the given tracee pid using the real Linux
    /// `ptrace` facade.
    pub fn new(pid: Pid) -> Self {
        Self::with_kernel(pid, LinuxPtrace)
    }
}

impl<K: KernelTrace> Debugger<K> {
    pub fn with_kernel(pid: Pid, kernel: K) -> Self {
        Self {
            pid,
            threads: ThreadTable::new(),
            breakpoints: BreakpointTable::new(),
            engine: Engine::new(kernel),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    // --- Lifecycle (component A, passthrough) ---

    pub fn trace_me(&self) -> Result<()> {
        self.engine.kernel().trace_me()
    }

    pub fn attach(&self) -> Result<()> {
        self.engine.kernel().attach(self.pid)
    }

    pub fn detach(&self) -> Result<()> {
        self.engine.kernel().detach(self.pid)
    }

    pub fn set_options(&self, options: TraceOptions) -> Result<()> {
        self.engine.kernel().set_options(self.pid, options)
    }

    // --- Tracee memory / user area (component A, passthrough) ---

    pub fn peek_data(&self, addr: u64) -> Result<u64> {
        self.engine.kernel().peek_data(self.pid, addr)
    }

    pub fn poke_data(&self, addr: u64, word: u64) -> Result<()> {
        self.engine.kernel().poke_data(self.pid, addr, word)
    }

    pub fn peek_user(&self, off: u64) -> Result<u64> {
        self.engine.kernel().peek_user(self.pid, off)
    }

    pub fn poke_user(&self, off: u64, word: u64) -> Result<()> {
        self.engine.kernel().poke_user(self.pid, off, word)
    }

    pub fn get_event_msg(&self) -> Result<u64> {
        self.engine.kernel().get_event_msg(self.pid)
    }

    // --- Thread table (component C) ---

    pub fn register_thread(&mut self, tid: Pid) -> Result<&libc::user_regs_struct> {
        self.threads.register(self.engine.kernel(), tid)
    }

    pub fn unregister_thread(&mut self, tid: Pid) {
        self.threads.unregister(tid)
    }

    pub fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    pub fn threads_mut(&mut self) -> &mut ThreadTable {
        &mut self.threads
    }

    pub fn free_thread_list(&mut self) {
        self.threads.clear()
    }

    // --- Breakpoint table (component D) ---

    pub fn register_breakpoint(&mut self, addr: u64) -> Result<()> {
        self.breakpoints
            .install(self.engine.kernel(), self.pid, addr)
    }

    pub fn unregister_breakpoint(&mut self, addr: u64) -> Option<Breakpoint> {
        self.breakpoints.remove(addr)
    }

    pub fn disable_breakpoint(&mut self, addr: u64) -> Result<()> {
        self.breakpoints
            .disable(self.engine.kernel(), self.pid, addr)
    }

    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }

    pub fn free_breakpoints(&mut self) {
        self.breakpoints.clear()
    }

    // --- Run/Stop Engine (component E) ---

    pub fn single_step(&mut self, tid: Pid) -> Result<()> {
        self.engine.single_step(&mut self.threads, tid)
    }

    pub fn step_until(&mut self, tid: Pid, target_addr: u64, max_steps: i64) -> Result<()> {
        self.engine
            .step_until(&mut self.threads, tid, target_addr, max_steps)
    }

    pub fn cont_all_and_set_bps(&mut self) -> Result<Option<ThreadStatus>> {
        self.engine
            .continue_all_and_arm(&mut self.threads, &self.breakpoints, self.pid)
    }

    pub fn wait_all_and_update_regs(&mut self) -> Result<Vec<ThreadStatus>> {
        self.engine
            .wait_all_and_disarm(&mut self.threads, &self.breakpoints, self.pid)
    }
}
