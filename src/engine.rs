//! Run/Stop Engine (component E).
//!
//! Drives single-step, step-until-address, continue-all, and wait-all; owns
//! the transition protocol between "all-stopped" (debugger owns the world,
//! breakpoints disarmed in memory, registers authoritative in the thread
//! table) and "running" (kernel owns the world, breakpoints armed, register
//! cache stale). See spec §4.E for the full protocol and §5 for the
//! single-threaded-tracer concurrency model this assumes.

use std::collections::HashMap;

use log::warn;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::arch;
use crate::breakpoint_table::BreakpointTable;
use crate::error::{Result, TraceError};
use crate::kernel::KernelTrace;
use crate::thread_table::ThreadTable;
use crate::wait_status::ThreadStatus;

/// Coordinates the four engine operations over one `KernelTrace` backend.
/// Generic so tests can run the exact same protocol against `MockTrace`.
pub struct Engine<K> {
    kernel: K,
}

impl<K: KernelTrace> Engine<K> {
    pub fn new(kernel: K) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Flush every thread's cached registers back to the kernel. Per-thread
    /// failures are logged and skipped (spec §4.E.1, §7).
    fn flush_all(&self, threads: &mut ThreadTable) {
        for (tid, regs) in threads.iter() {
            if let Err(e) = self.kernel.set_regs(tid, regs) {
                warn!("set_regs failed for thread {}: {}", tid, e);
            }
        }
    }

    /// §4.E.1 `single_step(tid)`.
    pub fn single_step(&self, threads: &mut ThreadTable, tid: Pid) -> Result<()> {
        self.flush_all(threads);
        self.kernel.single_step(tid)
    }

    /// §4.E.2 `step_until(tid, target_addr, max_steps)`.
    ///
    /// `max_steps < 0` means unbounded. A step that doesn't move the
    /// instruction pointer (attributed to a hardware breakpoint) does not
    /// consume the budget (§8 property 7).
    pub fn step_until(
        &self,
        threads: &mut ThreadTable,
        tid: Pid,
        target_addr: u64,
        max_steps: i64,
    ) -> Result<()> {
        if !threads.contains(tid) {
            return Err(TraceError::NoSuchThread { tid });
        }

        self.flush_all(threads);

        let mut count: i64 = 0;
        loop {
            if max_steps >= 0 && count >= max_steps {
                return Ok(());
            }

            self.kernel.single_step(tid)?;
            self.kernel.wait_tid(tid, true)?;

            let prev_ip = arch::instruction_pointer(threads.get(tid).expect("present"));
            let regs = self.kernel.get_regs(tid)?;
            *threads.get_mut(tid).expect("present") = regs;
            let new_ip = arch::instruction_pointer(&regs);

            if new_ip == target_addr {
                return Ok(());
            }
            if new_ip == prev_ip {
                continue;
            }
            count += 1;
        }
    }

    /// §4.E.3 `continue_all_and_arm(pid)`: all-stopped -> running.
    ///
    /// Ordering is load-bearing: step threads off their breakpoints while
    /// the trap is *not* in memory, only then arm every enabled breakpoint,
    /// only then continue every thread.
    pub fn continue_all_and_arm(
        &self,
        threads: &mut ThreadTable,
        breakpoints: &BreakpointTable,
        pid: Pid,
    ) -> Result<Option<ThreadStatus>> {
        self.flush_all(threads);

        let tids: Vec<Pid> = threads.tids().collect();
        let mut step_off_status: HashMap<Pid, ThreadStatus> = HashMap::new();
        for tid in &tids {
            let ip = arch::instruction_pointer(threads.get(*tid).expect("present"));
            if breakpoints.iter().any(|bp| bp.addr == ip) {
                self.kernel.single_step(*tid)?;
                let mut status = self.kernel.wait_tid(*tid, true)?;
                if status.is_sigstop() {
                    // Racing SIGSTOP from another thread's stop; the
                    // step-off itself hasn't happened yet. Re-issue it.
                    self.kernel.single_step(*tid)?;
                    status = self.kernel.wait_tid(*tid, true)?;
                }
                step_off_status.insert(*tid, status);
            }
        }

        breakpoints.arm_all(&self.kernel, pid)?;

        let mut last_status = None;
        for tid in &tids {
            if let Err(e) = self.kernel.cont(*tid) {
                warn!("cont failed for thread {}: {}", tid, e);
            } else {
                last_status = Some(step_off_status.get(tid).copied().unwrap_or(ThreadStatus {
                    tid: *tid,
                    status: 0,
                }));
            }
        }
        Ok(last_status)
    }

    /// §4.E.4 `wait_all_and_disarm(pid)`: running -> all-stopped.
    ///
    /// Returns events newest-first: the primary event from step 1 is last,
    /// probe-induced `SIGSTOP` events are in the middle, and events drained
    /// in step 3 are first (spec §4.E.4, design note on event ordering).
    pub fn wait_all_and_disarm(
        &self,
        threads: &mut ThreadTable,
        breakpoints: &BreakpointTable,
        pid: Pid,
    ) -> Result<Vec<ThreadStatus>> {
        let primary = match self.kernel.wait_any(true) {
            Some(Ok(ev)) => ev,
            Some(Err(e)) => return Err(e),
            None => return Err(TraceError::WaitFailed(nix::errno::Errno::UnknownErrno)),
        };

        let mut events = vec![primary];

        for tid in threads.tids().collect::<Vec<_>>() {
            if tid == primary.tid {
                continue;
            }
            if self.kernel.get_regs(tid).is_err() {
                // Thread was still running: interrupt and collect its stop.
                // The C original ignores failures here; a thread that races
                // past exit between the probe and the kill must not abort
                // the whole disarm.
                if let Err(e) = self.kernel.tgkill(pid, tid, Signal::SIGSTOP) {
                    warn!("tgkill failed for thread {}: {}", tid, e);
                    continue;
                }
                match self.kernel.wait_tid(tid, true) {
                    Ok(ev) => events.insert(0, ev),
                    Err(e) => warn!("wait_tid failed for thread {}: {}", tid, e),
                }
            }
            // Else: already in ptrace-stop; its status (if any) was already
            // consumed by one of the waits above.
        }

        while let Some(res) = self.kernel.wait_any(false) {
            match res {
                Ok(ev) => events.insert(0, ev),
                Err(_) => break,
            }
        }

        for (tid, regs) in threads.iter_mut() {
            if let Ok(fresh) = self.kernel.get_regs(tid) {
                *regs = fresh;
            }
            // A failure here means the thread has exited; the caller
            // removes it from the table on receipt of its exit event.
        }

        breakpoints.disarm_all(&self.kernel, pid)?;

        Ok(events)
    }
}
