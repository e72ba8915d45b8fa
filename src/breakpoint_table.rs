//! Breakpoint Table (component D): addr -> {original_word, patched_word, enabled}.

use std::collections::HashMap;

use nix::unistd::Pid;

use crate::arch;
use crate::error::Result;
use crate::kernel::KernelTrace;

/// A single software breakpoint record.
///
/// `original_word` and `patched_word` are fixed at install time (spec
/// invariant 1) and never mutated by `disable`/`enable` — only `enabled`
/// and tracee memory change.
#[derive(Debug, Clone, Copy)]
pub struct Breakpoint {
    pub addr: u64,
    pub original_word: u64,
    pub patched_word: u64,
    pub enabled: bool,
}

#[derive(Debug, Default)]
pub struct BreakpointTable {
    breakpoints: HashMap<u64, Breakpoint>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the word at `addr`, patch it, and write the patched word back.
    /// If a record already exists for `addr`, its stored words are left
    /// untouched and only `enabled` is set — re-reading memory here would
    /// store the already-patched word as "original" (spec §4.D, testable
    /// property 5/6 in §8).
    pub fn install<K: KernelTrace>(&mut self, kernel: &K, pid: Pid, addr: u64) -> Result<()> {
        if let Some(bp) = self.breakpoints.get_mut(&addr) {
            bp.enabled = true;
            return Ok(());
        }

        let original_word = kernel.peek_data(pid, addr)?;
        let patched_word = arch::install_trap(original_word);
        kernel.poke_data(pid, addr, patched_word)?;

        self.breakpoints.insert(
            addr,
            Breakpoint {
                addr,
                original_word,
                patched_word,
                enabled: true,
            },
        );
        Ok(())
    }

    /// Remove the record. Does not touch tracee memory — the caller must
    /// already have ensured the original word is in memory (true under the
    /// all-stopped invariant, spec §3).
    pub fn remove(&mut self, addr: u64) -> Option<Breakpoint> {
        self.breakpoints.remove(&addr)
    }

    /// Mark disabled and write `patched_word` into tracee memory.
    ///
    /// This reproduces the C original's behavior verbatim rather than the
    /// (arguably more sensible) "write `original_word`" — see the Open
    /// Question in spec §9 and the decision recorded in DESIGN.md.
    pub fn disable<K: KernelTrace>(&mut self, kernel: &K, pid: Pid, addr: u64) -> Result<()> {
        if let Some(bp) = self.breakpoints.get_mut(&addr) {
            bp.enabled = false;
            kernel.poke_data(pid, addr, bp.patched_word)?;
        }
        Ok(())
    }

    pub fn get(&self, addr: u64) -> Option<&Breakpoint> {
        self.breakpoints.get(&addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn contains_addr(&self, addr: u64) -> bool {
        self.breakpoints.contains_key(&addr)
    }

    /// Write `patched_word` into tracee memory for every enabled breakpoint
    /// (spec §4.E.3 step 3 — "arm all").
    pub fn arm_all<K: KernelTrace>(&self, kernel: &K, pid: Pid) -> Result<()> {
        for bp in self.breakpoints.values().filter(|b| b.enabled) {
            kernel.poke_data(pid, bp.addr, bp.patched_word)?;
        }
        Ok(())
    }

    /// Write `original_word` into tracee memory for every enabled breakpoint
    /// (spec §4.E.4 step 5 — "disarm all").
    pub fn disarm_all<K: KernelTrace>(&self, kernel: &K, pid: Pid) -> Result<()> {
        for bp in self.breakpoints.values().filter(|b| b.enabled) {
            kernel.poke_data(pid, bp.addr, bp.original_word)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }
}
