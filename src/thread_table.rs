//! Thread Table (component C): tid -> cached register snapshot.

use std::collections::HashMap;

use libc::user_regs_struct;
use nix::unistd::Pid;

use crate::error::Result;
use crate::kernel::KernelTrace;

/// Process-wide cache of each tracee thread's general-purpose registers.
///
/// Registers are opaque here (spec §9): only `arch` reads the instruction
/// pointer out of them.
#[derive(Debug, Default)]
pub struct ThreadTable {
    threads: HashMap<Pid, user_regs_struct>,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// If `tid` is already present, return its cached snapshot without
    /// touching the kernel. Otherwise read the kernel's current register
    /// state and insert it.
    pub fn register<K: KernelTrace>(&mut self, kernel: &K, tid: Pid) -> Result<&user_regs_struct> {
        match self.threads.entry(tid) {
            std::collections::hash_map::Entry::Occupied(e) => Ok(e.into_mut()),
            std::collections::hash_map::Entry::Vacant(e) => {
                let regs = kernel.get_regs(tid)?;
                Ok(e.insert(regs))
            }
        }
    }

    pub fn unregister(&mut self, tid: Pid) {
        self.threads.remove(&tid);
    }

    pub fn get(&self, tid: Pid) -> Option<&user_regs_struct> {
        self.threads.get(&tid)
    }

    pub fn get_mut(&mut self, tid: Pid) -> Option<&mut user_regs_struct> {
        self.threads.get_mut(&tid)
    }

    pub fn contains(&self, tid: Pid) -> bool {
        self.threads.contains_key(&tid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pid, &user_regs_struct)> {
        self.threads.iter().map(|(tid, regs)| (*tid, regs))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Pid, &mut user_regs_struct)> {
        self.threads.iter_mut().map(|(tid, regs)| (*tid, regs))
    }

    pub fn tids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.threads.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn clear(&mut self) {
        self.threads.clear();
    }
}
