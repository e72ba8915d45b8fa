//! `MockTrace`: an in-memory simulated tracee for exercising `engine`,
//! `thread_table`, and `breakpoint_table` without a real kernel or child
//! process (SPEC_FULL.md §D).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use libc::user_regs_struct;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::error::{Result, TraceError};
use crate::kernel::{KernelTrace, TraceOptions};
use crate::wait_status::ThreadStatus;

fn zero_regs() -> user_regs_struct {
    unsafe { std::mem::zeroed() }
}

fn sigtrap_stop() -> i32 {
    (Signal::SIGTRAP as i32) << 8 | 0x7f
}

fn sigstop_stop() -> i32 {
    (Signal::SIGSTOP as i32) << 8 | 0x7f
}

/// A simulated tracee. Every method that the real `LinuxPtrace` performs as
/// a syscall instead mutates these maps and appends a label to `log`, so
/// tests can assert both on state and on call ordering (§8 testable
/// properties 4 and 6).
#[derive(Default)]
pub struct MockTrace {
    memory: RefCell<HashMap<u64, u64>>,
    regs: RefCell<HashMap<Pid, user_regs_struct>>,
    stopped: RefCell<HashSet<Pid>>,
    /// Per-tid queue of instruction pointers single_step should advance to.
    /// An empty queue means "IP does not advance" (hardware-breakpoint loop,
    /// §8 property 7).
    step_program: RefCell<HashMap<Pid, VecDeque<u64>>>,
    wait_queue: RefCell<HashMap<Pid, VecDeque<i32>>>,
    any_queue: RefCell<VecDeque<(Pid, i32)>>,
    tgkill_fails: RefCell<HashSet<Pid>>,
    pub log: RefCell<Vec<String>>,
}

impl MockTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_memory(&self, addr: u64, word: u64) {
        self.memory.borrow_mut().insert(addr, word);
    }

    pub fn read_memory(&self, addr: u64) -> u64 {
        *self.memory.borrow().get(&addr).unwrap_or(&0)
    }

    pub fn set_regs_for(&self, tid: Pid, rip: u64) {
        let mut regs = zero_regs();
        regs.rip = rip;
        self.regs.borrow_mut().insert(tid, regs);
        self.stopped.borrow_mut().insert(tid);
    }

    pub fn mark_running(&self, tid: Pid) {
        self.stopped.borrow_mut().remove(&tid);
    }

    /// Queue the IPs that consecutive `single_step` calls on `tid` will
    /// land on. Skip an entry (repeat the previous IP) to simulate a step
    /// that doesn't advance (a hardware breakpoint).
    pub fn queue_steps(&self, tid: Pid, ips: impl IntoIterator<Item = u64>) {
        self.step_program
            .borrow_mut()
            .entry(tid)
            .or_default()
            .extend(ips);
    }

    pub fn queue_wait_status(&self, tid: Pid, status: i32) {
        self.wait_queue
            .borrow_mut()
            .entry(tid)
            .or_default()
            .push_back(status);
    }

    pub fn queue_any(&self, tid: Pid, status: i32) {
        self.any_queue.borrow_mut().push_back((tid, status));
    }

    /// Simulate a thread that has already exited by the time it's probed:
    /// its `tgkill` returns `NoSuchThread` instead of succeeding.
    pub fn fail_tgkill(&self, tid: Pid) {
        self.tgkill_fails.borrow_mut().insert(tid);
    }

    fn log(&self, entry: impl Into<String>) {
        self.log.borrow_mut().push(entry.into());
    }
}

impl KernelTrace for MockTrace {
    fn trace_me(&self) -> Result<()> {
        self.log("TraceMe");
        Ok(())
    }

    fn attach(&self, pid: Pid) -> Result<()> {
        self.log(format!("Attach({})", pid));
        self.stopped.borrow_mut().insert(pid);
        Ok(())
    }

    fn detach(&self, pid: Pid) -> Result<()> {
        self.log(format!("Detach({})", pid));
        Ok(())
    }

    fn set_options(&self, pid: Pid, _options: TraceOptions) -> Result<()> {
        self.log(format!("SetOptions({})", pid));
        Ok(())
    }

    fn peek_data(&self, _pid: Pid, addr: u64) -> Result<u64> {
        Ok(self.read_memory(addr))
    }

    fn poke_data(&self, _pid: Pid, addr: u64, word: u64) -> Result<()> {
        self.log(format!("PokeData({:#x}, {:#x})", addr, word));
        self.write_memory(addr, word);
        Ok(())
    }

    fn peek_user(&self, _pid: Pid, off: u64) -> Result<u64> {
        Ok(self.read_memory(off))
    }

    fn poke_user(&self, _pid: Pid, off: u64, word: u64) -> Result<()> {
        self.write_memory(off, word);
        Ok(())
    }

    fn get_event_msg(&self, _pid: Pid) -> Result<u64> {
        Ok(0)
    }

    fn get_regs(&self, tid: Pid) -> Result<user_regs_struct> {
        self.log(format!("GetRegs({})", tid));
        if self.stopped.borrow().contains(&tid) {
            Ok(*self
                .regs
                .borrow()
                .get(&tid)
                .unwrap_or(&zero_regs()))
        } else {
            Err(TraceError::NotStopped { tid })
        }
    }

    fn set_regs(&self, tid: Pid, regs: &user_regs_struct) -> Result<()> {
        self.log(format!("SetRegs({})", tid));
        self.regs.borrow_mut().insert(tid, *regs);
        Ok(())
    }

    fn single_step(&self, tid: Pid) -> Result<()> {
        self.log(format!("SingleStep({})", tid));
        let next_ip = self
            .step_program
            .borrow_mut()
            .get_mut(&tid)
            .and_then(|q| q.pop_front());
        if let Some(ip) = next_ip {
            if let Some(regs) = self.regs.borrow_mut().get_mut(&tid) {
                regs.rip = ip;
            }
        }
        self.stopped.borrow_mut().insert(tid);
        Ok(())
    }

    fn cont(&self, tid: Pid) -> Result<()> {
        self.log(format!("Continue({})", tid));
        self.stopped.borrow_mut().remove(&tid);
        Ok(())
    }

    fn wait_tid(&self, tid: Pid, _blocking: bool) -> Result<ThreadStatus> {
        self.log(format!("Wait({})", tid));
        let status = self
            .wait_queue
            .borrow_mut()
            .get_mut(&tid)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(sigtrap_stop);
        self.stopped.borrow_mut().insert(tid);
        Ok(ThreadStatus { tid, status })
    }

    fn wait_any(&self, _blocking: bool) -> Option<Result<ThreadStatus>> {
        self.log("WaitAny");
        let (tid, status) = self.any_queue.borrow_mut().pop_front()?;
        self.stopped.borrow_mut().insert(tid);
        Some(Ok(ThreadStatus { tid, status }))
    }

    fn tgkill(&self, _pid: Pid, tid: Pid, sig: Signal) -> Result<()> {
        self.log(format!("tgkill({}, {:?})", tid, sig));
        if self.tgkill_fails.borrow().contains(&tid) {
            return Err(TraceError::NoSuchThread { tid });
        }
        if sig == Signal::SIGSTOP {
            self.queue_wait_status(tid, sigstop_stop());
        }
        Ok(())
    }
}
