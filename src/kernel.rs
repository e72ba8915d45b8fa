//! Kernel Tracing Facade (component A).
//!
//! A thin, typed wrapper over `ptrace(2)` / `waitpid(2)`. Everything above
//! this module talks to a `KernelTrace` implementation rather than to
//! syscalls directly, which is what lets `engine`, `thread_table`, and
//! `breakpoint_table` be exercised against `MockTrace` in tests without a
//! real tracee.

use std::ptr;

use libc::{c_void, user_regs_struct};
use nix::sys::ptrace::{Options, Request};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::error::{Result, TraceError};
use crate::wait_status::ThreadStatus;

/// Trace options enabled via `set_options`. Defaults to the C original's
/// fixed set (fork, vfork, clone, exec, exit); exposed so an embedder can
/// narrow it (see SPEC_FULL.md §C).
#[derive(Debug, Clone, Copy)]
pub struct TraceOptions(pub Options);

impl Default for TraceOptions {
    fn default() -> Self {
        TraceOptions(
            Options::PTRACE_O_TRACEFORK
                | Options::PTRACE_O_TRACEVFORK
                | Options::PTRACE_O_TRACECLONE
                | Options::PTRACE_O_TRACEEXEC
                | Options::PTRACE_O_TRACEEXIT,
        )
    }
}

/// Everything the Run/Stop Engine and the tables need from the kernel.
///
/// Implemented for real by `LinuxPtrace`; implemented in test code by a
/// `MockTrace` that simulates a tracee's memory and register state.
pub trait KernelTrace {
    fn trace_me(&self) -> Result<()>;
    fn attach(&self, pid: Pid) -> Result<()>;
    fn detach(&self, pid: Pid) -> Result<()>;
    fn set_options(&self, pid: Pid, options: TraceOptions) -> Result<()>;

    fn peek_data(&self, pid: Pid, addr: u64) -> Result<u64>;
    fn poke_data(&self, pid: Pid, addr: u64, word: u64) -> Result<()>;
    fn peek_user(&self, pid: Pid, off: u64) -> Result<u64>;
    fn poke_user(&self, pid: Pid, off: u64, word: u64) -> Result<()>;
    fn get_event_msg(&self, pid: Pid) -> Result<u64>;

    fn get_regs(&self, tid: Pid) -> Result<user_regs_struct>;
    fn set_regs(&self, tid: Pid, regs: &user_regs_struct) -> Result<()>;

    fn single_step(&self, tid: Pid) -> Result<()>;
    fn cont(&self, tid: Pid) -> Result<()>;

    /// `waitpid(tid, blocking)` for a specific thread (§4.E.2/4.E.3/4.E.4).
    fn wait_tid(&self, tid: Pid, blocking: bool) -> Result<ThreadStatus>;
    /// `waitpid(-1, blocking, __WALL)` (§4.E.4 steps 1 and 3).
    fn wait_any(&self, blocking: bool) -> Option<Result<ThreadStatus>>;

    fn tgkill(&self, pid: Pid, tid: Pid, sig: Signal) -> Result<()>;
}

/// Real Linux `ptrace`/`waitpid` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxPtrace;

fn kernel_call(verb: &'static str, tid: Pid, res: nix::Result<()>) -> Result<()> {
    res.map_err(|source| TraceError::KernelCallFailed { verb, tid, source })
}

/// Raw `PTRACE_PEEK*`: the caller must clear errno before the call and check
/// it after, since a legitimate return value can be all-ones (spec §4.A).
fn ptrace_peek(request: Request, pid: Pid, addr: u64) -> Result<u64> {
    let ret = unsafe {
        nix::errno::Errno::clear();
        libc::ptrace(
            request as _,
            libc::pid_t::from(pid),
            addr as *mut c_void,
            ptr::null_mut::<c_void>(),
        )
    };
    match nix::errno::Errno::result(ret) {
        Ok(v) => Ok(v as u64),
        Err(nix::errno::Errno::UnknownErrno) => Ok(ret as u64),
        Err(nix::errno::Errno::EIO) | Err(nix::errno::Errno::EFAULT) => {
            Err(TraceError::BadAddress { addr })
        }
        Err(source) => Err(TraceError::KernelCallFailed {
            verb: "PEEK",
            tid: pid,
            source,
        }),
    }
}

fn ptrace_poke(request: Request, pid: Pid, addr: u64, data: u64) -> Result<()> {
    let ret = unsafe {
        libc::ptrace(
            request as _,
            libc::pid_t::from(pid),
            addr as *mut c_void,
            data as *mut c_void,
        )
    };
    match nix::errno::Errno::result(ret).map(drop) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::EIO) | Err(nix::errno::Errno::EFAULT) => {
            Err(TraceError::BadAddress { addr })
        }
        Err(source) => Err(TraceError::KernelCallFailed {
            verb: "POKE",
            tid: pid,
            source,
        }),
    }
}

impl KernelTrace for LinuxPtrace {
    fn trace_me(&self) -> Result<()> {
        kernel_call("PTRACE_TRACEME", Pid::from_raw(0), nix::sys::ptrace::traceme())
    }

    fn attach(&self, pid: Pid) -> Result<()> {
        kernel_call("PTRACE_ATTACH", pid, nix::sys::ptrace::attach(pid))
    }

    fn detach(&self, pid: Pid) -> Result<()> {
        kernel_call("PTRACE_DETACH", pid, nix::sys::ptrace::detach(pid, None))
    }

    fn set_options(&self, pid: Pid, options: TraceOptions) -> Result<()> {
        kernel_call(
            "PTRACE_SETOPTIONS",
            pid,
            nix::sys::ptrace::setoptions(pid, options.0),
        )
    }

    fn peek_data(&self, pid: Pid, addr: u64) -> Result<u64> {
        ptrace_peek(Request::PTRACE_PEEKDATA, pid, addr)
    }

    fn poke_data(&self, pid: Pid, addr: u64, word: u64) -> Result<()> {
        ptrace_poke(Request::PTRACE_POKEDATA, pid, addr, word)
    }

    fn peek_user(&self, pid: Pid, off: u64) -> Result<u64> {
        ptrace_peek(Request::PTRACE_PEEKUSER, pid, off)
    }

    fn poke_user(&self, pid: Pid, off: u64, word: u64) -> Result<()> {
        ptrace_poke(Request::PTRACE_POKEUSER, pid, off, word)
    }

    fn get_event_msg(&self, pid: Pid) -> Result<u64> {
        nix::sys::ptrace::getevent(pid)
            .map(|v| v as u64)
            .map_err(|source| TraceError::KernelCallFailed {
                verb: "PTRACE_GETEVENTMSG",
                tid: pid,
                source,
            })
    }

    fn get_regs(&self, tid: Pid) -> Result<user_regs_struct> {
        nix::sys::ptrace::getregs(tid).map_err(|source| {
            if source == nix::errno::Errno::ESRCH {
                TraceError::NotStopped { tid }
            } else {
                TraceError::KernelCallFailed {
                    verb: "PTRACE_GETREGS",
                    tid,
                    source,
                }
            }
        })
    }

    fn set_regs(&self, tid: Pid, regs: &user_regs_struct) -> Result<()> {
        nix::sys::ptrace::setregs(tid, *regs).map_err(|source| {
            if source == nix::errno::Errno::ESRCH {
                TraceError::NotStopped { tid }
            } else {
                TraceError::KernelCallFailed {
                    verb: "PTRACE_SETREGS",
                    tid,
                    source,
                }
            }
        })
    }

    fn single_step(&self, tid: Pid) -> Result<()> {
        kernel_call("PTRACE_SINGLESTEP", tid, nix::sys::ptrace::step(tid, None))
    }

    fn cont(&self, tid: Pid) -> Result<()> {
        kernel_call("PTRACE_CONT", tid, nix::sys::ptrace::cont(tid, None))
    }

    fn wait_tid(&self, tid: Pid, blocking: bool) -> Result<ThreadStatus> {
        let mut raw: libc::c_int = 0;
        let flags = if blocking { 0 } else { libc::WNOHANG } | libc::__WALL;
        let ret = unsafe { libc::waitpid(tid.as_raw(), &mut raw, flags) };
        if ret == -1 {
            return Err(TraceError::KernelCallFailed {
                verb: "waitpid",
                tid,
                source: nix::errno::Errno::last(),
            });
        }
        Ok(ThreadStatus {
            tid: Pid::from_raw(ret),
            status: raw,
        })
    }

    fn wait_any(&self, blocking: bool) -> Option<Result<ThreadStatus>> {
        let mut raw: libc::c_int = 0;
        let flags = if blocking { 0 } else { libc::WNOHANG } | libc::__WALL;
        let ret = unsafe { libc::waitpid(-1, &mut raw, flags) };
        if ret == 0 {
            // WNOHANG: nothing ready right now.
            return None;
        }
        if ret == -1 {
            return Some(Err(TraceError::WaitFailed(nix::errno::Errno::last())));
        }
        Some(Ok(ThreadStatus {
            tid: Pid::from_raw(ret),
            status: raw,
        }))
    }

    fn tgkill(&self, pid: Pid, tid: Pid, sig: Signal) -> Result<()> {
        let ret = unsafe {
            libc::syscall(libc::SYS_tgkill, pid.as_raw(), tid.as_raw(), sig as libc::c_int)
        };
        kernel_call("tgkill", tid, nix::errno::Errno::result(ret).map(drop))
    }
}
