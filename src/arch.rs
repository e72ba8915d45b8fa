//! Architecture Adapter (component B).
//!
//! Two pure functions per ISA: read the instruction pointer out of an opaque
//! register snapshot, and patch a machine word so that executing it traps
//! into the tracer. The rest of the crate never interprets `user_regs_struct`
//! directly — only this module does.

/// The one-byte x86/x86_64 software breakpoint opcode (`INT3`).
const INT3: u64 = 0xCC;

/// Extract the instruction pointer from a register snapshot.
#[cfg(target_arch = "x86_64")]
pub fn instruction_pointer(regs: &libc::user_regs_struct) -> u64 {
    regs.rip
}

/// Given the word currently at some address, return the word that replaces
/// its first byte with `INT3`, preserving the remaining bytes.
///
/// Not an involution: feeding the result back in does not recover the
/// original. Callers must keep `original_word` around separately.
#[cfg(target_arch = "x86_64")]
pub fn install_trap(word: u64) -> u64 {
    (word & !0xff) | INT3
}
