//! Interrupt state probes.
//!
//! Boot-only code (e.g. arena registration in the physical memory manager)
//! asserts that it runs with interrupts disabled. These helpers read that
//! state without changing it.

/// Bit 9 of `RFLAGS`: interrupt enable flag.
#[cfg(target_arch = "x86_64")]
const RFLAGS_IF: u64 = 1 << 9;

/// Returns the current `RFLAGS` value (via `pushfq/pop`).
///
/// # Platform
///
/// `x86_64`. `pushfq` is unprivileged, so this is callable from any ring.
#[cfg(target_arch = "x86_64")]
#[inline]
#[must_use]
pub fn rflags() -> u64 {
    let r: u64;
    unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(preserves_flags)) }
    r
}

/// Whether maskable interrupts are currently enabled on this CPU.
#[cfg(target_arch = "x86_64")]
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    rflags() & RFLAGS_IF != 0
}

/// Whether maskable interrupts are currently enabled on this CPU.
///
/// Non-x86 builds (host tools, tests on other hosts) have no notion of the
/// kernel's interrupt flag and always report `false`.
#[cfg(not(target_arch = "x86_64"))]
#[inline]
#[must_use]
pub const fn interrupts_enabled() -> bool {
    false
}
