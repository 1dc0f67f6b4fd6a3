//! Flush-to-zero and denormals-are-zero floating point mode for the current thread.
//!
//! Subnormal floats are very slow on most CPUs and never matter for inference results,
//! so the forward pass runs with them disabled.

/// Enables flush-to-zero on construction and restores the previous mode on drop.
#[derive(Debug)]
pub struct FlushToZeroGuard {
    previous: u64,
}

impl FlushToZeroGuard {
    pub fn new() -> Self {
        let previous = imp::get();
        imp::set(imp::enable(previous));
        FlushToZeroGuard { previous }
    }
}

impl Drop for FlushToZeroGuard {
    fn drop(&mut self) {
        imp::set(self.previous);
    }
}

/// Whether flush-to-zero is currently enabled, always `false` on platforms without support.
pub fn flush_to_zero_enabled() -> bool {
    let mode = imp::get();
    imp::SUPPORTED && imp::enable(mode) == mode
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod imp {
    use std::arch::asm;

    pub const SUPPORTED: bool = true;

    const FTZ: u64 = 1 << 15;
    const DAZ: u64 = 1 << 6;

    pub fn enable(mode: u64) -> u64 {
        mode | FTZ | DAZ
    }

    pub fn get() -> u64 {
        let mut csr: u32 = 0;
        unsafe {
            asm!("stmxcsr [{}]", in(reg) &mut csr as *mut u32, options(nostack));
        }
        csr as u64
    }

    pub fn set(mode: u64) {
        let csr = mode as u32;
        unsafe {
            asm!("ldmxcsr [{}]", in(reg) &csr as *const u32, options(nostack, readonly));
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod imp {
    use std::arch::asm;

    pub const SUPPORTED: bool = true;

    const FZ: u64 = 1 << 24;

    pub fn enable(mode: u64) -> u64 {
        mode | FZ
    }

    pub fn get() -> u64 {
        let fpcr: u64;
        unsafe {
            asm!("mrs {}, fpcr", out(reg) fpcr, options(nomem, nostack));
        }
        fpcr
    }

    pub fn set(mode: u64) {
        unsafe {
            asm!("msr fpcr, {}", in(reg) mode, options(nomem, nostack));
        }
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
mod imp {
    pub const SUPPORTED: bool = false;

    pub fn enable(mode: u64) -> u64 {
        mode
    }

    pub fn get() -> u64 {
        0
    }

    pub fn set(_: u64) {}
}
