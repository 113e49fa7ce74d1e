// ETHDFS — ENGINE: RUNTIME MODULE
// Infrastructure that supports the engine but isn't the protocol itself:
// fatal exit diagnostics, the monotonic clock and 55 ms tick the transport
// times out against, and the single-instance lock guarding install/unload.

use std::io::Write;
use std::path::{Path, PathBuf};

// ============================================================================
// FATAL EXIT + DIAGNOSTIC ERROR CODES
// ============================================================================

// Convention: 0x10-0x1F = Boot, 0x20-0x2F = Lifecycle, 0x30-0x3F = Network

pub const E_ALREADY_LOADED: i32 = 0x10;
pub const E_LOCK_FAIL: i32 = 0x11;
pub const E_NO_PKTDRV: i32 = 0x12;
pub const E_NO_MAC: i32 = 0x13;
pub const E_NOT_LOADED: i32 = 0x20;
pub const E_UNLOAD_FAIL: i32 = 0x21;
pub const E_NO_SERVER: i32 = 0x30;

/// Structured fatal exit. Prints a fixed-format diagnostic line, then exits
/// with status 1 (the CLI contract reserves nonzero exit for all failures;
/// the hex code identifies the failure in the message instead).
pub fn fatal(code: i32, msg: &str) -> ! {
    eprintln!("[ETHDFS FATAL 0x{:02X}] {}", code, msg);
    std::process::exit(1);
}

// ============================================================================
// CLOCK
// ============================================================================

#[inline(always)]
pub fn clock_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: FFI call with valid mutable reference to timespec.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Transport timeout tick period. The reply wait expires once this tick has
/// advanced by two, giving the ~100 ms per-attempt window.
pub const TICK_NS: u64 = 55_000_000;

/// Low byte of the wall-clock tick counter. Wraps; compare with
/// wrapping_sub only.
#[inline(always)]
pub fn tick8() -> u8 {
    (clock_ns() / TICK_NS) as u8
}

// ============================================================================
// INSTANCE LOCK (install/unload guard)
// ============================================================================

/// File signature identifying a resident ethdfs instance.
const LOCK_SIG: &[u8; 4] = b"EDFS";

/// Single-instance guard. One resident engine per machine: install claims
/// the lock, unload locates the owner through it. The file holds the 4-byte
/// signature followed by the owner's pid in ASCII.
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join("ethdfs.lock")
    }

    /// Claim the lock, evicting a stale one whose owner is gone.
    /// Returns None if another instance is alive, or if the file belongs to
    /// some other program (wrong signature).
    pub fn acquire(path: &Path) -> Option<InstanceLock> {
        if let Ok(data) = std::fs::read(path) {
            if data.len() >= 4 && &data[..4] != LOCK_SIG {
                return None;
            }
            if let Some(pid) = Self::owner(path) {
                // SAFETY: kill with signal 0 only probes for process existence.
                let alive = unsafe { libc::kill(pid, 0) } == 0;
                if alive {
                    return None;
                }
            }
            let _ = std::fs::remove_file(path);
        }
        let mut f = std::fs::File::create(path).ok()?;
        // SAFETY: getpid has no preconditions.
        let pid = unsafe { libc::getpid() };
        f.write_all(LOCK_SIG).ok()?;
        write!(f, "{}", pid).ok()?;
        Some(InstanceLock { path: path.to_path_buf() })
    }

    /// Pid of the instance owning the lock, if the signature checks out.
    /// A wrong signature means some other program owns the file; treat that
    /// as "not loaded" rather than clobbering it.
    pub fn owner(path: &Path) -> Option<libc::pid_t> {
        let data = std::fs::read(path).ok()?;
        if data.len() < 5 || &data[..4] != LOCK_SIG {
            return None;
        }
        std::str::from_utf8(&data[4..]).ok()?.trim().parse().ok()
    }

    pub fn release(self) {
        let _ = std::fs::remove_file(&self.path);
        std::mem::forget(self);
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let a = clock_ns();
        let b = clock_ns();
        assert!(b >= a);
    }

    #[test]
    fn tick_matches_clock_period() {
        let t = tick8();
        let expect = (clock_ns() / TICK_NS) as u8;
        assert!(expect.wrapping_sub(t) <= 1);
    }

    #[test]
    fn lock_acquire_release() {
        let path = std::env::temp_dir().join("ethdfs-test-a.lock");
        let _ = std::fs::remove_file(&path);
        let lock = InstanceLock::acquire(&path).unwrap();
        // SAFETY: getpid has no preconditions.
        assert_eq!(InstanceLock::owner(&path), Some(unsafe { libc::getpid() }));
        // we are alive, so a second claim must fail
        assert!(InstanceLock::acquire(&path).is_none());
        lock.release();
        assert!(InstanceLock::owner(&path).is_none());
    }

    #[test]
    fn lock_evicts_stale_owner() {
        let path = std::env::temp_dir().join("ethdfs-test-b.lock");
        std::fs::write(&path, b"EDFS999999999").unwrap();
        // pid 999999999 cannot exist (above kernel pid_max)
        let lock = InstanceLock::acquire(&path).unwrap();
        lock.release();
    }

    #[test]
    fn lock_refuses_foreign_file() {
        let path = std::env::temp_dir().join("ethdfs-test-c.lock");
        std::fs::write(&path, b"not an ethdfs lock").unwrap();
        assert!(InstanceLock::owner(&path).is_none());
        assert!(InstanceLock::acquire(&path).is_none());
        let _ = std::fs::remove_file(&path);
    }
}
