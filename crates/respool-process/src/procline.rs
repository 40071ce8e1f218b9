//! Process-title and hostname helpers.
//!
//! The supervisor advertises its lifecycle through the process title
//! (`(starting)`, `managing [pids…]`, …) and tags workers so the job family
//! is discoverable in the process table. Titles are pushed into the kernel
//! comm name via `prctl(PR_SET_NAME)`, which keeps the first 15 bytes; the
//! full title is emitted as a log event so nothing is lost to truncation.

use std::ffi::CString;

use nix::sys::prctl;
use tracing::debug;

/// Comm-name prefix shared by the master and every worker.
///
/// Orphan detection matches on this prefix, so it must fit inside the
/// 15-byte comm name along with nothing else in front of it.
pub const FAMILY_COMM_PREFIX: &str = "resque-pool";

/// Set the current process title.
///
/// Interior NUL bytes would make the title unrepresentable; such titles are
/// ignored rather than failing the caller (the title is advisory).
pub fn set_title(title: &str) {
    debug!("procline: {}", title);
    if let Ok(name) = CString::new(title) {
        let _ = prctl::set_name(&name);
    }
}

/// This machine's hostname, as used for job-registry lookups.
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_is_nonempty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_title_with_interior_nul_is_ignored() {
        // Must not panic or error.
        set_title("bad\0title");
    }

    #[test]
    fn test_family_prefix_fits_comm_name() {
        // prctl keeps 15 bytes plus the terminator.
        assert!(FAMILY_COMM_PREFIX.len() <= 15);
    }
}
