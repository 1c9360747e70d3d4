//! Console output levels for a boson run.
//!
//! `-q` leaves errors and the closing "Build succeeded / up to date / failed"
//! line. The default adds one status line per executed action. `-v` adds
//! build plan cache verdicts, outdated reasons, lock diagnostics and phase
//! timings.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// How much a run prints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Errors and the build outcome.
    Quiet = 0,
    /// Plus action status lines.
    Default = 1,
    /// Plus cache and planning diagnostics.
    Verbose = 2,
}

impl Verbosity {
    /// Level selected by the `-q` / `-v` flags; quiet wins.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, true) => Self::Verbose,
            (false, false) => Self::Default,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Quiet,
            2 => Self::Verbose,
            _ => Self::Default,
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(Verbosity::Default as u8);

/// Set the process-wide level from the command-line flags.
pub fn init(quiet: bool, verbose: bool) {
    LEVEL.store(Verbosity::from_flags(quiet, verbose) as u8, Ordering::Relaxed);
}

/// Current level.
pub fn verbosity() -> Verbosity {
    Verbosity::from_raw(LEVEL.load(Ordering::Relaxed))
}

/// Diagnostics are printed.
pub fn is_verbose() -> bool {
    verbosity() >= Verbosity::Verbose
}

/// Only errors and the outcome are printed.
pub fn is_quiet() -> bool {
    verbosity() == Verbosity::Quiet
}

/// Diagnostic line, shown with `-v`:
///
/// ```ignore
/// vprintln!("  build plan cache: {reason}");
/// ```
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            println!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// Progress line, hidden by `-q`:
///
/// ```ignore
/// dprintln!("  [{done}/{total}] {}", action.status_description);
/// ```
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if !$crate::verbose::is_quiet() {
            println!($($arg)*);
        }
    };
}

pub(crate) use dprintln;

/// Reports how long a phase took when dropped, in verbose mode.
pub struct Timer {
    phase: &'static str,
    started: Instant,
}

impl Timer {
    /// Start timing `phase` (e.g. "outdated planning").
    pub fn start(phase: &'static str) -> Self {
        Self {
            phase,
            started: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if is_verbose() {
            println!("  {} took {:.1?}", self.phase, self.started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_flag_wins() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Default);
    }

    #[test]
    fn unknown_raw_level_is_default() {
        for level in [Verbosity::Quiet, Verbosity::Default, Verbosity::Verbose] {
            assert_eq!(Verbosity::from_raw(level as u8), level);
        }
        assert_eq!(Verbosity::from_raw(7), Verbosity::Default);
    }
}
