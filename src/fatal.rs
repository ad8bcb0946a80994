//! Process-terminating diagnostics for unrecoverable misuse: bad enums, missing collaborators,
//! out-of-bounds event ids, and inconsistent dimensions are programmer error, not recoverable
//! `Result`s, so they print a single diagnostic line and call `std::process::exit` rather than
//! unwind through user callbacks.

use std::fmt::Display;

/// Logs `msg` at `error` level and terminates the process with a nonzero exit code.
///
/// In a real multi-rank deployment only the first detecting rank need actually print; since the
/// transport's wire format is out of scope here, every rank prints its own diagnostic rather than
/// coordinating silence.
pub fn die(msg: impl Display) -> ! {
    log::error!("{msg}");
    std::process::exit(1)
}

/// Calls [`die`] with `msg` if `cond` is true; otherwise a no-op.
pub fn die_if(cond: bool, msg: impl Display) {
    if cond {
        die(msg);
    }
}
