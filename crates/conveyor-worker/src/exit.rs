//! Subprocess exit-code classification (spec §4.7).
//!
//! A process killed by a signal (`ExitStatus::code()` returns `None`) is
//! treated as a transient failure — the machine may have been rebooted or
//! OOM-killed mid-task. Any non-zero exit code is terminal: the script ran
//! to completion and said no.

use conveyor_core::FailureKind;

/// Classifies a finished subprocess's exit code. Callers must not call this
/// for a `Some(0)` (successful) status.
pub fn classify_exit_code(code: Option<i32>) -> FailureKind {
    match code {
        None => FailureKind::Retryable,
        Some(_) => FailureKind::NonRetryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signalled_process_is_retryable() {
        assert_eq!(classify_exit_code(None), FailureKind::Retryable);
    }

    #[test]
    fn nonzero_exit_is_not_retryable() {
        assert_eq!(classify_exit_code(Some(1)), FailureKind::NonRetryable);
        assert_eq!(classify_exit_code(Some(127)), FailureKind::NonRetryable);
    }
}
