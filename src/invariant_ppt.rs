//! Runtime invariant checking with contract-test support
//!
//! Production code checks its invariants through [`check_invariant!`]: a
//! violated invariant is logged at error level and returned as
//! [`CaptureError::InternalInvariantViolation`] so the caller tears the
//! session down instead of the process unwinding on an engine thread.
//!
//! Every checked invariant is recorded, so tests can assert that a code path
//! really exercised the invariants it claims to guard:
//!
//! ```rust,ignore
//! use camera_bridge::invariant_ppt::contract_test;
//!
//! #[test]
//! fn contract_session_generations() {
//!     // ... drive a session ...
//!     contract_test("session generations", &[
//!         "generation strictly increases on start",
//!     ]);
//! }
//! ```

use crate::errors::{CaptureError, Stage};
use std::collections::HashSet;
use std::sync::Mutex;

lazy_static::lazy_static! {
    // Engine callbacks run on foreign threads, so the log is process-wide.
    static ref INVARIANT_LOG: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

/// Check an invariant, returning `Err(InternalInvariantViolation)` when it fails.
#[macro_export]
macro_rules! check_invariant {
    ($condition:expr, $stage:expr, $message:expr) => {
        $crate::invariant_ppt::__check_invariant_impl($condition, $stage, $message)
    };
}

#[doc(hidden)]
pub fn __check_invariant_impl(
    condition: bool,
    stage: Stage,
    message: &str,
) -> Result<(), CaptureError> {
    INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(message.to_string());

    if condition {
        return Ok(());
    }

    log::error!("INVARIANT VIOLATION [{}]: {}", stage, message);
    Err(CaptureError::InternalInvariantViolation {
        stage,
        message: message.to_string(),
    })
}

/// Assert that every listed invariant was checked at least once in this process.
///
/// # Panics
/// Panics listing the invariants that were never checked.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let log = INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();

    let missing: Vec<&str> = required_invariants
        .iter()
        .filter(|invariant| !log.contains(**invariant))
        .copied()
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

/// Whether an invariant has been checked in this process.
pub fn was_checked(message: &str) -> bool {
    INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .contains(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passing_invariant_is_recorded() {
        assert!(check_invariant!(true, Stage::Start, "test invariant holds").is_ok());
        assert!(was_checked("test invariant holds"));
        contract_test("recorded", &["test invariant holds"]);
    }

    #[test]
    fn test_failing_invariant_returns_typed_error() {
        let err = check_invariant!(false, Stage::Stream, "test invariant breaks").unwrap_err();
        assert_eq!(err.code(), "internal_invariant_violation");
        assert_eq!(err.stage(), Stage::Stream);
        assert!(err.to_string().contains("test invariant breaks"));
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE")]
    fn test_contract_reports_unchecked_invariants() {
        contract_test("missing", &["an invariant nobody checks"]);
    }
}
