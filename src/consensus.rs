//! Consensus among validators.
//!
//! | validators | consensus when        |
//! |------------|-----------------------|
//! | 0          | never                 |
//! | 1          | it passes             |
//! | 2          | both pass             |
//! | 3+         | at least two pass     |
//!
//! Only the PASS/FAIL status counts; completeness scores never do.

use crate::validation::ValidationResult;

/// Passes required for `validator_count` validators, or `None` if consensus is impossible.
pub fn required_passes(validator_count: usize) -> Option<usize> {
    match validator_count {
        0 => None,
        1 => Some(1),
        // Both of two, or a majority floor of two for three or more
        _ => Some(2),
    }
}

pub fn consensus_reached(validator_count: usize, pass_count: usize) -> bool {
    required_passes(validator_count).is_some_and(|needed| pass_count >= needed)
}

/// Whether the verdicts of one cycle reach consensus.
pub fn has_consensus(results: &[ValidationResult]) -> bool {
    let passes = results.iter().filter(|r| r.passed()).count();
    consensus_reached(results.len(), passes)
}
