//! Reduce guardrail results to a single admission score in `[0, 1]`.

use crate::guardrails::GuardrailResult;

/// Score deducted for every flag.
pub const FLAG_PENALTY: f64 = 0.2;

/// `0` if any result blocks, otherwise `1 - 0.2 * flags` floored at `0`.
///
/// Order-independent; an empty slice scores `1.0`.
#[must_use]
pub fn score(results: &[GuardrailResult]) -> f64 {
    if results.iter().any(GuardrailResult::is_block) {
        return 0.0;
    }
    let flags = results.iter().filter(|r| r.is_flag()).count();
    #[allow(clippy::cast_precision_loss)]
    let penalty = FLAG_PENALTY * flags as f64;
    (1.0 - penalty).clamp(0.0, 1.0)
}
