//! Reconnect backoff schedule.

use std::time::Duration;

/// Delays stop growing after this many attempts.
const BACKOFF_EXPONENT_CAP: u32 = 5;

/// Delay before reconnect attempt number `attempts` (0-based).
///
/// Grows by a factor of 1.5 per attempt and plateaus once the exponent
/// cap is reached.
pub fn reconnect_delay(base: Duration, attempts: u32) -> Duration {
    let factor = 1.5f64.powi(attempts.min(BACKOFF_EXPONENT_CAP) as i32);
    base.mul_f64(factor)
}
