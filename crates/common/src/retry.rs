/*!
 * Retry Backoff Arithmetic
 */

use rand::Rng;
use std::time::Duration;

/// Calculate exponential backoff with jitter
///
/// Formula: min(base * 2^attempt, max) + jitter
/// Jitter: up to +20% randomness to prevent thundering herd
///
/// # Arguments
///
/// * `attempt` - Current attempt number (0-indexed)
/// * `base_delay_secs` - Base delay in seconds (e.g., 5)
/// * `max_delay_secs` - Maximum delay in seconds (e.g., 600)
pub fn calculate_backoff(attempt: u32, base_delay_secs: u64, max_delay_secs: u64) -> Duration {
    let exponential_delay = base_delay_secs.saturating_mul(2u64.saturating_pow(attempt));

    let capped_delay = exponential_delay.min(max_delay_secs);

    // Additive, up to +20%: the delay never undershoots the schedule the
    // caller was promised.
    let mut rng = rand::thread_rng();
    let jitter_factor = rng.gen_range(1.0..1.2);
    let delay_with_jitter = (capped_delay as f64 * jitter_factor) as u64;

    Duration::from_secs(delay_with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        // Attempt 0: 5s plus jitter
        let delay0 = calculate_backoff(0, 5, 600);
        assert!(delay0.as_secs() >= 5 && delay0.as_secs() <= 6);

        // Attempt 1: 10s plus jitter
        let delay1 = calculate_backoff(1, 5, 600);
        assert!(delay1.as_secs() >= 10 && delay1.as_secs() <= 12);

        // Attempt 3: 40s plus jitter
        let delay3 = calculate_backoff(3, 5, 600);
        assert!(delay3.as_secs() >= 40 && delay3.as_secs() <= 48);
    }

    #[test]
    fn test_backoff_never_undershoots_the_base() {
        for _ in 0..50 {
            assert!(calculate_backoff(0, 5, 600).as_secs() >= 5);
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let delay = calculate_backoff(30, 5, 600);
        assert!(delay.as_secs() >= 600 && delay.as_secs() <= 720); // 600s + up to 20%
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let delay = calculate_backoff(u32::MAX, u64::MAX, 600);
        assert!(delay.as_secs() <= 720);
    }
}
