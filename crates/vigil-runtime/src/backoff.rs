const RECONNECT_BACKOFF_MS: &[u64] = &[1_000, 2_000, 5_000, 15_000, 30_000];

/// Escalating reconnect delay for a failed push subscription. Caps at the
/// last entry.
pub fn reconnect_backoff_ms(consecutive_errors: u32) -> u64 {
    let idx = (consecutive_errors.saturating_sub(1) as usize).min(RECONNECT_BACKOFF_MS.len() - 1);
    RECONNECT_BACKOFF_MS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_escalation() {
        assert_eq!(reconnect_backoff_ms(1), 1_000);
        assert_eq!(reconnect_backoff_ms(2), 2_000);
        assert_eq!(reconnect_backoff_ms(5), 30_000);
        assert_eq!(reconnect_backoff_ms(100), 30_000);
    }

    #[test]
    fn test_zero_errors_uses_first_slot() {
        assert_eq!(reconnect_backoff_ms(0), 1_000);
    }
}
