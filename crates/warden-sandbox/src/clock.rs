//! Wall-clock helpers shared across the workspace.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_unix_millis() {
        let first = now_ms();
        // 2020-01-01T00:00:00Z
        assert!(first > 1_577_836_800_000);
        assert!(now_ms() >= first);
    }
}
