//! Millisecond timestamps as used by `sync`, `mouse`, and `key`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch. Signed to allow arithmetic on
/// differences without casts.
pub type Timestamp = i64;

/// Current wall-clock time in protocol units.
pub fn current_timestamp() -> Timestamp {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as Timestamp,
        // Clock before the epoch; treat as the epoch itself.
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone_within_call_pair() {
        let a = current_timestamp();
        let b = current_timestamp();
        assert!(b >= a);
        assert!(a > 1_500_000_000_000);
    }
}
