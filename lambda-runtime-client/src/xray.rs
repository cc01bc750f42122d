//! X-Ray trace id generation.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Generate a fresh X-Ray trace id.
///
/// The format is `1-<epoch seconds as 8 hex digits>-<96 random bits as 24 hex
/// digits>`, all lowercase.
pub fn generate_trace_id() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default() as u32;
    let random = Uuid::new_v4().as_u128() & ((1u128 << 96) - 1);
    format!("1-{seconds:08x}-{random:024x}")
}
