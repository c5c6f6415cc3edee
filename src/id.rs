//! ID generation utilities for evalq
//!
//! Result ids are generated here when a submission arrives without one.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a unique result ID
///
/// Format: `res-{timestamp_ms}-{random_hex}`
/// Example: `res-1738300800123-a1b2c3d4`
pub fn generate_result_id() -> String {
    let timestamp = now_ms();
    let random: u32 = rand::rng().random();
    format!("res-{}-{:08x}", timestamp, random)
}
