use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 32-bit FNV-1a. Used by the ip_hash / uri_hash pools so that the same
/// key always lands on the same backend index for a fixed pool size.
pub fn fnv1a_32(s: &str) -> u32 {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;

    let mut hash = OFFSET_BASIS;
    for byte in s.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate an `X-Request-ID` value:
/// `hex(timestamp_ms low 32)-hex(4 random bytes)-hex(counter low 32)`.
///
/// The process-wide counter keeps ids unique within its low-32-bit
/// window even if two requests share a millisecond and a random draw.
pub fn generate_request_id() -> String {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let random: u32 = rand::thread_rng().gen();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

    format!(
        "{:08x}-{:08x}-{:08x}",
        timestamp_ms as u32,
        random,
        counter as u32
    )
}
