//! Opaque identifiers for messages and sessions.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0_u8; bytes];
    if getrandom::fill(&mut buf).is_err() {
        // Entropy source unavailable; a process-local counter still keeps ids unique.
        let counter = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        for (i, byte) in buf.iter_mut().enumerate() {
            let source = if i < 8 { nanos } else { counter };
            *byte = (source >> ((i % 8) * 8)) as u8;
        }
    }
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// Message ids sort by creation time and carry 64 random bits.
pub fn new_message_id() -> String {
    format!("{:x}-{}", Utc::now().timestamp_millis(), random_hex(8))
}

pub fn new_session_id() -> String {
    format!("session-{}", random_hex(16))
}
