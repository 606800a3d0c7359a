//! Domain layer: money, fee rules, settlement records with their state machines,
//! and the ports the application layer drives.

pub mod fees;
pub mod money;
pub mod negotiation;
pub mod payment;
pub mod ports;
pub mod receipt;
pub mod work_order;

use chrono::{DateTime, Utc};
use rand::Rng;

const REFERENCE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Human-readable record number, e.g. `RCT-1718000000000-4F7K2Q`.
pub fn reference_number(prefix: &str, now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}-{}", prefix, now.timestamp_millis(), suffix)
}
