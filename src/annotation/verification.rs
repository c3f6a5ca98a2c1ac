//! Decorative "verified" badge data shown next to an annotation.
//!
//! The hash is a timestamp plus random characters. It proves nothing about the
//! document or the signer and must never be used for integrity checks.

use chrono::{Local, SecondsFormat, Utc};
use serde::Serialize;

const HASH_LEN: usize = 16;

/// Display-only record attached to an annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRecord {
    pub hash: String,
    /// RFC 3339 UTC timestamp
    pub timestamp: String,
    /// Local UTC offset, e.g. `+02:00`
    pub timezone: String,
    /// Human readable local time
    pub formatted: String,
    pub verified_by: String,
}

impl VerificationRecord {
    /// Build a record stamped with the current time
    pub fn cosmetic(verified_by: &str) -> Self {
        let now = Utc::now();
        let local = now.with_timezone(&Local);

        Self {
            hash: pseudo_hash(now.timestamp_millis()),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            timezone: local.format("%:z").to_string(),
            formatted: local.format("%m/%d/%Y, %I:%M:%S %p %:z").to_string(),
            verified_by: verified_by.to_string(),
        }
    }
}

fn pseudo_hash(millis: i64) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    let mut hash = format!("{}_{}", millis, random);
    hash.truncate(HASH_LEN);
    hash
}
