//! Request fingerprinting for diagnostics

use sha2::{Digest, Sha256};

use crate::request::Request;

/// Compute SHA-256 fingerprint of a request
///
/// The fingerprint includes:
/// 1. Method
/// 2. URI (already normalized)
/// 3. Headers (sorted, names lower-cased)
/// 4. Body
///
/// Fingerprints identify a request shape in log output. Matching never uses them;
/// that is the job of the matcher registry.
#[must_use]
pub fn fingerprint_request(request: &Request) -> [u8; 32] {
    let mut hasher = Sha256::new();

    // 1. Method
    let method = request.method.as_str();
    hasher.update((method.len() as u32).to_le_bytes());
    hasher.update(method.as_bytes());

    // 2. URI
    hasher.update((request.uri.len() as u32).to_le_bytes());
    hasher.update(request.uri.as_bytes());

    // 3. Headers (sorted, normalized)
    for (name, values) in request.headers.normalized() {
        hasher.update((name.len() as u32).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((values.len() as u32).to_le_bytes());
        for value in values {
            hasher.update((value.len() as u32).to_le_bytes());
            hasher.update(value.as_bytes());
        }
    }

    // 4. Body
    let body = request.body.as_deref().unwrap_or_default();
    hasher.update((body.len() as u32).to_le_bytes());
    hasher.update(body);

    hasher.finalize().into()
}

/// Short hex form of a request fingerprint for log lines
#[must_use]
pub fn short_fingerprint(request: &Request) -> String {
    hex::encode(&fingerprint_request(request)[..8])
}
