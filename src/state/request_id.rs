use std::sync::atomic::{AtomicU64, Ordering};

use http::{HeaderMap, HeaderName};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const MAX_REQUEST_ID_LEN: usize = 128;

/// Cheap unique ids: a random per-process seed XOR a counter, shaped as a UUID.
#[derive(Debug)]
pub struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    #[must_use]
    pub(crate) fn request_uuid(&self, request_seq: u64) -> uuid::Uuid {
        uuid::Uuid::from_u128(self.seed ^ u128::from(request_seq))
    }

    #[must_use]
    pub fn next_id(&self) -> String {
        self.request_uuid(self.next_seq()).to_string()
    }

    /// The caller's `X-Request-ID` when it is usable, a fresh id otherwise.
    #[must_use]
    pub fn resolve(&self, headers: &HeaderMap) -> String {
        headers
            .get(X_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| is_usable_request_id(id))
            .map_or_else(|| self.next_id(), str::to_string)
    }
}

fn is_usable_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id.bytes().all(|b| b.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let generator = RequestIdGenerator::new();
        let first = generator.next_id();
        let second = generator.next_id();
        assert_ne!(first, second);
        assert_eq!(first.len(), 36);
    }

    #[test]
    fn test_resolve_honours_header() {
        let generator = RequestIdGenerator::new();
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, "trace-abc-123".parse().unwrap());
        assert_eq!(generator.resolve(&headers), "trace-abc-123");
    }

    #[test]
    fn test_resolve_rejects_unusable_header() {
        let generator = RequestIdGenerator::new();
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, "has space".parse().unwrap());
        let resolved = generator.resolve(&headers);
        assert_ne!(resolved, "has space");
        assert_eq!(resolved.len(), 36);
        assert_eq!(generator.resolve(&HeaderMap::new()).len(), 36);
    }
}
