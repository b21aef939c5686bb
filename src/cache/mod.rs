// Response cache: fingerprinting plus a TTL-bearing store

mod fingerprint;
mod store;

pub use fingerprint::{canonical_json, fingerprint, FINGERPRINT_LEN};
pub use store::{CacheEntry, CacheStore, MemoryCacheStore};
