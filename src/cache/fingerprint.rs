// Cache fingerprinting
//
// Key = SHA-256(tenant ":" definition ":" canonical_json(input)), truncated
// to 32 hex chars. Object keys are sorted recursively; arrays keep order.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 32;

/// Serialize `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // A string always serializes.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Deterministic cache fingerprint for one call.
pub fn fingerprint(tenant_id: &str, definition_id: &str, input: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b":");
    hasher.update(definition_id.as_bytes());
    hasher.update(b":");
    hasher.update(canonical_json(input).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..FINGERPRINT_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":{"y":[1,2],"x":"s"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":{"x":"s","y":[1,2]},"a":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(fingerprint("t", "d", &a), fingerprint("t", "d", &b));
    }

    #[test]
    fn test_array_order_matters() {
        let a = json!({"tags": [1, 2]});
        let b = json!({"tags": [2, 1]});
        assert_ne!(fingerprint("t", "d", &a), fingerprint("t", "d", &b));
    }

    #[test]
    fn test_value_changes_fingerprint() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"a": 1, "b": 3});
        let c = json!({"a": 1, "b": "2"});
        let fa = fingerprint("t", "d", &a);
        assert_ne!(fa, fingerprint("t", "d", &b));
        assert_ne!(fa, fingerprint("t", "d", &c));
    }

    #[test]
    fn test_scope_changes_fingerprint() {
        let input = json!({"a": 1});
        let base = fingerprint("tenant-1", "def-1", &input);
        assert_ne!(base, fingerprint("tenant-2", "def-1", &input));
        assert_ne!(base, fingerprint("tenant-1", "def-2", &input));
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint("t", "d", &json!(null));
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_canonical_escapes_keys() {
        let v = json!({"quo\"te": "x"});
        assert_eq!(canonical_json(&v), r#"{"quo\"te":"x"}"#);
    }
}
