//! Collision-resistant object keys: `{millis}-{suffix}.{ext}`.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RANDOM_LEN: usize = 11;

/// Per-process counter folded into every suffix, so two keys minted in the
/// same millisecond never match even if the random part does.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Extension of `file_name` as written (case preserved), if any.
pub fn extension(file_name: &str) -> Option<&str> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && !ext.contains(['/', '\\']))
}

/// Key for an uploaded file, stamped with the current time.
pub fn object_key(file_name: &str) -> String {
    object_key_at(file_name, chrono::Utc::now().timestamp_millis())
}

pub fn object_key_at(file_name: &str, millis: i64) -> String {
    match extension(file_name) {
        Some(ext) => format!("{}-{}.{}", millis, unique_suffix(), ext),
        None => format!("{}-{}", millis, unique_suffix()),
    }
}

/// Key for the storage self-test object.
pub fn test_object_key() -> String {
    format!("test-{}-{}.txt", chrono::Utc::now().timestamp_millis(), unique_suffix())
}

fn unique_suffix() -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut suffix = to_base36(seq);
    let mut rng = rand::rng();
    suffix.extend((0..RANDOM_LEN).map(|_| BASE36[rng.random_range(0..BASE36.len())] as char));
    suffix
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keeps_extension_case() {
        let key = object_key_at("report.PDF", 1_736_185_612_000);
        assert!(key.starts_with("1736185612000-"));
        assert!(key.ends_with(".PDF"));
    }

    #[test]
    fn same_name_same_millisecond_never_collides() {
        let keys: HashSet<String> = (0..1000).map(|_| object_key_at("report.PDF", 42)).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn extension_edge_cases() {
        assert_eq!(extension("archive.tar.gz"), Some("gz"));
        assert_eq!(extension("README"), None);
        assert_eq!(extension("trailing."), None);
        assert!(!object_key_at("README", 1).contains('.'));
    }

    #[test]
    fn base36_digits() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_keys_are_text_files() {
        let key = test_object_key();
        assert!(key.starts_with("test-"));
        assert!(key.ends_with(".txt"));
    }
}
