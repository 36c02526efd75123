//! Persisted key layout and token hashing.
//!
//! Layout under a root prefix `p`:
//!
//! - `p:token:{identity}`: last-seen token per identity
//! - `p:{identity}:{tokenHash}:{dataType}` and `...:meta`: cached payloads
//! - `p:onboarding:completed:{tokenHash}:{onboardingId}`: onboarding ledger
//! - `p:cache:version`: schema marker
//! - `p:cache:index`: key index for stores that cannot enumerate

/// Short non-cryptographic digest of a token.
///
/// 31-multiplier rolling hash over UTF-16 code units, wrapped to 32 bits,
/// absolute value rendered in base 36. Matches the hash used by the web SDK,
/// so keys persisted by either side line up.
pub fn token_hash(token: &str) -> String {
    let mut hash: i32 = 0;
    for unit in token.encode_utf16() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    to_base36(i64::from(hash).unsigned_abs())
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Builder for every key the cache persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    root: String,
}

impl KeySpace {
    pub fn new(prefix: &str) -> Self {
        Self { root: format!("{prefix}:") }
    }

    /// Prefix shared by every key in the namespace.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn token_records(&self) -> String {
        format!("{}token:", self.root)
    }

    pub fn token_record(&self, identity: &str) -> String {
        format!("{}token:{identity}", self.root)
    }

    pub fn cache_version(&self) -> String {
        format!("{}cache:version", self.root)
    }

    pub fn key_index(&self) -> String {
        format!("{}cache:index", self.root)
    }

    /// Scope of everything one identity cached under one token.
    pub fn identity_scope(&self, identity: &str, token: &str) -> String {
        format!("{}{identity}:{}:", self.root, token_hash(token))
    }

    /// Scope of data keyed by token alone.
    pub fn token_scope(&self, token: &str) -> String {
        format!("{}{}:", self.root, token_hash(token))
    }

    pub fn data(&self, identity: &str, token: &str, data_type: &str) -> String {
        format!("{}{data_type}", self.identity_scope(identity, token))
    }

    pub fn data_meta(&self, identity: &str, token: &str, data_type: &str) -> String {
        format!("{}:meta", self.data(identity, token, data_type))
    }

    pub fn onboarding_root(&self) -> String {
        format!("{}onboarding:completed:", self.root)
    }

    pub fn onboarding_scope(&self, token: &str) -> String {
        format!("{}{}:", self.onboarding_root(), token_hash(token))
    }

    pub fn onboarding(&self, token: &str, onboarding_id: &str) -> String {
        format!("{}{onboarding_id}", self.onboarding_scope(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        assert_eq!(token_hash("token-a"), token_hash("token-a"));
        assert_ne!(token_hash("token-a"), token_hash("token-b"));
    }

    #[test]
    fn test_hash_known_values() {
        assert_eq!(token_hash(""), "0");
        assert_eq!(token_hash("a"), "2p");
        assert_eq!(token_hash("abc"), "22ci");
    }

    #[test]
    fn test_hash_wraps_to_32_bits() {
        let hash = token_hash(&"x".repeat(4096));
        assert!(hash.len() <= 7);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_key_layout() {
        let keys = KeySpace::new("storysdk");
        let hash = token_hash("T1");

        assert_eq!(keys.token_record("groups"), "storysdk:token:groups");
        assert_eq!(keys.cache_version(), "storysdk:cache:version");
        assert_eq!(keys.data("groups", "T1", "list"), format!("storysdk:groups:{hash}:list"));
        assert_eq!(keys.data_meta("groups", "T1", "list"), format!("storysdk:groups:{hash}:list:meta"));
        assert_eq!(keys.onboarding("T1", "welcome"), format!("storysdk:onboarding:completed:{hash}:welcome"));
        assert_eq!(keys.token_scope("T1"), format!("storysdk:{hash}:"));
    }

    #[test]
    fn test_scopes_contain_their_keys() {
        let keys = KeySpace::new("storysdk");
        assert!(keys.data("modal", "T", "story").starts_with(&keys.identity_scope("modal", "T")));
        assert!(!keys.data("modal", "T", "story").starts_with(&keys.identity_scope("groups", "T")));
        assert!(keys.onboarding("T", "x").starts_with(&keys.onboarding_scope("T")));
        assert!(keys.token_record("groups").starts_with(&keys.token_records()));
    }
}
