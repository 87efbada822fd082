use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit random identifier with a total order.
///
/// A zeroed id is "invalid"; every live entity carries a valid id.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UniqueId(Uuid);

impl UniqueId {
    pub const INVALID: UniqueId = UniqueId(Uuid::nil());

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn valid(&self) -> bool {
        !self.0.is_nil()
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl std::fmt::Display for UniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_differ() {
        let a = UniqueId::random();
        let b = UniqueId::random();
        assert_ne!(a, b);
        assert!(a.valid());
    }

    #[test]
    fn test_invalid_id() {
        assert!(!UniqueId::INVALID.valid());
        assert!(UniqueId::default() == UniqueId::INVALID);
    }

    #[test]
    fn test_string_round_trip() {
        let id = UniqueId::random();
        let text = id.to_string();
        assert_eq!(UniqueId::parse(&text), Some(id));
        // aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee
        assert_eq!(text.len(), 36);
        assert_eq!(text.matches('-').count(), 4);
    }
}
