use serde::{Deserialize, Serialize};

use crate::id::UniqueId;

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        pub struct $name {
            pub name: String,
            pub id: UniqueId,
        }

        impl $name {
            pub fn new(name: impl Into<String>, id: UniqueId) -> Self {
                Self { name: name.into(), id }
            }

            pub fn valid(&self) -> bool {
                !self.name.is_empty() && self.id.valid()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $name {}

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.id.cmp(&other.id)
            }
        }

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.id.valid() {
                    write!(f, "{} ({})", self.name, self.id)
                } else {
                    write!(f, "{} (<none>)", self.name)
                }
            }
        }
    };
}

handle_type!(
    /// A lightweight non-owning reference to a goal instance.
    GoalHandle
);
handle_type!(
    /// A lightweight non-owning reference to a tactic.
    TacticHandle
);
handle_type!(
    /// A lightweight non-owning reference to a service or agent.
    ServiceHandle
);
handle_type!(
    /// A lightweight non-owning reference to a concrete action request.
    ActionHandle
);

/// Agents are addressed the same way services are.
pub type AgentHandle = ServiceHandle;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_equal_iff_ids_equal() {
        let id = UniqueId::random();
        let a = GoalHandle::new("A", id);
        let b = GoalHandle::new("B", id);
        let c = GoalHandle::new("A", UniqueId::random());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_validity() {
        assert!(!GoalHandle::new("", UniqueId::random()).valid());
        assert!(!GoalHandle::new("g", UniqueId::INVALID).valid());
        assert!(GoalHandle::new("g", UniqueId::random()).valid());
    }
}
