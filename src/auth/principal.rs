//! Principal identity
//!
//! Credits and design ownership are tracked against a Principal: either an
//! authenticated user id issued by the external identity provider, or the
//! anonymous sentinel for unauthenticated visitors. The core never inspects
//! the identifier beyond treating it as an opaque key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner value stored on records created by unauthenticated visitors
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// An identity against which credits and ownership are tracked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Principal {
    /// Authenticated user; the string is the identity provider's stable id
    User(String),
    /// Unauthenticated visitor
    Anonymous,
}

impl Principal {
    /// Opaque identifier used as the storage key
    pub fn id(&self) -> &str {
        match self {
            Principal::User(id) => id,
            Principal::Anonymous => ANONYMOUS_OWNER,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    /// True when this principal owns a record with the given owner field
    pub fn owns(&self, owner: &str) -> bool {
        match self {
            Principal::User(id) => id == owner,
            Principal::Anonymous => false,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_id() {
        assert_eq!(Principal::Anonymous.id(), ANONYMOUS_OWNER);
        assert!(Principal::Anonymous.is_anonymous());
    }

    #[test]
    fn test_user_owns_only_itself() {
        let p = Principal::User("user-1".into());
        assert!(p.owns("user-1"));
        assert!(!p.owns("user-2"));
        assert!(!Principal::Anonymous.owns(ANONYMOUS_OWNER));
    }
}
