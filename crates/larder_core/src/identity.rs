//! Resolution of the current owner.

use parking_lot::RwLock;
use std::sync::Arc;

/// Supplies the identifier of the signed-in user.
pub trait IdentityProvider: Send + Sync {
    /// Returns the current owner, or `None` when nobody is signed in.
    fn current_owner(&self) -> Option<String>;
}

impl<P: IdentityProvider + ?Sized> IdentityProvider for Arc<P> {
    fn current_owner(&self) -> Option<String> {
        (**self).current_owner()
    }
}

/// An identity held in memory and switched explicitly.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    owner: RwLock<Option<String>>,
}

impl StaticIdentity {
    /// Creates an identity signed in as `owner`.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: RwLock::new(Some(owner.into())),
        }
    }

    /// Creates a signed-out identity.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Signs in as `owner`.
    pub fn set(&self, owner: impl Into<String>) {
        *self.owner.write() = Some(owner.into());
    }

    /// Signs out.
    pub fn clear(&self) {
        *self.owner.write() = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_owner(&self) -> Option<String> {
        self.owner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_and_clear() {
        let identity = StaticIdentity::anonymous();
        assert_eq!(identity.current_owner(), None);

        identity.set("alice");
        assert_eq!(identity.current_owner().as_deref(), Some("alice"));

        identity.clear();
        assert_eq!(identity.current_owner(), None);
    }
}
