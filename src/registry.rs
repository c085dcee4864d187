//! Explicit mapping from Rust types to their API identity.
//!
//! The registry is built once at startup and handed to the reconciler, so
//! bindings can look up what they reference instead of hardcoding group/kind.

use std::{any::TypeId, collections::HashMap};

use kube::{
    api::GroupVersionKind,
    discovery::{self, ApiResource},
    Client, Resource,
};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Group, version and kind of a registered type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeIdentity {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl TypeIdentity {
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self {
            group: K::group(&()).into_owned(),
            version: K::version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
        }
    }

    fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl From<&ApiResource> for TypeIdentity {
    fn from(ar: &ApiResource) -> Self {
        Self {
            group: ar.group.clone(),
            version: ar.version.clone(),
            kind: ar.kind.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<TypeId, TypeIdentity>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type under the identity its `Resource` impl declares.
    pub fn with<K: Resource<DynamicType = ()> + 'static>(mut self) -> Self {
        self.kinds.insert(TypeId::of::<K>(), TypeIdentity::of::<K>());
        self
    }

    /// Confirm every registered kind against the cluster's discovery API,
    /// adopting whatever identity the server reports for it.
    pub async fn discover(mut self, client: &Client) -> Result<Self> {
        for identity in self.kinds.values_mut() {
            match discovery::pinned_kind(client, &identity.gvk()).await {
                Ok((ar, _caps)) => {
                    debug!("discovered {}/{} {}", ar.group, ar.version, ar.kind);
                    *identity = TypeIdentity::from(&ar);
                }
                Err(e) => {
                    warn!("kind {} is not served by the target cluster: {e}", identity.kind);
                    return Err(Error::UnresolvedKind(identity.kind.clone()));
                }
            }
        }

        Ok(self)
    }

    pub fn resolve<K: 'static>(&self) -> Result<&TypeIdentity> {
        self.kinds
            .get(&TypeId::of::<K>())
            .ok_or_else(|| Error::UnresolvedKind(std::any::type_name::<K>().into()))
    }
}
