//! Desired state of every object derived from a claim.
//!
//! These are pure: ownership is stamped on afterwards by the sync step, and
//! every object is named after the claim it belongs to.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        core::v1::{Secret, ServiceAccount},
        rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding, RoleRef, Subject},
    },
    ByteString,
};
use kube::{Resource, ResourceExt};

use crate::{
    registry::KindRegistry,
    resources::{PermissionClaim, KUBECONFIG_KEY},
    Error, Result,
};

macro_rules! meta {
    ($($field:ident : $value:expr),* $(,)?) => {
        ::kube::core::ObjectMeta {
            $($field: $value,)*
            ..Default::default()
        }
    };
}

pub fn service_account(claim: &PermissionClaim) -> ServiceAccount {
    ServiceAccount {
        metadata: meta! {
            name: Some(claim.name_any()),
            namespace: Some(claim.spec.namespace.clone()),
        },
        ..Default::default()
    }
}

/// Namespaced permissions, mirroring `spec.rules`
pub fn role(claim: &PermissionClaim) -> Role {
    Role {
        metadata: meta! {
            name: Some(claim.name_any()),
            namespace: Some(claim.spec.namespace.clone()),
        },
        rules: Some(claim.spec.rules.clone()),
    }
}

/// Cluster-wide permissions, mirroring `spec.clusterRules`
pub fn cluster_role(claim: &PermissionClaim) -> ClusterRole {
    ClusterRole {
        metadata: meta! { name: Some(claim.name_any()) },
        rules: Some(claim.spec.cluster_rules.clone()),
        ..Default::default()
    }
}

pub fn role_binding(
    claim: &PermissionClaim,
    role: &Role,
    service_account: &ServiceAccount,
    registry: &KindRegistry,
) -> Result<RoleBinding> {
    Ok(RoleBinding {
        metadata: meta! {
            name: Some(claim.name_any()),
            namespace: Some(claim.spec.namespace.clone()),
        },
        role_ref: role_ref(role, registry)?,
        subjects: Some(vec![subject(service_account, registry)?]),
    })
}

pub fn cluster_role_binding(
    claim: &PermissionClaim,
    cluster_role: &ClusterRole,
    service_account: &ServiceAccount,
    registry: &KindRegistry,
) -> Result<ClusterRoleBinding> {
    Ok(ClusterRoleBinding {
        metadata: meta! { name: Some(claim.name_any()) },
        role_ref: role_ref(cluster_role, registry)?,
        subjects: Some(vec![subject(service_account, registry)?]),
    })
}

/// The kubeconfig Secret handed to the consumer, in the claim's own namespace
pub fn kubeconfig_secret(claim: &PermissionClaim, kubeconfig: String) -> Result<Secret> {
    let namespace = claim
        .namespace()
        .ok_or_else(|| Error::IllegalClaim(format!("{} has no namespace", claim.name_any())))?;

    Ok(Secret {
        metadata: meta! {
            name: Some(claim.spec.secret_name.clone()),
            namespace: Some(namespace),
        },
        data: Some(BTreeMap::from([(
            KUBECONFIG_KEY.to_string(),
            ByteString(kubeconfig.into_bytes()),
        )])),
        ..Default::default()
    })
}

fn role_ref<K: Resource + 'static>(role: &K, registry: &KindRegistry) -> Result<RoleRef> {
    let identity = registry.resolve::<K>()?;
    Ok(RoleRef {
        api_group: identity.group.clone(),
        kind: identity.kind.clone(),
        name: role.meta().name.clone().unwrap_or_default(),
    })
}

fn subject(service_account: &ServiceAccount, registry: &KindRegistry) -> Result<Subject> {
    let identity = registry.resolve::<ServiceAccount>()?;
    Ok(Subject {
        // The core group is the empty string, which the API server omits
        api_group: Some(identity.group.clone()).filter(|g| !g.is_empty()),
        kind: identity.kind.clone(),
        name: service_account.name_any(),
        namespace: service_account.namespace(),
    })
}
