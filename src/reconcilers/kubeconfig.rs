use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::{config::Kubeconfig, runtime::reflector::ObjectRef, Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{desired, ClaimReconciler};
use crate::{
    cluster::{is_already_exists, Cluster, Managed},
    ownership,
    resources::{PermissionClaim, PermissionClaimStatus, SERVICE_ACCOUNT_TOKEN_KEY},
    Error, Result,
};

/// Render `base` with every user's credentials replaced by `token`.
///
/// Clusters, contexts and preferences are carried over untouched.
pub fn synthesize(base: &Kubeconfig, token: &str) -> Result<String> {
    let mut config = base.clone();
    for user in &mut config.auth_infos {
        user.auth_info =
            Some(serde_json::from_value(json!({ "token": token })).map_err(Error::SerializationError)?);
    }

    serde_yaml::to_string(&config).map_err(Error::YamlError)
}

impl<C: Cluster, T: Cluster> ClaimReconciler<C, T> {
    /// Create the kubeconfig Secret once the ServiceAccount has been issued a token.
    ///
    /// The Secret is only ever created. Once it exists under this claim's
    /// controller reference the claim counts as bound. Returns whether this
    /// call created it.
    pub(crate) async fn reconcile_kubeconfig_secret(
        &self,
        claim: &PermissionClaim,
        service_account: &ServiceAccount,
        status: &mut PermissionClaimStatus,
    ) -> Result<bool> {
        let Some(token) = self.service_account_token(service_account).await? else {
            debug!(
                "ServiceAccount {} has no token yet, leaving claim pending",
                service_account.name_any()
            );
            return Ok(false);
        };

        let mut secret = desired::kubeconfig_secret(claim, synthesize(&self.base_kubeconfig, &token)?)?;
        let key = ObjectRef::from_obj(&secret);
        let existing = self
            .control
            .get(&key)
            .await
            .map_err(Error::step("Secret", "get"))?;

        let strategy = ownership::for_location(Secret::LOCATION);
        let created = match existing {
            Some(existing) if strategy.is_owned_by(claim, existing.meta()) => false,
            Some(existing) => {
                warn!("Secret {key} exists but is not controlled by {}", claim.name_any());
                return Err(Error::ForeignObject {
                    kind: "Secret".into(),
                    name: existing.name_any(),
                });
            }
            None => {
                strategy.tag(claim, &mut secret.metadata)?;
                match self.control.create(&secret).await {
                    Ok(_) => {
                        info!("created kubeconfig Secret {key}");
                        true
                    }
                    Err(e) if is_already_exists(&e) => {
                        // Ownership of the winner is checked on the next pass
                        debug!("Secret {key} appeared concurrently");
                        return Ok(false);
                    }
                    Err(e) => return Err(Error::step("Secret", "create")(e)),
                }
            }
        };

        status.mark_bound(claim.meta().generation);
        Ok(created)
    }

    /// Read the token the target cluster issued for `service_account`, if any.
    async fn service_account_token(&self, service_account: &ServiceAccount) -> Result<Option<String>> {
        let Some(reference) = service_account.secrets.as_ref().and_then(|s| s.first()) else {
            return Ok(None);
        };
        let Some(name) = reference.name.as_deref() else {
            return Ok(None);
        };

        let mut key = ObjectRef::<Secret>::new(name);
        key.namespace = reference.namespace.clone().or_else(|| service_account.namespace());

        let token = self
            .target
            .get(&key)
            .await
            .map_err(Error::step("ServiceAccount token Secret", "get"))?
            .and_then(|secret| secret.data)
            .and_then(|data| data.get(SERVICE_ACCOUNT_TOKEN_KEY).cloned())
            .map(|token| String::from_utf8_lossy(&token.0).into_owned())
            .filter(|token| !token.is_empty());

        Ok(token)
    }
}
