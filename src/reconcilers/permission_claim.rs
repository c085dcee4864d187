use std::time::Duration;

use kube::{
    config::Kubeconfig,
    runtime::{controller::Action, reflector::ObjectRef},
    Resource, ResourceExt,
};
use tracing::{debug, info};

use super::desired;
use crate::{
    cluster::Cluster,
    registry::KindRegistry,
    resources::{PermissionClaim, PermissionClaimStatus},
    Error, Result,
};

/// What a single reconcile achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The claim no longer exists
    Missing,

    /// Target resources were removed and the finalizer released
    CleanedUp,

    /// Everything converged except the kubeconfig Secret, which waits on a token
    Pending,

    /// The kubeconfig Secret exists, `created` when this reconcile made it
    Bound { created: bool },
}

impl Outcome {
    pub fn action(&self) -> Action {
        match self {
            Outcome::Missing | Outcome::CleanedUp => Action::await_change(),
            // Poll for the ServiceAccount token
            Outcome::Pending => Action::requeue(Duration::from_secs(10)),
            // Check again in an hour in case we missed something
            Outcome::Bound { .. } => Action::requeue(Duration::from_secs(60 * 60)),
        }
    }
}

/// Converges a claim's derived objects across the control and target clusters
pub struct ClaimReconciler<C, T> {
    pub(crate) control: C,
    pub(crate) target: T,
    pub(crate) registry: KindRegistry,
    pub(crate) base_kubeconfig: Kubeconfig,
}

impl<C: Cluster, T: Cluster> ClaimReconciler<C, T> {
    pub fn new(control: C, target: T, registry: KindRegistry, base_kubeconfig: Kubeconfig) -> Self {
        Self {
            control,
            target,
            registry,
            base_kubeconfig,
        }
    }

    /// Reconcile the claim identified by `key` from scratch.
    ///
    /// Every step is idempotent; an error aborts the remaining steps and the
    /// next invocation starts over from the top.
    pub async fn reconcile(&self, key: &ObjectRef<PermissionClaim>) -> Result<Outcome> {
        let Some(claim) = self
            .control
            .get(key)
            .await
            .map_err(Error::step("PermissionClaim", "get"))?
        else {
            debug!("claim {key} no longer exists");
            return Ok(Outcome::Missing);
        };

        if claim.meta().deletion_timestamp.is_some() {
            info!("claim {key} is being deleted, cleaning up");
            self.handle_deletion(claim).await?;
            return Ok(Outcome::CleanedUp);
        }

        let claim = self.ensure_finalizer(claim).await?;
        info!(r#"Reconciling claim "{}/{}""#, claim.namespace().unwrap_or_default(), claim.name_any());

        let role = self.sync(&claim, desired::role(&claim)).await?;
        let cluster_role = self.sync(&claim, desired::cluster_role(&claim)).await?;
        let service_account = self.sync(&claim, desired::service_account(&claim)).await?;

        let binding = desired::role_binding(&claim, &role, &service_account, &self.registry)?;
        self.sync(&claim, binding).await?;
        let binding =
            desired::cluster_role_binding(&claim, &cluster_role, &service_account, &self.registry)?;
        self.sync(&claim, binding).await?;

        let mut status = claim.status.clone().unwrap_or_default();
        let created = self
            .reconcile_kubeconfig_secret(&claim, &service_account, &mut status)
            .await?;

        let outcome = if status.is_bound() {
            Outcome::Bound { created }
        } else {
            Outcome::Pending
        };
        self.persist_status(&claim, status).await?;

        Ok(outcome)
    }

    /// Write the status back, skipping the write when nothing changed.
    async fn persist_status(&self, claim: &PermissionClaim, status: PermissionClaimStatus) -> Result<()> {
        if claim.status.as_ref() == Some(&status) {
            return Ok(());
        }

        let value = serde_json::to_value(&status).map_err(Error::SerializationError)?;
        self.control
            .patch_status(claim, value)
            .await
            .map_err(Error::step("PermissionClaim", "patch status of"))?;
        Ok(())
    }
}
