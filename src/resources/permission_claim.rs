use chrono::Utc;
use k8s_openapi::{
    api::rbac::v1::PolicyRule,
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type signalling that the kubeconfig Secret has been created.
pub const BOUND_CONDITION: &str = "Bound";

/// Requests scoped RBAC credentials in the target cluster
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "PermissionClaim",
    group = "permissions.thetechnick.ninja",
    version = "v1alpha1",
    status = "PermissionClaimStatus",
    doc = "Claims a set of permissions in the target cluster and delivers credentials for them",
    namespaced,
    printcolumn = r#"{ "name": "status", "type": "string", "description": "claim phase", "jsonPath": ".status.phase" }"#,
    printcolumn = r#"{ "name": "age", "type": "date", "jsonPath": ".metadata.creationTimestamp" }"#
)]
#[serde(rename_all = "camelCase")]
pub struct PermissionClaimSpec {
    /// Namespace to claim permissions in.
    ///
    /// The ServiceAccount and the namespace-scoped Role will live here.
    pub namespace: String,

    /// Name of the secret to house the created credentials.
    pub secret_name: String,

    /// Namespace-scoped permissions.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,

    /// Cluster-scoped permissions.
    #[serde(default)]
    pub cluster_rules: Vec<PolicyRule>,
}

/// The observed state of a claim
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionClaimStatus {
    /// Conditions the claim is in.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Human readable phase, kept for display only. Use `conditions` from code.
    #[serde(default)]
    pub phase: PermissionClaimPhase,
}

/// The phases a claim goes through
#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
pub enum PermissionClaimPhase {
    /// Credentials have not been issued yet.
    #[default]
    Pending,

    /// The kubeconfig Secret exists.
    Bound,
}

impl PermissionClaimStatus {
    /// Insert or update the condition with the given type.
    ///
    /// The transition time only changes when the condition status flips, so
    /// repeatedly setting the same condition leaves the status untouched.
    pub fn set_condition(&mut self, type_: &str, status: bool, reason: &str, generation: Option<i64>) {
        let status = if status { "True" } else { "False" }.to_string();

        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status;
                    existing.last_transition_time = Time(Utc::now());
                }
                existing.reason = reason.into();
                existing.observed_generation = generation;
            }
            None => self.conditions.push(Condition {
                type_: type_.into(),
                status,
                reason: reason.into(),
                message: String::new(),
                observed_generation: generation,
                last_transition_time: Time(Utc::now()),
            }),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == BOUND_CONDITION && c.status == "True")
    }

    pub fn mark_bound(&mut self, generation: Option<i64>) {
        self.set_condition(BOUND_CONDITION, true, "PermissionsEstablished", generation);
        self.phase = PermissionClaimPhase::Bound;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_the_same_condition_twice_is_stable() {
        let mut status = PermissionClaimStatus::default();
        status.mark_bound(Some(1));
        let first = status.clone();

        status.mark_bound(Some(1));
        assert_eq!(status, first);
        assert_eq!(status.conditions.len(), 1);
        assert!(status.is_bound());
        assert_eq!(status.phase, PermissionClaimPhase::Bound);
    }

    #[test]
    fn flipping_a_condition_moves_the_transition_time() {
        let mut status = PermissionClaimStatus::default();
        status.set_condition(BOUND_CONDITION, false, "Waiting", Some(1));
        let stale = Time(Utc::now() - chrono::Duration::hours(1));
        status.conditions[0].last_transition_time = stale.clone();
        assert!(!status.is_bound());

        status.set_condition(BOUND_CONDITION, true, "PermissionsEstablished", Some(2));
        let condition = &status.conditions[0];
        assert_eq!(condition.status, "True");
        assert_eq!(condition.observed_generation, Some(2));
        assert_ne!(condition.last_transition_time, stale);
    }

    #[test]
    fn spec_uses_camel_case_and_defaults_rules() {
        let spec: PermissionClaimSpec = serde_json::from_value(serde_json::json!({
            "namespace": "team-a",
            "secretName": "demo-kubeconfig",
        }))
        .unwrap();

        assert_eq!(spec.secret_name, "demo-kubeconfig");
        assert!(spec.rules.is_empty());
        assert!(spec.cluster_rules.is_empty());
    }
}
