mod permission_claim;

pub use permission_claim::*;

/// Finalizer blocking physical deletion of a claim until its target resources are gone
pub const CLEANUP_FINALIZER: &str = "permissions.thetechnick.ninja/cleanup";

/// Annotation recording the owning claim on objects in the target cluster
pub const OWNER_ANNOTATION: &str = "permissions.thetechnick.ninja/owner";

/// Key of the kubeconfig document inside the generated Secret
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Key of the bearer token inside a ServiceAccount token Secret
pub const SERVICE_ACCOUNT_TOKEN_KEY: &str = "token";

/// Field manager used for every write
pub const MANAGER: &str = "permission-claim-operator";
