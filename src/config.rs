//! Operator settings, read from `PERMISSION_CLAIM_*` environment variables.

use std::path::PathBuf;

use crate::{Error, Result};

const PREFIX: &str = "PERMISSION_CLAIM_";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Kubeconfig for the target cluster. Also the template handed out to claimants.
    pub target_kubeconfig: PathBuf,

    /// Only watch claims in this namespace
    pub namespace: Option<String>,

    /// Address the metrics and health server binds to
    pub listen_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        let target_kubeconfig = var("TARGET_KUBECONFIG")
            .map(PathBuf::from)
            .ok_or_else(|| Error::ConfigError(format!("missing {PREFIX}TARGET_KUBECONFIG")))?;

        Ok(Config {
            target_kubeconfig,
            namespace: var("NAMESPACE"),
            listen_addr: var("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.into()),
        })
    }
}
