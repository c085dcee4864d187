use std::borrow::Cow;

use thiserror::Error;

/// Expose all controller components used by main
pub mod operator;
pub mod resources;

/// Access to the control and target clusters
pub mod cluster;
pub mod config;
pub mod ownership;
pub mod reconcilers;
pub mod registry;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
pub(crate) mod fixtures;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[source] serde_yaml::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    /// A single step against one resource kind failed
    #[error("{action} {kind}: {source}")]
    StepError {
        kind: Cow<'static, str>,
        action: &'static str,
        #[source]
        source: kube::Error,
    },

    /// An object the claim would write exists but belongs to someone else
    #[error("{kind} {name} is not owned by this claim")]
    ForeignObject {
        kind: Cow<'static, str>,
        name: String,
    },

    #[error("Kubeconfig Error: {0}")]
    KubeconfigError(#[source] kube::config::KubeconfigError),

    #[error("Config Error: {0}")]
    ConfigError(String),

    #[error("IllegalClaim: {0}")]
    IllegalClaim(String),

    #[error("UnresolvedKind: {0}")]
    UnresolvedKind(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            // Keep the label cardinality bounded
            Error::StepError { kind, action, .. } => {
                format!("{action}_{kind}").replace(' ', "_").to_lowercase()
            }
            _ => format!("{self:?}")
                .split(['(', ' ', '{'])
                .next()
                .unwrap_or_default()
                .to_lowercase(),
        }
    }

    pub(crate) fn step(kind: impl Into<Cow<'static, str>>, action: &'static str) -> impl FnOnce(kube::Error) -> Error {
        let kind = kind.into();
        move |source| Error::StepError {
            kind,
            action,
            source,
        }
    }
}
