use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::{
    core::v1::{Secret, ServiceAccount},
    rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use kube::{
    api::ListParams,
    config::{KubeConfigOptions, Kubeconfig},
    runtime::{
        controller::Action,
        events::{Event, EventType, Recorder, Reporter},
        reflector::ObjectRef,
        watcher::Config as WatcherConfig,
        Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, field, info, instrument, warn, Span};

use crate::{
    cluster::{KubeCluster, Managed},
    config::Config,
    ownership::{OwnerAnnotation, OwnerStrategy},
    reconcilers::{ClaimReconciler, Context, Outcome},
    registry::KindRegistry,
    resources::{PermissionClaim, MANAGER},
    telemetry, Error, Metrics, Result,
};

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: MANAGER.into(),
        }
    }
}
impl Diagnostics {
    pub fn recorder(&self, client: Client, claim: &PermissionClaim) -> Recorder {
        Recorder::new(client, self.reporter.clone(), claim.object_ref(&()))
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub(crate) fn to_context(
        &self,
        client: Client,
        reconciler: ClaimReconciler<KubeCluster, KubeCluster>,
    ) -> Result<Arc<Context>, prometheus::Error> {
        Ok(Arc::new(Context {
            client,
            reconciler,
            metrics: Metrics::default().register(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
        }))
    }
}

fn target_api<K: Managed>(client: &Client) -> Api<K> {
    K::api(client.clone(), None)
}

/// Map a target cluster object back to the claim it was created for
fn owning_claim<K: Resource>(obj: K) -> Option<ObjectRef<PermissionClaim>> {
    OwnerAnnotation.owner_of(obj.meta())
}

pub struct PermissionClaimController {
    state: State,
}

impl PermissionClaimController {
    pub fn new(state: State) -> Self {
        Self { state }
    }

    /// Initialize the controller and shared state (given the crd is installed)
    pub async fn run(self, config: Config) -> Result<(), anyhow::Error> {
        // Error handler for failed reconciliations
        fn error_policy(claim: Arc<PermissionClaim>, error: &Error, ctx: Arc<Context>) -> Action {
            error!("reconcile failed: {:?}", error);
            ctx.metrics.reconcile_failure(&claim, error);
            Action::requeue(Duration::from_secs(5))
        }

        // The control cluster is where we run, the target cluster is named by config
        let client = Client::try_default().await.map_err(Error::KubeError)?;
        let base_kubeconfig = Kubeconfig::read_from(&config.target_kubeconfig).map_err(Error::KubeconfigError)?;
        let target_config =
            kube::Config::from_custom_kubeconfig(base_kubeconfig.clone(), &KubeConfigOptions::default())
                .await
                .map_err(Error::KubeconfigError)?;
        let target = Client::try_from(target_config).map_err(Error::KubeError)?;

        // Resolve the identities the bindings refer to against the live target cluster
        let registry = KindRegistry::new()
            .with::<Role>()
            .with::<ClusterRole>()
            .with::<ServiceAccount>()
            .discover(&target)
            .await?;

        // Create fetchers to our CRD and the Secrets it owns
        let (claims, secrets) = match config.namespace.as_deref() {
            Some(ns) => (
                Api::<PermissionClaim>::namespaced(client.clone(), ns),
                Api::<Secret>::namespaced(client.clone(), ns),
            ),
            None => (
                Api::<PermissionClaim>::all(client.clone()),
                Api::<Secret>::all(client.clone()),
            ),
        };

        // Test that we can actually query for our CRD (a.k.a. it is installed)
        if let Err(e) = claims.list(&ListParams::default().limit(1)).await {
            error!("CRD is not queryable; {e:?}. Is the CRD installed?");
            info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            return Err(e.into());
        }

        let reconciler = ClaimReconciler::new(
            KubeCluster::new(client.clone()),
            KubeCluster::new(target.clone()),
            registry,
            base_kubeconfig,
        );
        let context = self.state.to_context(client, reconciler)?;

        let watching_config = WatcherConfig::default().page_size(50).any_semantic();
        Controller::new(claims, watching_config.clone())
            .shutdown_on_signal()
            .owns(secrets, watching_config.clone())
            .watches(target_api::<ServiceAccount>(&target), watching_config.clone(), owning_claim)
            .watches(target_api::<Role>(&target), watching_config.clone(), owning_claim)
            .watches(target_api::<ClusterRole>(&target), watching_config.clone(), owning_claim)
            .watches(target_api::<RoleBinding>(&target), watching_config.clone(), owning_claim)
            .watches(target_api::<ClusterRoleBinding>(&target), watching_config, owning_claim)
            .run(reconcile, error_policy, context)
            .filter_map(|x| async move { x.ok() })
            .for_each(|_| futures::future::ready(()))
            .await;

        Ok(())
    }
}

/// Reconcile a single claim and report the outcome as events
#[instrument(skip(ctx, claim), fields(trace_id))]
async fn reconcile(claim: Arc<PermissionClaim>, ctx: Arc<Context>) -> Result<Action> {
    // Add some tracing for debugging's sake
    let trace_id = telemetry::get_trace_id();

    // Take some metrics to see the average reconcile time
    Span::current().record("trace_id", &field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let recorder = ctx
        .diagnostics
        .read()
        .await
        .recorder(ctx.client.clone(), &claim);

    let outcome = match ctx.reconciler.reconcile(&ObjectRef::from_obj(claim.as_ref())).await {
        Ok(outcome) => outcome,
        Err(err) => {
            publish(&recorder, EventType::Warning, "ReconcileFailed", "Reconciling", err.to_string()).await;
            return Err(err);
        }
    };

    match outcome {
        Outcome::CleanedUp => {
            let note = format!("Removed target cluster resources of `{}`", claim.name_any());
            publish(&recorder, EventType::Normal, "DeleteRequested", "Deleting", note).await;
        }
        Outcome::Bound { created: true } => {
            let note = format!("Wrote kubeconfig to Secret `{}`", claim.spec.secret_name);
            publish(&recorder, EventType::Normal, "Bound", "Binding", note).await;
        }
        _ => {}
    }

    Ok(outcome.action())
}

async fn publish(recorder: &Recorder, type_: EventType, reason: &str, action: &str, note: String) {
    let event = Event {
        type_,
        reason: reason.into(),
        note: Some(note),
        action: action.into(),
        secondary: None,
    };
    // Best effort
    if let Err(e) = recorder.publish(event).await {
        warn!("failed to publish event: {e}");
    }
}
