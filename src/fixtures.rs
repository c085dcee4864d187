//! Helper methods only available for tests

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::{api::rbac::v1::PolicyRule, apimachinery::pkg::apis::meta::v1::Time};
use kube::{core::ErrorResponse, runtime::reflector::ObjectRef, Resource, ResourceExt};

use crate::{
    cluster::{Cluster, Managed},
    resources::{PermissionClaim, PermissionClaimSpec},
};

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message,
        reason: reason.into(),
        code,
    })
}

pub fn not_found(plural: &str, name: &str) -> kube::Error {
    api_error(404, "NotFound", format!("{plural} \"{name}\" not found"))
}

pub fn already_exists(plural: &str, name: &str) -> kube::Error {
    api_error(409, "AlreadyExists", format!("{plural} \"{name}\" already exists"))
}

pub fn conflict(plural: &str, name: &str) -> kube::Error {
    api_error(
        409,
        "Conflict",
        format!("Operation cannot be fulfilled on {plural} \"{name}\": the object has been modified"),
    )
}

pub fn internal(message: &str) -> kube::Error {
    api_error(500, "InternalError", message.into())
}

pub fn rule(verbs: &[&str], resources: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec!["".into()]),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        ..Default::default()
    }
}

impl PermissionClaim {
    /// A claim for `team-a/demo` granting read access to pods
    pub fn test() -> Self {
        let mut claim = PermissionClaim::new(
            "demo",
            PermissionClaimSpec {
                namespace: "team-a".into(),
                secret_name: "demo-kubeconfig".into(),
                rules: vec![rule(&["get", "list"], &["pods"])],
                cluster_rules: vec![],
            },
        );
        claim.meta_mut().namespace = Some("team-a".into());
        claim.meta_mut().uid = Some("752d59ef-2671-4890-9feb-0097459b18c8".into());
        claim.meta_mut().generation = Some(1);
        claim
    }

    pub fn deleting(mut self) -> Self {
        self.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
        self
    }
}

type Key = (String, Option<String>, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, serde_json::Value>,
    writes: Vec<String>,
    failures: HashMap<(String, String), kube::Error>,
    revision: u64,
}

impl State {
    fn fail(&mut self, verb: &str, kind: &str) -> Result<(), kube::Error> {
        match self.failures.remove(&(verb.to_string(), kind.to_string())) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// An in-memory [`Cluster`] recording every write it receives
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

fn key_of<K: Managed>(namespace: Option<&str>, name: &str) -> Key {
    (
        K::kind(&()).to_string(),
        namespace.map(String::from),
        name.to_string(),
    )
}

fn obj_key<K: Managed>(obj: &K) -> Key {
    key_of::<K>(obj.namespace().as_deref(), &obj.name_any())
}

impl FakeCluster {
    /// Seed an object without recording a write.
    pub fn insert<K: Managed>(&self, mut obj: K) {
        let mut state = self.state.lock().unwrap();
        obj.meta_mut().resource_version = Some(state.next_revision());
        let value = serde_json::to_value(&obj).unwrap();
        state.objects.insert(obj_key(&obj), value);
    }

    pub fn find<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&key_of::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn count<K: Managed>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        let state = self.state.lock().unwrap();
        state.objects.keys().filter(|(k, _, _)| *k == kind).count()
    }

    /// Writes seen so far, formatted as `verb Kind namespace/name`.
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }

    /// Fail the next `verb` call for `K` with the given error.
    pub fn fail_next<K: Managed>(&self, verb: &str, error: kube::Error) {
        let kind = K::kind(&()).to_string();
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((verb.to_string(), kind), error);
    }

    fn record(state: &mut State, verb: &str, key: &Key) {
        let (kind, namespace, name) = key;
        let path = match namespace {
            Some(ns) => format!("{ns}/{name}"),
            None => name.clone(),
        };
        state.writes.push(format!("{verb} {kind} {path}"));
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn get<K: Managed>(&self, key: &ObjectRef<K>) -> Result<Option<K>, kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.fail("get", &K::kind(&()))?;
        let key = key_of::<K>(key.namespace.as_deref(), &key.name);
        Ok(state
            .objects
            .get(&key)
            .map(|v| serde_json::from_value(v.clone()).unwrap()))
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K, kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.fail("create", &K::kind(&()))?;
        let key = obj_key(obj);
        if state.objects.contains_key(&key) {
            return Err(already_exists(&K::plural(&()), &key.2));
        }
        let mut created = obj.clone();
        created.meta_mut().resource_version = Some(state.next_revision());
        state
            .objects
            .insert(key.clone(), serde_json::to_value(&created).unwrap());
        Self::record(&mut state, "create", &key);
        Ok(created)
    }

    async fn replace<K: Managed>(&self, obj: &K) -> Result<K, kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.fail("replace", &K::kind(&()))?;
        let key = obj_key(obj);
        let current: K = match state.objects.get(&key) {
            Some(v) => serde_json::from_value(v.clone()).unwrap(),
            None => return Err(not_found(&K::plural(&()), &key.2)),
        };
        if obj.resource_version().is_some() && obj.resource_version() != current.resource_version() {
            return Err(conflict(&K::plural(&()), &key.2));
        }
        let mut replaced = obj.clone();
        replaced.meta_mut().resource_version = Some(state.next_revision());
        state
            .objects
            .insert(key.clone(), serde_json::to_value(&replaced).unwrap());
        Self::record(&mut state, "replace", &key);
        Ok(replaced)
    }

    async fn patch_status<K: Managed>(
        &self,
        obj: &K,
        status: serde_json::Value,
    ) -> Result<K, kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.fail("patch_status", &K::kind(&()))?;
        let key = obj_key(obj);
        let revision = state.next_revision();
        let Some(current) = state.objects.get_mut(&key) else {
            return Err(not_found(&K::plural(&()), &key.2));
        };
        current["status"] = status;
        current["metadata"]["resourceVersion"] = serde_json::Value::String(revision);
        let patched = serde_json::from_value(current.clone()).unwrap();
        Self::record(&mut state, "patch_status", &key);
        Ok(patched)
    }

    async fn delete<K: Managed>(&self, key: &ObjectRef<K>) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.fail("delete", &K::kind(&()))?;
        let key = key_of::<K>(key.namespace.as_deref(), &key.name);
        if state.objects.remove(&key).is_none() {
            return Err(not_found(&K::plural(&()), &key.2));
        }
        Self::record(&mut state, "delete", &key);
        Ok(())
    }
}
