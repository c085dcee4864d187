//! Back-references from derived objects to the claim that owns them.
//!
//! Objects in the control cluster get a regular controller owner reference,
//! which the garbage collector and `Controller::owns` understand. Objects in
//! the target cluster cannot point at a claim structurally, so the owner's
//! `namespace/name` is recorded in an annotation instead.

use kube::{
    core::ObjectMeta,
    runtime::reflector::ObjectRef,
    Resource, ResourceExt,
};

use crate::{
    cluster::Location,
    resources::{PermissionClaim, OWNER_ANNOTATION},
    Error, Result,
};

/// How a derived object records and reveals its owning claim
pub trait OwnerStrategy: Send + Sync {
    /// Stamp `child` as owned by `owner`.
    fn tag(&self, owner: &PermissionClaim, child: &mut ObjectMeta) -> Result<()>;

    /// Map a derived object back to the claim owning it, if any.
    fn owner_of(&self, child: &ObjectMeta) -> Option<ObjectRef<PermissionClaim>>;

    /// Whether `child` records `owner` as its owning claim.
    fn is_owned_by(&self, owner: &PermissionClaim, child: &ObjectMeta) -> bool {
        self.owner_of(child)
            .is_some_and(|r| r.name == owner.name_any() && r.namespace == owner.namespace())
    }
}

/// Structural owner reference, usable within the control cluster
pub struct ControllerReference;

/// Annotation-encoded owner, usable across clusters
pub struct OwnerAnnotation;

/// Pick the strategy for objects living in `location`.
pub fn for_location(location: Location) -> &'static dyn OwnerStrategy {
    match location {
        Location::Control => &ControllerReference,
        Location::Target => &OwnerAnnotation,
    }
}

impl OwnerStrategy for ControllerReference {
    fn tag(&self, owner: &PermissionClaim, child: &mut ObjectMeta) -> Result<()> {
        let reference = owner
            .controller_owner_ref(&())
            .ok_or_else(|| Error::IllegalClaim(format!("{} has no uid", owner.name_any())))?;

        let references = child.owner_references.get_or_insert_with(Vec::new);
        references.retain(|r| r.controller != Some(true));
        references.push(reference);
        Ok(())
    }

    fn owner_of(&self, child: &ObjectMeta) -> Option<ObjectRef<PermissionClaim>> {
        let namespace = child.namespace.as_deref()?;
        child
            .owner_references
            .iter()
            .flatten()
            .find(|r| {
                r.controller == Some(true)
                    && r.kind == PermissionClaim::kind(&())
                    && r.api_version == PermissionClaim::api_version(&())
            })
            .map(|r| ObjectRef::new(&r.name).within(namespace))
    }
}

impl OwnerStrategy for OwnerAnnotation {
    fn tag(&self, owner: &PermissionClaim, child: &mut ObjectMeta) -> Result<()> {
        let namespace = owner
            .namespace()
            .ok_or_else(|| Error::IllegalClaim(format!("{} has no namespace", owner.name_any())))?;

        child
            .annotations
            .get_or_insert_with(Default::default)
            .insert(OWNER_ANNOTATION.into(), format!("{namespace}/{}", owner.name_any()));
        Ok(())
    }

    fn owner_of(&self, child: &ObjectMeta) -> Option<ObjectRef<PermissionClaim>> {
        let value = child.annotations.as_ref()?.get(OWNER_ANNOTATION)?;
        match value.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Some(ObjectRef::new(name).within(namespace))
            }
            _ => None,
        }
    }
}
