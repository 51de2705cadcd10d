//! Validation of InnoDBCluster specs.
//!
//! A spec that fails validation produces no actions. The reconciler
//! reports it through the `SpecInvalid` condition and waits for the user
//! to fix it; deletion is still processed.

use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::crd::{InnoDBCluster, MAX_INSTANCES};

/// Maximum cluster name length, leaving room for `-instances` and ordinal suffixes
pub const MAX_NAME_LENGTH: usize = 40;

/// Accepted image pull policies
pub const PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];

/// Validate the cluster spec
pub fn validate_spec(cluster: &InnoDBCluster) -> Result<()> {
    validate_name(cluster)?;
    validate_instances(cluster)?;
    validate_router(cluster)?;
    validate_image(cluster)?;
    Ok(())
}

fn validate_name(cluster: &InnoDBCluster) -> Result<()> {
    let name = cluster.name_any();
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::SpecInvalid(format!(
            "name '{name}' exceeds maximum length of {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

fn validate_instances(cluster: &InnoDBCluster) -> Result<()> {
    let instances = cluster.spec.instances;
    if !(1..=MAX_INSTANCES).contains(&instances) {
        return Err(Error::SpecInvalid(format!(
            "spec.instances must be between 1 and {MAX_INSTANCES}, got {instances}"
        )));
    }
    Ok(())
}

fn validate_router(cluster: &InnoDBCluster) -> Result<()> {
    let routers = cluster.spec.router_instances();
    if routers < 0 {
        return Err(Error::SpecInvalid(format!(
            "spec.router.instances must not be negative, got {routers}"
        )));
    }
    Ok(())
}

fn validate_image(cluster: &InnoDBCluster) -> Result<()> {
    if let Some(policy) = &cluster.spec.image_pull_policy
        && !PULL_POLICIES.contains(&policy.as_str())
    {
        return Err(Error::SpecInvalid(format!(
            "spec.imagePullPolicy must be one of {}, got '{policy}'",
            PULL_POLICIES.join(", ")
        )));
    }
    if cluster.spec.image.as_deref().is_some_and(str::is_empty) {
        return Err(Error::SpecInvalid("spec.image must not be empty".to_string()));
    }
    if let Some(secret) = cluster
        .spec
        .image_pull_secrets
        .iter()
        .flatten()
        .find(|s| s.name.is_empty())
    {
        return Err(Error::SpecInvalid(format!(
            "spec.imagePullSecrets entry has an empty name: {secret:?}"
        )));
    }
    Ok(())
}
