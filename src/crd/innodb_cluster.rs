//! InnoDBCluster Custom Resource Definition.
//!
//! Declares the desired topology of a MySQL InnoDB Cluster: the number of
//! server instances, the optional router tier, and the image/scheduling
//! settings copied onto every member pod. The status sub-object is owned by
//! the reconciler and is the single source of truth for external observers.

use k8s_openapi::api::core::v1::Toleration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default server image repository.
pub const DEFAULT_SERVER_IMAGE: &str = "mysql/mysql-server";

/// Default router image repository.
pub const DEFAULT_ROUTER_IMAGE: &str = "mysql/mysql-router";

/// Default server version tag when the spec names no image.
pub const DEFAULT_SERVER_VERSION_TAG: &str = "8.0.36";

/// Maximum number of members in a group replication group.
pub const MAX_INSTANCES: i32 = 9;

/// InnoDBCluster is a custom resource for deploying MySQL InnoDB Clusters.
///
/// Example:
/// ```yaml
/// apiVersion: mysql.oracle.com/v2
/// kind: InnoDBCluster
/// metadata:
///   name: mycluster
/// spec:
///   instances: 3
///   router:
///     instances: 2
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "mysql.oracle.com",
    version = "v2",
    kind = "InnoDBCluster",
    plural = "innodbclusters",
    shortname = "ic",
    status = "InnoDBClusterStatus",
    namespaced,
    // Print columns for kubectl get (NAME is implicit)
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.cluster.status"}"#,
    printcolumn = r#"{"name":"Online", "type":"integer", "jsonPath":".status.cluster.onlineInstances"}"#,
    printcolumn = r#"{"name":"Instances", "type":"integer", "jsonPath":".spec.instances"}"#,
    printcolumn = r#"{"name":"Routers", "type":"integer", "jsonPath":".spec.router.instances"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InnoDBClusterSpec {
    /// Number of MySQL server instances (1-9).
    #[serde(default = "default_instances")]
    pub instances: i32,

    /// Router tier. Absent means no router replica set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterSpec>,

    /// Server image reference. Defaults to the operator's server version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image pull policy applied to member and router pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Image pull secrets applied to member and router pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<Vec<ImagePullSecret>>,

    /// Tolerations applied to member pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

impl Default for InnoDBClusterSpec {
    fn default() -> Self {
        Self {
            instances: default_instances(),
            router: None,
            image: None,
            image_pull_policy: None,
            image_pull_secrets: None,
            tolerations: None,
        }
    }
}

fn default_instances() -> i32 {
    1
}

impl InnoDBClusterSpec {
    /// Desired router replica count. A missing router sub-spec counts as zero.
    pub fn router_instances(&self) -> i32 {
        self.router.as_ref().map_or(0, |r| r.instances)
    }

    /// Server image, falling back to the default repository and version.
    pub fn server_image(&self) -> String {
        self.image.clone().unwrap_or_else(|| {
            format!("{}:{}", DEFAULT_SERVER_IMAGE, DEFAULT_SERVER_VERSION_TAG)
        })
    }

    /// Version tag of the server image (the part after the last `:`).
    pub fn server_version(&self) -> String {
        let image = self.server_image();
        match image.rsplit_once(':') {
            Some((_, tag)) if !tag.contains('/') => tag.to_string(),
            _ => "latest".to_string(),
        }
    }
}

/// Router tier specification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouterSpec {
    /// Number of router replicas. Zero means no router replica set.
    #[serde(default)]
    pub instances: i32,
}

/// Reference to an image pull secret.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ImagePullSecret {
    /// Name of the Secret.
    pub name: String,
}

/// Status of an InnoDBCluster.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InnoDBClusterStatus {
    /// Aggregated cluster health.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterStatusSummary>,

    /// Server version the members run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Reconciliation loop phase.
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Per-member role and readiness.
    #[serde(default)]
    pub members: Vec<MemberStatus>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// The generation most recently observed by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// When the controller first observed the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
}

impl InnoDBClusterStatus {
    /// Online instance count, zero when the cluster block is absent.
    pub fn online_instances(&self) -> i32 {
        self.cluster.as_ref().map_or(0, |c| c.online_instances)
    }
}

/// Aggregated health of the database group.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatusSummary {
    /// Cluster-wide status.
    pub status: ClusterState,
    /// Number of members online in the group.
    pub online_instances: i32,
}

/// Cluster-wide status string exposed to observers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    /// No member has come online yet.
    #[default]
    Initializing,
    /// All desired members are online.
    Online,
    /// Some members have failed.
    Degraded,
    /// No member is online after the cluster was running.
    Offline,
    /// The cluster is being torn down.
    Finalizing,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::Initializing => write!(f, "INITIALIZING"),
            ClusterState::Online => write!(f, "ONLINE"),
            ClusterState::Degraded => write!(f, "DEGRADED"),
            ClusterState::Offline => write!(f, "OFFLINE"),
            ClusterState::Finalizing => write!(f, "FINALIZING"),
        }
    }
}

/// ClusterPhase is the state of the reconciliation loop for a cluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterPhase {
    /// Cluster has not converged yet.
    #[default]
    Initializing,
    /// Members or owned objects are being created or repaired.
    Growing,
    /// Surplus members are being removed.
    Shrinking,
    /// Observed topology matches the spec and all members are ready.
    Stable,
    /// A member has been failing for longer than the grace window.
    Degraded,
    /// Deletion requested, members are being drained.
    Deleting,
    /// All finalizers processed.
    Deleted,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Initializing => write!(f, "Initializing"),
            ClusterPhase::Growing => write!(f, "Growing"),
            ClusterPhase::Shrinking => write!(f, "Shrinking"),
            ClusterPhase::Stable => write!(f, "Stable"),
            ClusterPhase::Degraded => write!(f, "Degraded"),
            ClusterPhase::Deleting => write!(f, "Deleting"),
            ClusterPhase::Deleted => write!(f, "Deleted"),
        }
    }
}

/// Role of a member in the database group.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Primary,
    Secondary,
    /// Member is offline or not (yet) part of the group.
    #[default]
    Unknown,
}

impl MemberRole {
    /// Value of the cluster-role label, if the role is known.
    pub fn label_value(&self) -> Option<&'static str> {
        match self {
            MemberRole::Primary => Some("PRIMARY"),
            MemberRole::Secondary => Some("SECONDARY"),
            MemberRole::Unknown => None,
        }
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label_value().unwrap_or("UNKNOWN"))
    }
}

/// Per-member status entry.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    /// Pod name.
    pub name: String,
    /// Ordinal index of the member.
    pub ordinal: i32,
    /// Role reported by the group.
    pub role: MemberRole,
    /// Whether the pod is Ready.
    pub ready: bool,
}

/// Condition describes the state of a cluster at a certain point.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: ConditionType,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(ConditionType::Ready, ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new(
            ConditionType::Progressing,
            progressing,
            reason,
            message,
            generation,
        )
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(ConditionType::Degraded, degraded, reason, message, generation)
    }

    /// Whether the condition status is "True".
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Types of conditions for InnoDBCluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionType {
    /// Cluster is fully operational and healthy.
    Ready,
    /// Reconciliation is in progress.
    Progressing,
    /// A member has failed.
    Degraded,
    /// An action exhausted its retries in the last cycle.
    ActionFailed,
    /// Member removal would break group quorum.
    QuorumAtRisk,
    /// The spec violates an invariant.
    SpecInvalid,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Ready => write!(f, "Ready"),
            ConditionType::Progressing => write!(f, "Progressing"),
            ConditionType::Degraded => write!(f, "Degraded"),
            ConditionType::ActionFailed => write!(f, "ActionFailed"),
            ConditionType::QuorumAtRisk => write!(f, "QuorumAtRisk"),
            ConditionType::SpecInvalid => write!(f, "SpecInvalid"),
        }
    }
}
