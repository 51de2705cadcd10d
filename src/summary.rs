//! Tabular summary of InnoDBClusters, as shown by `kubectl get ic`.

use kube::ResourceExt;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::crd::InnoDBCluster;

/// One summary row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Tabled)]
pub struct ClusterSummaryRow {
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "STATUS")]
    pub status: String,
    #[tabled(rename = "ONLINE")]
    pub online: String,
    #[tabled(rename = "INSTANCES")]
    pub instances: String,
    /// Empty when no router is configured
    #[tabled(rename = "ROUTERS")]
    pub routers: String,
    #[tabled(rename = "AGE")]
    pub age: String,
}

/// Summarize `cluster` as seen at `now`.
pub fn summarize(cluster: &InnoDBCluster, now: jiff::Timestamp) -> ClusterSummaryRow {
    let summary = cluster.status.as_ref().and_then(|s| s.cluster.as_ref());
    ClusterSummaryRow {
        name: cluster.name_any(),
        status: summary.map(|c| c.status.to_string()).unwrap_or_default(),
        online: summary
            .map(|c| c.online_instances.to_string())
            .unwrap_or_default(),
        instances: cluster.spec.instances.to_string(),
        routers: cluster
            .spec
            .router
            .as_ref()
            .map(|r| r.instances.to_string())
            .unwrap_or_default(),
        age: cluster
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| format_age(now.as_second() - t.0.as_second()))
            .unwrap_or_default(),
    }
}

/// Render an age in seconds the way kubectl does.
pub fn format_age(seconds: i64) -> String {
    let seconds = seconds.max(0);
    match seconds {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

/// Render rows as a borderless table.
pub fn render(rows: &[ClusterSummaryRow]) -> String {
    let mut table = Table::new(rows);
    table.with(Style::blank());
    table.to_string()
}
