//! Read-only projection of a SQL stack.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strata_core::{Edge, LinkKind, StackInfo};

use crate::attributes::{ReplicationRole, SqlAttributes};
use crate::growth::allocated_storage_gb;

/// One utilisation sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Sampled value
    pub value: f64,
    /// Unit of the value
    pub unit: String,
}

/// Engine-specific part of a stack projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlDetail {
    /// Engine of the stack
    pub engine: String,
    /// Engine version
    pub version: String,
    /// Address clients connect to, once the instance has one
    pub listener_address: Option<String>,
    /// Listener port
    pub listener_port: u16,
    /// Replication role
    pub replication_role: String,
    /// Whether the monitoring agent is installed
    pub monitoring_enabled: bool,
    /// Whether logs are shipped
    pub log_shipping_enabled: bool,
    /// Storage attached to the instance
    pub allocated_storage_gb: u64,
    /// Utilisation keyed by `<engine>.<counter>`
    pub metrics: BTreeMap<String, MetricValue>,
}

impl SqlDetail {
    /// Project attributes, the stack's outgoing links and the instance
    /// detail tree
    ///
    /// A missing or unreachable instance yields an empty metric set and the
    /// allocation recorded in the attributes.
    pub fn project(attrs: &SqlAttributes, links: &[Edge], instance: Option<&Value>) -> Self {
        let listener_address = instance
            .and_then(|i| i.pointer("/addresses/0/ip"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let allocated = instance
            .map(allocated_storage_gb)
            .filter(|gb| *gb > 0)
            .unwrap_or(attrs.allocated_storage_gb);

        let metrics = instance
            .and_then(|i| i.get("utilization"))
            .and_then(Value::as_object)
            .map(|counters| {
                counters
                    .iter()
                    .filter_map(|(counter, sample)| {
                        metric(sample, counter)
                            .map(|value| (format!("{}.{}", attrs.engine, counter), value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            engine: attrs.engine.to_string(),
            version: attrs.version.clone(),
            listener_address,
            listener_port: attrs.port,
            replication_role: effective_role(attrs.replication_role, links).as_str().to_string(),
            monitoring_enabled: attrs.monitoring,
            log_shipping_enabled: attrs.log_shipping,
            allocated_storage_gb: allocated,
            metrics,
        }
    }
}

/// A stack never written as a replica is a master while replicas link to it
pub fn effective_role(stored: ReplicationRole, links: &[Edge]) -> ReplicationRole {
    match stored {
        ReplicationRole::Standalone if links.iter().any(|e| e.kind == LinkKind::MasterOf) => {
            ReplicationRole::Master
        }
        other => other,
    }
}

fn metric(sample: &Value, counter: &str) -> Option<MetricValue> {
    match sample {
        Value::Number(n) => n.as_f64().map(|value| MetricValue {
            value,
            unit: unit_for(counter).to_string(),
        }),
        Value::Object(fields) => {
            let value = fields.get("value").and_then(Value::as_f64)?;
            let unit = fields
                .get("unit")
                .and_then(Value::as_str)
                .unwrap_or_else(|| unit_for(counter));
            Some(MetricValue {
                value,
                unit: unit.to_string(),
            })
        }
        _ => None,
    }
}

fn unit_for(counter: &str) -> &'static str {
    if counter.ends_with("_percent") || counter.ends_with("_pct") {
        "percent"
    } else if counter.ends_with("_bytes") {
        "bytes"
    } else if counter.ends_with("_gb") {
        "GB"
    } else if counter.ends_with("_ms") {
        "ms"
    } else {
        "count"
    }
}

/// Generic stack projection plus the SQL view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStackDetail {
    /// Generic projection
    pub info: StackInfo,
    /// SQL view
    pub sql: SqlDetail,
}
