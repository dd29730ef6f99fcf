use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::stack::StackId;
use crate::ResourceId;

/// Typed edge kinds in the resource graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Stack owns or uses a backing resource
    Resource,
    /// Source stack replicates from the target
    ReplicaOf,
    /// Source stack is the replication master of the target
    MasterOf,
}

impl LinkKind {
    /// Kind of the edge recorded in the opposite direction
    pub fn reverse(&self) -> LinkKind {
        match self {
            LinkKind::Resource => LinkKind::Resource,
            LinkKind::ReplicaOf => LinkKind::MasterOf,
            LinkKind::MasterOf => LinkKind::ReplicaOf,
        }
    }

    /// Whether the edge connects two stacks
    pub fn is_topology(&self) -> bool {
        !matches!(self, LinkKind::Resource)
    }
}

/// A node in the resource graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum NodeRef {
    /// A stack
    Stack(StackId),
    /// A backing resource
    Resource(ResourceId),
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Stack(id) => write!(f, "stack:{}", id),
            NodeRef::Resource(id) => write!(f, "resource:{}", id),
        }
    }
}

/// A typed, directed edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node
    pub source: NodeRef,
    /// Target node
    pub target: NodeRef,
    /// Edge kind
    pub kind: LinkKind,
    /// When the edge was recorded
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// New edge stamped now
    pub fn new(source: NodeRef, target: NodeRef, kind: LinkKind) -> Self {
        Self {
            source,
            target,
            kind,
            created_at: Utc::now(),
        }
    }

    /// Same endpoints and kind, ignoring the timestamp
    pub fn connects(&self, source: &NodeRef, target: &NodeRef, kind: LinkKind) -> bool {
        &self.source == source && &self.target == target && self.kind == kind
    }

    /// Whether either endpoint is the node
    pub fn touches(&self, node: &NodeRef) -> bool {
        &self.source == node || &self.target == node
    }
}
