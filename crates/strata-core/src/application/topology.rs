use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::link::{Edge, LinkKind, NodeRef};
use crate::domain::repository::ResourceGraph;
use crate::domain::stack::StackId;
use crate::{CoreError, ResourceId};

/// Maintains typed edges between stacks and their backing resources.
///
/// Stack-to-stack links are always written in both directions. Repeated
/// `add_link` calls accumulate duplicate edges unless deduplication is on.
#[derive(Clone)]
pub struct TopologyService {
    graph: Arc<dyn ResourceGraph>,
    deduplicate: bool,
}

impl TopologyService {
    /// Create a topology service
    pub fn new(graph: Arc<dyn ResourceGraph>, deduplicate: bool) -> Self {
        Self { graph, deduplicate }
    }

    /// Link `current` to `master` with `kind`, and `master` back with the reverse kind.
    /// Returns the number of edges written.
    pub async fn add_link(
        &self,
        current: &StackId,
        master: &StackId,
        kind: LinkKind,
    ) -> Result<usize, CoreError> {
        if current == master {
            return Err(CoreError::ValidationError(format!(
                "Stack {} cannot be linked to itself",
                current
            )));
        }
        let from = NodeRef::Stack(current.clone());
        let to = NodeRef::Stack(master.clone());

        let mut written = 0;
        written += self.add_edge(from.clone(), to.clone(), kind).await?;
        written += self.add_edge(to, from, kind.reverse()).await?;

        info!(stack = %current, master = %master, ?kind, written, "Linked stacks");
        Ok(written)
    }

    /// Remove both directions of a link. Returns the number of edges removed.
    pub async fn remove_link(
        &self,
        current: &StackId,
        master: &StackId,
        kind: LinkKind,
    ) -> Result<usize, CoreError> {
        let from = NodeRef::Stack(current.clone());
        let to = NodeRef::Stack(master.clone());

        let removed = self.graph.remove_edges(&from, &to, kind).await?
            + self.graph.remove_edges(&to, &from, kind.reverse()).await?;

        info!(stack = %current, master = %master, ?kind, removed, "Unlinked stacks");
        Ok(removed)
    }

    /// Remove every stack-to-stack edge touching the stack, in both directions
    pub async fn remove_all(&self, stack: &StackId) -> Result<usize, CoreError> {
        let node = NodeRef::Stack(stack.clone());
        let mut removed = 0;

        for edge in self.graph.edges_from(&node).await? {
            if edge.kind.is_topology() {
                removed += self.graph.remove_edges(&edge.source, &edge.target, edge.kind).await?;
            }
        }
        for edge in self.graph.edges_to(&node).await? {
            if edge.kind.is_topology() {
                removed += self.graph.remove_edges(&edge.source, &edge.target, edge.kind).await?;
            }
        }

        debug!(stack = %stack, removed, "Removed all topology links");
        Ok(removed)
    }

    /// Stack-to-stack edges leaving the stack
    pub async fn links_of(&self, stack: &StackId) -> Result<Vec<Edge>, CoreError> {
        let edges = self.graph.edges_from(&NodeRef::Stack(stack.clone())).await?;
        Ok(edges.into_iter().filter(|e| e.kind.is_topology()).collect())
    }

    /// Record that a stack owns or uses a backing resource
    pub async fn link_resource(&self, stack: &StackId, resource: &ResourceId) -> Result<(), CoreError> {
        self.add_edge(
            NodeRef::Stack(stack.clone()),
            NodeRef::Resource(resource.clone()),
            LinkKind::Resource,
        )
        .await
        .map(|_| ())
    }

    /// Drop the link between a stack and a backing resource
    pub async fn unlink_resource(&self, stack: &StackId, resource: &ResourceId) -> Result<usize, CoreError> {
        self.graph
            .remove_edges(
                &NodeRef::Stack(stack.clone()),
                &NodeRef::Resource(resource.clone()),
                LinkKind::Resource,
            )
            .await
    }

    /// Backing resources linked to the stack, in link order, without repeats
    pub async fn resources_of(&self, stack: &StackId) -> Result<Vec<ResourceId>, CoreError> {
        let edges = self.graph.edges_from(&NodeRef::Stack(stack.clone())).await?;
        let mut resources: Vec<ResourceId> = Vec::new();
        for edge in edges {
            if let (LinkKind::Resource, NodeRef::Resource(id)) = (edge.kind, edge.target) {
                if !resources.contains(&id) {
                    resources.push(id);
                }
            }
        }
        Ok(resources)
    }

    async fn add_edge(&self, source: NodeRef, target: NodeRef, kind: LinkKind) -> Result<usize, CoreError> {
        if self.deduplicate {
            let existing = self.graph.edges_from(&source).await?;
            if existing.iter().any(|e| e.connects(&source, &target, kind)) {
                debug!(source = %source, target = %target, ?kind, "Edge already present, skipping");
                return Ok(0);
            }
        }
        self.graph.add_edge(Edge::new(source, target, kind)).await?;
        Ok(1)
    }
}
