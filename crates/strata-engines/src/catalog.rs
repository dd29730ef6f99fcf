//! Lookups against the infrastructure catalog.
//!
//! The catalog is owned by the surrounding platform; provisioning only
//! reads it. [`MemoryCatalog`] is a concurrent in-process implementation
//! that can be refreshed while services read from it.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// Hypervisor family of a compute zone; decides device naming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorFamily {
    /// KVM, virtio disks
    Kvm,
    /// VMware, SCSI disks
    Vmware,
    /// Hyper-V, SCSI disks
    HyperV,
}

/// Compute zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeZone {
    /// Zone name
    pub name: String,
    /// Hypervisor family
    pub hypervisor: HypervisorFamily,
}

/// Site (availability zone) inside a compute zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Site name
    pub name: String,
    /// Owning compute zone
    pub zone: String,
    /// Availability zone passed to the backend
    pub availability_zone: String,
}

/// Network attached to a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network name
    pub name: String,
    /// Site the network lives in
    pub site: String,
    /// Address range
    pub cidr: String,
}

/// Security policy (firewall rule set)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Policy name
    pub name: String,
    /// Ports the policy opens
    pub open_ports: Vec<u16>,
}

/// Compute sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeFlavor {
    /// Flavor name
    pub name: String,
    /// Virtual CPUs
    pub vcpus: u32,
    /// Memory in MiB
    pub memory_mb: u64,
}

/// Volume sizing class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeFlavor {
    /// Flavor name
    pub name: String,
    /// Provisioned IOPS
    pub iops: u32,
}

/// Read access to catalog entities
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Compute zone by name
    async fn zone(&self, name: &str) -> EngineResult<Option<ComputeZone>>;

    /// Site by name
    async fn site(&self, name: &str) -> EngineResult<Option<Site>>;

    /// Network by name
    async fn network(&self, name: &str) -> EngineResult<Option<Network>>;

    /// Security policy by name
    async fn security_policy(&self, name: &str) -> EngineResult<Option<SecurityPolicy>>;

    /// Compute flavor by name
    async fn compute_flavor(&self, name: &str) -> EngineResult<Option<ComputeFlavor>>;

    /// Volume flavor by name
    async fn volume_flavor(&self, name: &str) -> EngineResult<Option<VolumeFlavor>>;
}

/// Look up an entity that must exist
pub async fn require<T, F>(kind: &'static str, name: &str, lookup: F) -> EngineResult<T>
where
    F: std::future::Future<Output = EngineResult<Option<T>>>,
{
    lookup.await?.ok_or_else(|| EngineError::not_found(kind, name))
}

/// Concurrent in-memory catalog
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    zones: Arc<DashMap<String, ComputeZone>>,
    sites: Arc<DashMap<String, Site>>,
    networks: Arc<DashMap<String, Network>>,
    policies: Arc<DashMap<String, SecurityPolicy>>,
    compute_flavors: Arc<DashMap<String, ComputeFlavor>>,
    volume_flavors: Arc<DashMap<String, VolumeFlavor>>,
}

impl MemoryCatalog {
    /// An empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a compute zone
    pub fn upsert_zone(&self, zone: ComputeZone) -> &Self {
        self.zones.insert(zone.name.clone(), zone);
        self
    }

    /// Insert or replace a site
    pub fn upsert_site(&self, site: Site) -> &Self {
        self.sites.insert(site.name.clone(), site);
        self
    }

    /// Insert or replace a network
    pub fn upsert_network(&self, network: Network) -> &Self {
        self.networks.insert(network.name.clone(), network);
        self
    }

    /// Insert or replace a security policy
    pub fn upsert_policy(&self, policy: SecurityPolicy) -> &Self {
        self.policies.insert(policy.name.clone(), policy);
        self
    }

    /// Insert or replace a compute flavor
    pub fn upsert_compute_flavor(&self, flavor: ComputeFlavor) -> &Self {
        self.compute_flavors.insert(flavor.name.clone(), flavor);
        self
    }

    /// Insert or replace a volume flavor
    pub fn upsert_volume_flavor(&self, flavor: VolumeFlavor) -> &Self {
        self.volume_flavors.insert(flavor.name.clone(), flavor);
        self
    }

    /// Remove a site and every network in it
    pub fn remove_site(&self, name: &str) {
        self.sites.remove(name);
        self.networks.retain(|_, network| network.site != name);
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn zone(&self, name: &str) -> EngineResult<Option<ComputeZone>> {
        Ok(self.zones.get(name).map(|e| e.value().clone()))
    }

    async fn site(&self, name: &str) -> EngineResult<Option<Site>> {
        Ok(self.sites.get(name).map(|e| e.value().clone()))
    }

    async fn network(&self, name: &str) -> EngineResult<Option<Network>> {
        Ok(self.networks.get(name).map(|e| e.value().clone()))
    }

    async fn security_policy(&self, name: &str) -> EngineResult<Option<SecurityPolicy>> {
        Ok(self.policies.get(name).map(|e| e.value().clone()))
    }

    async fn compute_flavor(&self, name: &str) -> EngineResult<Option<ComputeFlavor>> {
        Ok(self.compute_flavors.get(name).map(|e| e.value().clone()))
    }

    async fn volume_flavor(&self, name: &str) -> EngineResult<Option<VolumeFlavor>> {
        Ok(self.volume_flavors.get(name).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_and_refresh() {
        let catalog = MemoryCatalog::new();
        catalog
            .upsert_site(Site {
                name: "par1".to_string(),
                zone: "eu".to_string(),
                availability_zone: "eu-1a".to_string(),
            })
            .upsert_network(Network {
                name: "backend".to_string(),
                site: "par1".to_string(),
                cidr: "10.1.0.0/16".to_string(),
            });

        let site = require("site", "par1", catalog.site("par1")).await.unwrap();
        assert_eq!(site.availability_zone, "eu-1a");

        catalog.remove_site("par1");
        assert!(catalog.network("backend").await.unwrap().is_none());

        let err = require("site", "par1", catalog.site("par1")).await.unwrap_err();
        assert_eq!(err, EngineError::not_found("site", "par1"));
    }
}
