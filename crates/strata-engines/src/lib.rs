//!
//! Strata Engines - database stack specialisation
//!
//! Turns a high-level request for a MySQL, PostgreSQL or SQL Server stack
//! into the ordered action list the core engine runs, and offers the
//! post-creation operation catalogue, replication updates and storage
//! growth for existing SQL stacks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attributes;
pub mod builder;
pub mod catalog;
pub mod context;
pub mod detail;
pub mod error;
pub mod growth;
pub mod operations;
pub mod profile;
pub mod service;
pub mod update;
pub mod variants;

pub use attributes::{ReplicationRole, SqlAttributes};
pub use builder::{builder_for, EngineBuilder};
pub use catalog::{
    Catalog, ComputeFlavor, ComputeZone, HypervisorFamily, MemoryCatalog, Network,
    SecurityPolicy, Site, VolumeFlavor,
};
pub use context::{derive_context, Credentials, ProvisioningContext, ReplicaSource, SqlRequest};
pub use detail::{MetricValue, SqlDetail, SqlStackDetail};
pub use error::{EngineError, EngineResult};
pub use growth::plan_growth;
pub use operations::{InstanceState, OperationTable, SqlOperation};
pub use profile::{profile, CredentialShape, EngineKind, EngineProfile};
pub use service::SqlStackService;
pub use update::{plan_replication_update, ReplicationChange};
