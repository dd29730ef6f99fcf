//! Static per-engine facts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// MySQL
    MySql,
    /// PostgreSQL
    PostgreSql,
    /// Microsoft SQL Server
    SqlServer,
}

impl EngineKind {
    /// Every engine
    pub const ALL: [EngineKind; 3] = [EngineKind::MySql, EngineKind::PostgreSql, EngineKind::SqlServer];

    /// Stable lowercase name, used in attributes and metric prefixes
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::MySql => "mysql",
            EngineKind::PostgreSql => "postgresql",
            EngineKind::SqlServer => "sqlserver",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(EngineKind::MySql),
            "postgresql" | "postgres" | "pg" => Ok(EngineKind::PostgreSql),
            "sqlserver" | "mssql" => Ok(EngineKind::SqlServer),
            _ => Err(EngineError::UnknownEngine(s.to_string())),
        }
    }
}

/// How bootstrap accounts are handed to the install playbook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialShape {
    /// A flat list of `{user, password, host}` entries
    Flat,
    /// Accounts with structured privilege grants per database
    Structured,
}

/// Static facts about an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineProfile {
    /// Engine
    pub kind: EngineKind,
    /// Name shown to operators
    pub display_name: &'static str,
    /// Default listener port
    pub default_port: u16,
    /// Base image for the compute instance
    pub base_image: &'static str,
    /// Package installed from the mirror
    pub package: &'static str,
    /// Install and configure playbook
    pub install_playbook: &'static str,
    /// Account bootstrap playbook
    pub accounts_playbook: &'static str,
    /// Replication reconfiguration playbook
    pub replication_playbook: &'static str,
    /// Built-in superuser
    pub superuser: &'static str,
    /// Mount point of the data volume
    pub data_mount: &'static str,
    /// Mount point of the backup volume, for engines that get one
    pub backup_mount: Option<&'static str>,
    /// Bootstrap account shape
    pub credential_shape: CredentialShape,
    /// Whether the engine takes extensions
    pub supports_extensions: bool,
    /// Base images that need the mirror proxy configured on the host
    pub proxied_images: &'static [&'static str],
    /// Installable versions, newest last
    pub versions: &'static [&'static str],
    /// License edition passed to the installer
    pub license: Option<&'static str>,
}

impl EngineProfile {
    /// Version used when the request names none
    pub fn default_version(&self) -> &'static str {
        self.versions.last().copied().unwrap_or("latest")
    }

    /// Whether `version` is installable
    pub fn supports_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| *v == version)
    }

    /// Whether the base image needs the proxy bootstrap
    pub fn needs_proxy(&self) -> bool {
        self.proxied_images.contains(&self.base_image)
    }
}

static MYSQL: EngineProfile = EngineProfile {
    kind: EngineKind::MySql,
    display_name: "MySQL",
    default_port: 3306,
    base_image: "rocky-9",
    package: "mysql-server",
    install_playbook: "mysql_install",
    accounts_playbook: "mysql_accounts",
    replication_playbook: "mysql_replication",
    superuser: "root",
    data_mount: "/var/lib/mysql",
    backup_mount: None,
    credential_shape: CredentialShape::Flat,
    supports_extensions: false,
    proxied_images: &["rocky-9"],
    versions: &["5.7", "8.0", "8.4"],
    license: None,
};

static POSTGRESQL: EngineProfile = EngineProfile {
    kind: EngineKind::PostgreSql,
    display_name: "PostgreSQL",
    default_port: 5432,
    base_image: "debian-12",
    package: "postgresql",
    install_playbook: "postgresql_install",
    accounts_playbook: "postgresql_roles",
    replication_playbook: "postgresql_streaming",
    superuser: "postgres",
    data_mount: "/var/lib/postgresql",
    backup_mount: None,
    credential_shape: CredentialShape::Structured,
    supports_extensions: true,
    proxied_images: &[],
    versions: &["14", "15", "16"],
    license: None,
};

static SQLSERVER: EngineProfile = EngineProfile {
    kind: EngineKind::SqlServer,
    display_name: "SQL Server",
    default_port: 1433,
    base_image: "ubuntu-22.04",
    package: "mssql-server",
    install_playbook: "mssql_install",
    accounts_playbook: "mssql_logins",
    replication_playbook: "mssql_availability_group",
    superuser: "sa",
    data_mount: "/var/opt/mssql/data",
    backup_mount: Some("/var/opt/mssql/backup"),
    credential_shape: CredentialShape::Structured,
    supports_extensions: false,
    proxied_images: &["ubuntu-22.04"],
    versions: &["2019", "2022"],
    license: Some("Developer"),
};

/// Profile of an engine
pub fn profile(kind: EngineKind) -> &'static EngineProfile {
    match kind {
        EngineKind::MySql => &MYSQL,
        EngineKind::PostgreSql => &POSTGRESQL,
        EngineKind::SqlServer => &SQLSERVER,
    }
}
