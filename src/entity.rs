//! # Managed server definitions.
//!
//! An [`Entity`] is one supervised process definition: what to run
//! ([`ProcessKind`] + version), with which resources, and where its lifecycle
//! currently stands ([`EntityStatus`]). Entities are owned by the
//! [`EntityStore`](crate::EntityStore) collaborator; the supervisor and the
//! provisioner only read them and patch status fields.
//!
//! ## Status machine
//! ```text
//! downloading ──► stopped ◄──► running
//!      │
//!      └────────► error          (provisioning only)
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Allocates a fresh short id (first 8 hex chars of a v4 UUID).
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    /// Borrows the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Server flavour; selects the artifact catalog and the package directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// Plain server from the direct version manifest.
    Vanilla,
    /// Build-indexed plugin server.
    Paper,
    /// Loader + installer composite mod server.
    Fabric,
    /// Promotion-map mod server (installer artifact).
    Forge,
}

impl ProcessKind {
    /// All supported kinds.
    pub const ALL: [ProcessKind; 4] = [
        ProcessKind::Vanilla,
        ProcessKind::Paper,
        ProcessKind::Fabric,
        ProcessKind::Forge,
    ];

    /// Lowercase name, also used as the loader/category tag in package catalogs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Vanilla => "vanilla",
            ProcessKind::Paper => "paper",
            ProcessKind::Fabric => "fabric",
            ProcessKind::Forge => "forge",
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown process kind {s:?}"))
    }
}

/// Lifecycle status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Artifact download in progress.
    Downloading,
    /// Provisioned and not running.
    Stopped,
    /// A supervised process is registered.
    Running,
    /// Provisioning failed.
    Error,
}

impl EntityStatus {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Downloading => "downloading",
            EntityStatus::Stopped => "stopped",
            EntityStatus::Running => "running",
            EntityStatus::Error => "error",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed server definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Immutable identifier.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Server flavour.
    #[serde(rename = "server_type")]
    pub kind: ProcessKind,
    /// Declared game version.
    pub version: String,
    /// Lifecycle status.
    pub status: EntityStatus,
    /// Network port.
    pub port: u16,
    /// Initial heap in MiB.
    pub ram_min: u32,
    /// Maximum heap in MiB.
    pub ram_max: u32,
    /// Player slots advertised in the default properties.
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    /// Acceptance gate required before the first start.
    #[serde(default)]
    pub eula_accepted: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful start.
    #[serde(default)]
    pub last_started: Option<DateTime<Utc>>,
}

fn default_max_players() -> u32 {
    20
}

impl Entity {
    /// Builds a fresh entity from a creation request, in `downloading` state.
    pub fn from_request(id: EntityId, req: NewEntity) -> Self {
        Self {
            id,
            name: req.name,
            kind: req.kind,
            version: req.version,
            status: EntityStatus::Downloading,
            port: req.port,
            ram_min: req.ram_min,
            ram_max: req.ram_max,
            max_players: default_max_players(),
            eula_accepted: false,
            created_at: Utc::now(),
            last_started: None,
        }
    }
}

/// Creation request for a new entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntity {
    /// Display name.
    pub name: String,
    /// Server flavour.
    #[serde(rename = "server_type")]
    pub kind: ProcessKind,
    /// Game version to provision.
    pub version: String,
    /// Initial heap in MiB.
    #[serde(default = "default_ram_min")]
    pub ram_min: u32,
    /// Maximum heap in MiB.
    #[serde(default = "default_ram_max")]
    pub ram_max: u32,
    /// Network port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_ram_min() -> u32 {
    1024
}

fn default_ram_max() -> u32 {
    2048
}

fn default_port() -> u16 {
    25565
}

impl NewEntity {
    /// Request with default resources (1024/2048 MiB, port 25565).
    pub fn new(name: impl Into<String>, kind: ProcessKind, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            version: version.into(),
            ram_min: default_ram_min(),
            ram_max: default_ram_max(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_short_and_distinct() {
        let a = EntityId::generate();
        let b = EntityId::generate();
        assert_eq!(a.as_str().len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("Fabric".parse::<ProcessKind>(), Ok(ProcessKind::Fabric));
        assert!("bukkit".parse::<ProcessKind>().is_err());
    }

    #[test]
    fn test_entity_json_shape() {
        let e = Entity::from_request(
            EntityId::from("abc12345"),
            NewEntity::new("Survival", ProcessKind::Paper, "1.20.1"),
        );
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["server_type"], "paper");
        assert_eq!(v["status"], "downloading");
        assert_eq!(v["ram_max"], 2048);
        assert_eq!(v["eula_accepted"], false);

        let back: Entity = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
    }
}
