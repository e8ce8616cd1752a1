//! Versioned snapshots, migrations and snapshot stores

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{StateError, StateResult};
use crate::journal::JournalHead;
use crate::state::MarketState;

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 3;

/// Persisted marketplace state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub schema_version: u32,
    pub taken_at: DateTime<Utc>,
    pub state: MarketState,
    /// End of the event chain at the time of the snapshot
    #[serde(default)]
    pub journal: JournalHead,
    /// Reserved for data added by later schema versions
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl MarketSnapshot {
    pub fn new(state: MarketState, journal: JournalHead) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            taken_at: Utc::now(),
            state,
            journal,
            extensions: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> StateResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and bring a snapshot up to the current schema
    pub fn from_json(json: &str) -> StateResult<Self> {
        let mut snapshot: Self = serde_json::from_str(json)?;
        migrate(&mut snapshot)?;
        Ok(snapshot)
    }
}

// ============================================================================
// Migrations
// ============================================================================

/// A step from `from` to `from + 1`
struct Migration {
    from: u32,
    description: &'static str,
    apply: fn(&mut MarketSnapshot) -> StateResult<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        from: 1,
        description: "build the per-agent active proposal index",
        apply: rebuild_proposal_index,
    },
    Migration {
        from: 2,
        description: "make the ledger principal an environment operator",
        apply: grant_principal_operator,
    },
];

fn rebuild_proposal_index(snapshot: &mut MarketSnapshot) -> StateResult<()> {
    let indexed = snapshot.state.registry_mut().rebuild_index();
    let active = snapshot.state.registry().active_proposals().count();
    if indexed != active {
        return Err(StateError::Migration {
            from: 1,
            reason: format!("indexed {} proposals but {} are active", indexed, active),
        });
    }
    Ok(())
}

fn grant_principal_operator(snapshot: &mut MarketSnapshot) -> StateResult<()> {
    let principal = snapshot.state.principal();
    snapshot.state.grant_operator(principal);
    Ok(())
}

/// Run every pending migration in order. Returns how many ran.
///
/// Each migration runs only when the snapshot is at its source version and
/// bumps the version on success, so running this twice is a no-op.
pub fn migrate(snapshot: &mut MarketSnapshot) -> StateResult<usize> {
    if snapshot.schema_version > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchema {
            found: snapshot.schema_version,
            latest: SCHEMA_VERSION,
        });
    }

    let mut applied = 0;
    for migration in MIGRATIONS {
        if snapshot.schema_version != migration.from {
            continue;
        }
        (migration.apply)(snapshot)?;
        snapshot.schema_version = migration.from + 1;
        applied += 1;
        tracing::info!(
            from = migration.from,
            to = snapshot.schema_version,
            "applied snapshot migration: {}",
            migration.description
        );
    }

    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchema {
            found: snapshot.schema_version,
            latest: SCHEMA_VERSION,
        });
    }
    Ok(applied)
}

// ============================================================================
// Stores
// ============================================================================

/// Where snapshots live
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// The latest snapshot, migrated to the current schema, if one exists
    async fn load(&self) -> StateResult<Option<MarketSnapshot>>;

    /// Replace the stored snapshot
    async fn save(&self, snapshot: &MarketSnapshot) -> StateResult<()>;
}

/// Snapshot kept as a JSON file
///
/// Saves write a sibling temporary file and rename it over the target, so
/// a crash never leaves a half-written snapshot.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> StateResult<Option<MarketSnapshot>> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        MarketSnapshot::from_json(&json).map(Some)
    }

    async fn save(&self, snapshot: &MarketSnapshot) -> StateResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, snapshot.to_json()?).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "snapshot saved");
        Ok(())
    }
}

/// In-memory snapshot store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    json: RwLock<Option<String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with raw JSON, e.g. an older schema
    pub fn with_json(json: impl Into<String>) -> Self {
        Self {
            json: RwLock::new(Some(json.into())),
        }
    }

    pub async fn raw(&self) -> Option<String> {
        self.json.read().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> StateResult<Option<MarketSnapshot>> {
        match self.json.read().await.as_deref() {
            Some(json) => MarketSnapshot::from_json(json).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &MarketSnapshot) -> StateResult<()> {
        *self.json.write().await = Some(snapshot.to_json()?);
        Ok(())
    }
}
