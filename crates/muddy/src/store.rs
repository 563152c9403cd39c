//! Persistence: JSON files under the data directory, and the snapshot
//! synchronizer that writes the player table on meaningful transitions.
//!
//! Snapshots are fire-and-forget: a failed write is logged and dropped, never
//! retried, and never blocks the operation that triggered it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ctx::Ctx;

pub const ROOMS_FILE: &str = "world.json";
pub const MONSTERS_FILE: &str = "monsters.json";
pub const PLAYERS_FILE: &str = "players.json";
pub const CREDS_FILE: &str = "creds.json";

/// One room as it appears in `world.json`. The `occupants` field is accepted
/// for compatibility with hand-written world files but ignored at load; the
/// monster roster is the source of truth for placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomFile {
    pub description: String,
    #[serde(default)]
    pub exits: HashMap<String, String>,
    #[serde(default)]
    pub occupants: Vec<String>,
}

/// One roster entry in `monsters.json`, tagged with its home room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonsterFile {
    pub name: String,
    pub at: String,
    pub hp: i32,
    pub max_hp: i32,
    pub speed_ms: u64,
    pub attack: i32,
    pub defense: i32,
    #[serde(default)]
    pub skills: Vec<String>,
    pub default_skill: String,
}

/// The persisted form of a player in `players.json`, keyed by username.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRec {
    pub name: String,
    pub at: String,
    pub hp: i32,
    pub max_hp: i32,
    pub speed_ms: u64,
    pub attack: i32,
    pub defense: i32,
    pub is_dead: bool,
    pub skills: Vec<String>,
    pub default_skill: String,
}

#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_rooms(&self) -> anyhow::Result<HashMap<String, RoomFile>> {
        let path = self.dir.join(ROOMS_FILE);
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))
    }

    pub fn load_monsters(&self) -> anyhow::Result<Vec<MonsterFile>> {
        let path = self.dir.join(MONSTERS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))
    }

    pub fn load_players(&self) -> anyhow::Result<HashMap<String, PlayerRec>> {
        self.load_or_empty(PLAYERS_FILE)
    }

    pub fn save_players(&self, table: &HashMap<String, PlayerRec>) -> anyhow::Result<()> {
        self.write_json(PLAYERS_FILE, table)
    }

    pub fn load_creds(&self) -> anyhow::Result<HashMap<String, String>> {
        self.load_or_empty(CREDS_FILE)
    }

    pub fn save_creds(&self, table: &HashMap<String, String>) -> anyhow::Result<()> {
        self.write_json(CREDS_FILE, table)
    }

    fn load_or_empty<T: serde::de::DeserializeOwned + Default>(
        &self,
        name: &str,
    ) -> anyhow::Result<T> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))
    }

    /// Write via a temp file then rename, so a crash mid-write never leaves a
    /// truncated table behind.
    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> anyhow::Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let s = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, s).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

/// Snapshot the full player table in the background. Called on registration,
/// login, and disconnect.
pub fn snapshot_players(ctx: &Arc<Ctx>) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let table = { ctx.world.lock().await.player_snapshot_table() };
        if let Err(e) = ctx.store.save_players(&table) {
            warn!(err = %e, "player snapshot failed");
        }
    });
}

/// Snapshot the credential table in the background. Called on registration.
pub fn snapshot_creds(ctx: &Arc<Ctx>) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let table = { ctx.creds.lock().await.by_user.clone() };
        if let Err(e) = ctx.store.save_creds(&table) {
            warn!(err = %e, "credential snapshot failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec() -> PlayerRec {
        PlayerRec {
            name: "Ava".to_string(),
            at: "start".to_string(),
            hp: 42,
            max_hp: 50,
            speed_ms: 500,
            attack: 10,
            defense: 2,
            is_dead: false,
            skills: vec!["punch".to_string()],
            default_skill: "punch".to_string(),
        }
    }

    #[test]
    fn players_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        let mut table = HashMap::new();
        table.insert("Ava".to_string(), rec());
        store.save_players(&table).unwrap();

        let back = store.load_players().unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back["Ava"], rec());
        // No stray temp file once the rename lands.
        assert!(!dir.path().join(format!("{PLAYERS_FILE}.tmp")).exists());
    }

    #[test]
    fn missing_tables_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(store.load_players().unwrap().is_empty());
        assert!(store.load_creds().unwrap().is_empty());
        assert!(store.load_monsters().unwrap().is_empty());
    }

    #[test]
    fn missing_world_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(store.load_rooms().is_err());
    }

    #[test]
    fn world_file_parses_with_defaulted_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ROOMS_FILE),
            r#"{"start":{"description":"A bare room."}}"#,
        )
        .unwrap();
        let rooms = Store::new(dir.path()).load_rooms().unwrap();
        assert!(rooms["start"].exits.is_empty());
        assert!(rooms["start"].occupants.is_empty());
    }
}
