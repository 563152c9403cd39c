//! The world context: every registry and handle the engine needs, passed
//! down explicitly. There are no process-wide globals.
//!
//! Locking discipline: each of the mutexes below is held one at a time, for
//! short non-awaiting critical sections. Nothing holds a lock across a
//! channel send or a socket write, so cadence tasks can never deadlock or
//! stall each other behind a slow client.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::auth::Creds;
use crate::combat::CombatRegistry;
use crate::recover::RegenRegistry;
use crate::session::Sessions;
use crate::store::Store;
use crate::world::World;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    /// Per-session location/stats push period.
    pub push_ms: u64,
    /// Encounter status/death-check period.
    pub status_ms: u64,
    /// Regeneration tick period and amount healed per tick.
    pub regen_ms: u64,
    pub regen_hp: i32,
    /// Server-wide hint broadcast period.
    pub hint_ms: u64,
    pub world_seed: u64,
}

impl Config {
    /// Defaults used when an env var is absent; see `parse_args` in main.rs.
    pub fn defaults(bind: SocketAddr, data_dir: PathBuf) -> Self {
        Self {
            bind,
            data_dir,
            push_ms: 1_000,
            status_ms: 500,
            regen_ms: 1_000,
            regen_hp: 1,
            hint_ms: 60_000,
            world_seed: 1,
        }
    }
}

pub struct Ctx {
    pub cfg: Config,
    pub world: Mutex<World>,
    pub creds: Mutex<Creds>,
    pub sessions: Mutex<Sessions>,
    pub combat: Mutex<CombatRegistry>,
    pub regen: Mutex<RegenRegistry>,
    pub store: Store,
}

impl Ctx {
    pub fn new(cfg: Config, world: World, creds: Creds, store: Store) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            world: Mutex::new(world),
            creds: Mutex::new(creds),
            sessions: Mutex::new(Sessions::new()),
            combat: Mutex::new(CombatRegistry::new()),
            regen: Mutex::new(RegenRegistry::new()),
            store,
        })
    }
}
