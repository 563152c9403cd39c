//! muddy: a small multiplayer text-world server.
//!
//! Clients speak JSON lines over TCP (see `mudwire`); the engine tracks
//! sessions, rooms, and concurrently ticking combat encounters.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mudwire::Event;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};

mod actor;
mod auth;
mod combat;
mod conn;
mod ctx;
mod recover;
mod session;
mod store;
mod world;

use crate::auth::Creds;
use crate::ctx::{Config, Ctx};
use crate::session::send_event;
use crate::store::Store;
use crate::world::World;

const HINT_TEXT: &str = "Welcome to muddy! Type @help for help";

fn usage_and_exit() -> ! {
    eprintln!(
        "muddy\n\n\
USAGE:\n  muddy [--bind HOST:PORT] [--data DIR]\n\n\
ENV:\n  MUDDY_BIND          default 127.0.0.1:4000\n  MUDDY_DATA_DIR      default data\n  MUDDY_PUSH_MS       default 1000 (per-session state push)\n  MUDDY_STATUS_MS     default 500 (encounter status/death check)\n  MUDDY_REGEN_MS      default 1000\n  MUDDY_REGEN_HP      default 1\n  MUDDY_HINT_MS       default 60000\n  MUDDY_WORLD_SEED    default 1\n"
    );
    std::process::exit(2);
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_args() -> Config {
    let mut bind: SocketAddr = std::env::var("MUDDY_BIND")
        .unwrap_or_else(|_| "127.0.0.1:4000".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let mut data_dir: PathBuf = std::env::var("MUDDY_DATA_DIR")
        .unwrap_or_else(|_| "data".to_string())
        .into();

    let push_ms = env_u64("MUDDY_PUSH_MS", 1_000).max(10);
    let status_ms = env_u64("MUDDY_STATUS_MS", 500).max(10);
    let regen_ms = env_u64("MUDDY_REGEN_MS", 1_000).max(10);
    let regen_hp = env_u64("MUDDY_REGEN_HP", 1).min(i32::MAX as u64) as i32;
    let hint_ms = env_u64("MUDDY_HINT_MS", 60_000).max(1_000);
    let world_seed = env_u64("MUDDY_WORLD_SEED", 1);

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--data" => {
                data_dir = it.next().map(PathBuf::from).unwrap_or_else(|| usage_and_exit());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        bind,
        data_dir,
        push_ms,
        status_ms,
        regen_ms,
        regen_hp,
        hint_ms,
        world_seed,
    }
}

/// Server-wide hint line to every connected session, on a slow cadence.
fn spawn_hint_broadcast(ctx: &Arc<Ctx>) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let period = Duration::from_millis(ctx.cfg.hint_ms);
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tick.tick().await;
            let txs = { ctx.sessions.lock().await.all_txs() };
            for tx in txs {
                send_event(
                    &tx,
                    &Event::Notice {
                        text: HINT_TEXT.to_string(),
                    },
                )
                .await;
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,muddy=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();
    let store = Store::new(&cfg.data_dir);
    let world = World::load(&store, cfg.world_seed)
        .with_context(|| format!("load world from {}", cfg.data_dir.display()))?;
    let creds = Creds {
        by_user: store.load_creds().context("load credentials")?,
    };
    info!(
        rooms = world.rooms.len(),
        players = world.players.len(),
        "world loaded"
    );

    let bind = cfg.bind;
    let listener = TcpListener::bind(bind).await?;
    info!(bind = %bind, "muddy listening");

    let ctx = Ctx::new(cfg, world, creds, store);
    spawn_hint_broadcast(&ctx);

    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = conn::handle_conn(ctx, stream, peer).await {
                warn!(peer = %peer, err = %e, "connection ended with error");
            }
        });
    }
}
