//! Sessions: the binding between a live connection and an authenticated
//! player, plus the login/registration/disconnect lifecycle.
//!
//! At most one live session per player. A fresh login for an already-bound
//! player supersedes the old binding (its push cadence stops, its connection
//! goes quiet) without touching the player itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mudwire::Event;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::actor::ActorId;
use crate::auth;
use crate::combat;
use crate::ctx::Ctx;
use crate::recover;
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u128);

impl ConnId {
    pub fn random() -> Self {
        let mut b = [0u8; 16];
        getrandom::getrandom(&mut b).expect("getrandom");
        Self(u128::from_be_bytes(b))
    }

    pub fn hex(self) -> String {
        format!("{:032x}", self.0)
    }

    /// Good enough for log lines: XOR of the two halves.
    pub fn short(self) -> u64 {
        (self.0 as u64) ^ ((self.0 >> 64) as u64)
    }
}

#[derive(Debug)]
pub struct Session {
    pub conn: ConnId,
    pub username: String,
    pub player: ActorId,
    pub write_tx: mpsc::Sender<Bytes>,
    pub push_stop: watch::Sender<bool>,
}

#[derive(Debug, Default)]
pub struct Sessions {
    by_conn: HashMap<ConnId, Session>,
    by_player: HashMap<String, ConnId>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conn: ConnId) -> Option<&Session> {
        self.by_conn.get(&conn)
    }

    pub fn len(&self) -> usize {
        self.by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }

    /// The live outbound channel for a player, if one is bound.
    pub fn player_tx(&self, username: &str) -> Option<mpsc::Sender<Bytes>> {
        let conn = self.by_player.get(username)?;
        self.by_conn.get(conn).map(|s| s.write_tx.clone())
    }

    pub fn all_txs(&self) -> Vec<mpsc::Sender<Bytes>> {
        self.by_conn.values().map(|s| s.write_tx.clone()).collect()
    }

    /// Bind a session, displacing any prior binding for the same player or
    /// the same connection. Displaced sessions are returned so the caller can
    /// stop their cadences.
    pub fn bind(&mut self, sess: Session) -> Vec<Session> {
        let mut displaced = Vec::new();
        if let Some(old_conn) = self.by_player.remove(&sess.username) {
            if let Some(old) = self.by_conn.remove(&old_conn) {
                displaced.push(old);
            }
        }
        if let Some(old) = self.by_conn.remove(&sess.conn) {
            self.by_player.remove(&old.username);
            displaced.push(old);
        }
        self.by_player.insert(sess.username.clone(), sess.conn);
        self.by_conn.insert(sess.conn, sess);
        displaced
    }

    pub fn unbind(&mut self, conn: ConnId) -> Option<Session> {
        let sess = self.by_conn.remove(&conn)?;
        // Only drop the player index if it still points at this connection;
        // a superseding login may already own it.
        if self.by_player.get(&sess.username) == Some(&conn) {
            self.by_player.remove(&sess.username);
        }
        Some(sess)
    }
}

/// Send one event down a connection's write channel. Returns false when the
/// connection is gone; callers treat that as "stop caring".
pub async fn send_event(tx: &mpsc::Sender<Bytes>, ev: &Event) -> bool {
    tx.send(mudwire::encode_event(ev)).await.is_ok()
}

#[derive(Debug, Clone)]
pub enum RegisterError {
    DuplicateUsername,
    BadName,
    BadCredential,
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterError::DuplicateUsername => write!(f, "username already taken"),
            RegisterError::BadName => write!(f, "bad username"),
            RegisterError::BadCredential => write!(f, "bad credential"),
        }
    }
}

impl std::error::Error for RegisterError {}

/// Deliberately carries no detail: unknown user and bad credential read the
/// same from outside.
#[derive(Debug, Clone)]
pub struct LoginRejected;

fn valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 24
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Create a player and persist its credential. Does not log the player in.
pub async fn register(
    ctx: &Arc<Ctx>,
    username: &str,
    password: &str,
) -> Result<(), RegisterError> {
    let name = username.trim();
    if !valid_username(name) {
        return Err(RegisterError::BadName);
    }
    if password.is_empty() {
        return Err(RegisterError::BadCredential);
    }

    // The player table is the authoritative duplicate gate; check and insert
    // under one lock so two racing registrations cannot both pass.
    {
        let mut w = ctx.world.lock().await;
        if w.players.contains_key(name) {
            return Err(RegisterError::DuplicateUsername);
        }
        w.spawn_player(name);
    }
    {
        let mut creds = ctx.creds.lock().await;
        creds.by_user.insert(name.to_string(), password.to_string());
    }

    info!(player = name, "registered");
    store::snapshot_creds(ctx);
    store::snapshot_players(ctx);
    Ok(())
}

/// Verify the connection-bound proof and bind a session. On success the
/// player's regeneration cadence is ensured and the periodic state push
/// starts.
pub async fn login(
    ctx: &Arc<Ctx>,
    conn: ConnId,
    username: &str,
    submitted: &str,
    write_tx: mpsc::Sender<Bytes>,
) -> Result<String, LoginRejected> {
    let name = username.trim().to_string();

    let stored = { ctx.creds.lock().await.by_user.get(&name).cloned() };
    let Some(stored) = stored else {
        return Err(LoginRejected);
    };
    if !auth::verify(&stored, submitted, &conn.hex()) {
        return Err(LoginRejected);
    }

    let (player, alive) = {
        let mut w = ctx.world.lock().await;
        let Some(&pid) = w.players.get(&name) else {
            // Credential without a player record: the data files disagree.
            warn!(player = %name, "credential present but player missing");
            return Err(LoginRejected);
        };
        let a = w.actors.get_mut(&pid).expect("player index maps to actor");
        if !a.is_dead {
            a.regen_active = true;
        }
        (pid, !a.is_dead)
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let sess = Session {
        conn,
        username: name.clone(),
        player,
        write_tx: write_tx.clone(),
        push_stop: stop_tx,
    };
    let displaced = { ctx.sessions.lock().await.bind(sess) };
    for old in displaced {
        let _ = old.push_stop.send(true);
        info!(player = %name, old_conn = old.conn.short(), "superseded prior session");
    }

    if alive {
        recover::ensure_regen(ctx, player).await;
    }
    spawn_push(ctx, player, write_tx, stop_rx);
    store::snapshot_players(ctx);

    info!(player = %name, conn = conn.short(), "logged in");
    Ok(name)
}

/// Tear down a connection's session: stop its push cadence, cancel the
/// player's encounter if it is a participant, snapshot. The player survives.
pub async fn disconnect(ctx: &Arc<Ctx>, conn: ConnId) {
    let Some(sess) = ({ ctx.sessions.lock().await.unbind(conn) }) else {
        return;
    };
    let _ = sess.push_stop.send(true);

    let engaged = {
        ctx.world
            .lock()
            .await
            .actors
            .get(&sess.player)
            .and_then(|a| a.encounter)
    };
    if let Some(eid) = engaged {
        combat::cancel(ctx, eid).await;
    }

    store::snapshot_players(ctx);
    info!(player = %sess.username, conn = conn.short(), "disconnected");
}

/// The per-session push cadence: location and stats snapshots at a fixed
/// period, until the session stop signal fires or the connection dies.
fn spawn_push(
    ctx: &Arc<Ctx>,
    player: ActorId,
    tx: mpsc::Sender<Bytes>,
    mut stop: watch::Receiver<bool>,
) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let period = Duration::from_millis(ctx.cfg.push_ms.max(10));
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let (loc, stats) = {
                        let w = ctx.world.lock().await;
                        let Some(room) = w.location_of(player) else { break };
                        let room_id = room.id.clone();
                        (w.location_snapshot(&room_id), w.stats_snapshot(player))
                    };
                    if let Some(ev) = loc {
                        if !send_event(&tx, &ev).await {
                            break;
                        }
                    }
                    if let Some(ev) = stats {
                        if !send_event(&tx, &ev).await {
                            break;
                        }
                    }
                }
                _ = stop.changed() => break,
            }
        }
    });
}
