//! The connection gateway: one reader loop and one writer task per TCP
//! client, decoding JSON-line intents and dispatching them against the
//! engine. `dispatch_intent` is socket-free so the whole intent surface can
//! be driven from tests.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use mudio::LineReader;
use mudwire::{Event, Intent};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::info;

use crate::combat::{self, FightError};
use crate::ctx::Ctx;
use crate::session::{self, send_event, ConnId};
use crate::world::MoveError;

const NOT_LOGGED_IN: &str = "You are not logged in.";

pub async fn handle_conn(
    ctx: Arc<Ctx>,
    stream: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let conn = ConnId::random();
    let (rd, mut wr) = stream.into_split();

    let (write_tx, mut write_rx) = mpsc::channel::<Bytes>(128);
    tokio::spawn(async move {
        while let Some(b) = write_rx.recv().await {
            if wr.write_all(&b[..]).await.is_err() {
                break;
            }
        }
    });

    info!(conn = conn.short(), peer = %peer, "client connected");
    send_event(&write_tx, &Event::ConnectionId { id: conn.hex() }).await;

    let mut lr = LineReader::new(rd);
    loop {
        match lr.read_line().await {
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                let intent = match mudwire::decode_intent(&line) {
                    Ok(i) => i,
                    // Unknown input is echoed back, not rejected.
                    Err(_) => Intent::Command {
                        text: String::from_utf8_lossy(&line).into_owned(),
                    },
                };
                if dispatch_intent(&ctx, conn, &write_tx, intent).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                info!(conn = conn.short(), err = %e, "connection read failed");
                break;
            }
        }
    }

    session::disconnect(&ctx, conn).await;
    info!(conn = conn.short(), peer = %peer, "client disconnected");
    Ok(())
}

async fn bound(ctx: &Arc<Ctx>, conn: ConnId) -> Option<(crate::actor::ActorId, String)> {
    let sessions = ctx.sessions.lock().await;
    sessions.get(conn).map(|s| (s.player, s.username.clone()))
}

/// Handle one intent. Returns true when the connection should close (an
/// explicit disconnect); the caller then runs the common teardown path.
pub async fn dispatch_intent(
    ctx: &Arc<Ctx>,
    conn: ConnId,
    tx: &mpsc::Sender<Bytes>,
    intent: Intent,
) -> bool {
    match intent {
        Intent::Register { username, password } => {
            match session::register(ctx, &username, &password).await {
                Ok(()) => {
                    send_event(tx, &Event::RegistrationAccepted).await;
                }
                Err(e) => {
                    send_event(
                        tx,
                        &Event::RegistrationRejected {
                            reason: e.to_string(),
                        },
                    )
                    .await;
                }
            }
        }
        Intent::Login {
            username,
            password_hash,
        } => match session::login(ctx, conn, &username, &password_hash, tx.clone()).await {
            Ok(name) => {
                send_event(
                    tx,
                    &Event::LoginAccepted {
                        username: name.clone(),
                    },
                )
                .await;
                send_event(
                    tx,
                    &Event::Notice {
                        text: format!("Welcome {name}!"),
                    },
                )
                .await;
            }
            Err(_) => {
                send_event(tx, &Event::LoginRejected).await;
            }
        },
        Intent::Move { direction } => {
            let Some((player, _)) = bound(ctx, conn).await else {
                notice(tx, NOT_LOGGED_IN).await;
                return false;
            };
            let moved = {
                let mut w = ctx.world.lock().await;
                match w.move_actor(player, &direction) {
                    Ok(dest) => {
                        let engaged = w.actors.get(&player).and_then(|a| a.encounter);
                        Ok((engaged, w.location_snapshot(&dest)))
                    }
                    Err(e) => Err(e),
                }
            };
            match moved {
                Ok((engaged, snap)) => {
                    // Leaving the room is an external cancel for any fight
                    // the mover is part of.
                    if let Some(eid) = engaged {
                        combat::cancel(ctx, eid).await;
                        notice(tx, "You break off the fight.").await;
                    }
                    if let Some(ev) = snap {
                        send_event(tx, &ev).await;
                    }
                }
                Err(MoveError::NoSuchExit) => {
                    notice(tx, "You cannot move in that direction").await;
                }
            }
        }
        Intent::Fight { target, skill } => {
            let Some((player, _)) = bound(ctx, conn).await else {
                notice(tx, NOT_LOGGED_IN).await;
                return false;
            };
            let dead = {
                let w = ctx.world.lock().await;
                w.actors.get(&player).map(|a| a.is_dead).unwrap_or(true)
            };
            if dead {
                notice(tx, "You are in no state to fight.").await;
                return false;
            }
            match combat::start(ctx, player, &target, skill.as_deref()).await {
                Ok(_) => {}
                Err(FightError::TargetNotInRoom) => {
                    notice(tx, "Target missing").await;
                }
                Err(FightError::TargetDead) => {
                    notice(tx, &format!("{target} is already dead.")).await;
                }
                Err(FightError::AlreadyEngaged) => {
                    notice(tx, "Already in combat.").await;
                }
            }
        }
        Intent::Chat { to, body } => {
            let Some((_, from)) = bound(ctx, conn).await else {
                notice(tx, NOT_LOGGED_IN).await;
                return false;
            };
            let peer_tx = { ctx.sessions.lock().await.player_tx(&to) };
            match peer_tx {
                Some(ptx) => {
                    send_event(&ptx, &Event::ChatMessage { from, to, body }).await;
                }
                None => {
                    notice(tx, &format!("{to} is not here.")).await;
                }
            }
        }
        Intent::Disconnect => return true,
        Intent::Command { text } => {
            // Echoed back unchanged, like the original server.
            send_event(tx, &Event::Notice { text }).await;
        }
    }
    false
}

async fn notice(tx: &mpsc::Sender<Bytes>, text: &str) {
    send_event(
        tx,
        &Event::Notice {
            text: text.to_string(),
        },
    )
    .await;
}
