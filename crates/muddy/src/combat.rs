//! The combat coordinator: runs one encounter between a player and a monster
//! to completion, with exactly-once termination.
//!
//! An accepted fight arms three independent cadence tasks sharing one stop
//! signal: the initiator's attack swing, the target's attack swing, and a
//! status/death check. Termination — death observed by the status cadence, or
//! an external cancel (disconnect, initiator leaving the room) — goes through
//! `close_locked`, which checks and sets the encounter's `closed` flag inside
//! a single world-lock critical section. Whoever wins that race fires the
//! death side effects and releases the scheduled work; everyone else finds
//! the encounter gone and stops quietly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mudwire::Event;
use tokio::sync::watch;
use tracing::info;

use crate::actor::{self, ActorId};
use crate::ctx::Ctx;
use crate::recover;
use crate::session::send_event;
use crate::world::{Encounter, EncounterId, World};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FightError {
    TargetNotInRoom,
    TargetDead,
    AlreadyEngaged,
}

impl std::fmt::Display for FightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FightError::TargetNotInRoom => write!(f, "target missing"),
            FightError::TargetDead => write!(f, "target is already dead"),
            FightError::AlreadyEngaged => write!(f, "already engaged"),
        }
    }
}

impl std::error::Error for FightError {}

/// Stop signals for running encounters, keyed by encounter id. The watch
/// sender is the only handle; the cadence tasks exit when it fires or when
/// the encounter record disappears.
#[derive(Debug, Default)]
pub struct CombatRegistry {
    stops: HashMap<EncounterId, watch::Sender<bool>>,
}

impl CombatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    fn insert(&mut self, eid: EncounterId, stop: watch::Sender<bool>) {
        self.stops.insert(eid, stop);
    }

    fn remove(&mut self, eid: EncounterId) -> Option<watch::Sender<bool>> {
        self.stops.remove(&eid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    TargetDead,
    InitiatorDead,
    Cancelled,
}

struct CloseOutcome {
    reason: CloseReason,
    target_name: String,
}

/// Validate and arm a new encounter. Fails without creating anything or
/// mutating any actor.
pub async fn start(
    ctx: &Arc<Ctx>,
    player: ActorId,
    target_name: &str,
    requested_skill: Option<&str>,
) -> Result<EncounterId, FightError> {
    let (eid, target, skill, target_skill, init_speed, tgt_speed, username, tgt_name) = {
        let mut guard = ctx.world.lock().await;
        let w = &mut *guard;

        let Some(init) = w.actors.get(&player) else {
            return Err(FightError::TargetNotInRoom);
        };
        if init.encounter.is_some() {
            return Err(FightError::AlreadyEngaged);
        }
        let room = init.location.clone();

        // Look through the room's occupant set by name, corpses included:
        // a monster killed in the current status window is still listed, and
        // fighting it must read as "dead", not "missing".
        let actors = &w.actors;
        let found = w.rooms.get(&room).and_then(|r| {
            r.occupants.iter().copied().find(|id| {
                actors
                    .get(id)
                    .is_some_and(|a| a.name.eq_ignore_ascii_case(target_name))
            })
        });
        let Some(tid) = found else {
            return Err(FightError::TargetNotInRoom);
        };
        let tgt = w.actors.get(&tid).expect("occupant ids map to actors");
        if tgt.is_dead {
            return Err(FightError::TargetDead);
        }
        if tgt.encounter.is_some() {
            // One encounter per monster; racing status checks double-firing
            // its death is exactly the hazard this rejects.
            return Err(FightError::AlreadyEngaged);
        }

        let init = w.actors.get(&player).expect("looked up above");
        let skill = init.resolve_skill(requested_skill).to_string();
        let username = init.username().unwrap_or_default().to_string();
        let init_speed = init.speed_ms;
        let tgt_speed = tgt.speed_ms;
        let target_skill = tgt.default_skill.clone();
        let tgt_name = tgt.name.clone();

        let eid = w.alloc_encounter_id();
        w.encounters.insert(
            eid,
            Encounter {
                id: eid,
                initiator: player,
                target: tid,
                skill: skill.clone(),
                closed: false,
            },
        );
        w.actors.get_mut(&player).expect("initiator exists").encounter = Some(eid);
        let t = w.actors.get_mut(&tid).expect("target exists");
        t.encounter = Some(eid);
        // Source call order: the target's recovery is (re)ensured just before
        // the fight begins; engagement then pauses it.
        t.regen_active = true;

        (
            eid,
            tid,
            skill,
            target_skill,
            init_speed,
            tgt_speed,
            username,
            tgt_name,
        )
    };

    recover::ensure_regen(ctx, target).await;

    let (stop_tx, stop_rx) = watch::channel(false);
    {
        ctx.combat.lock().await.insert(eid, stop_tx);
    }

    spawn_attack(
        ctx,
        eid,
        player,
        target,
        skill,
        init_speed,
        username.clone(),
        true,
        stop_rx.clone(),
    );
    spawn_attack(
        ctx,
        eid,
        target,
        player,
        target_skill,
        tgt_speed,
        username.clone(),
        false,
        stop_rx.clone(),
    );
    spawn_status(ctx, eid, player, target, username.clone(), stop_rx);

    info!(
        encounter = eid.0,
        player = %username,
        target = %tgt_name,
        "encounter started"
    );
    Ok(eid)
}

/// External cancellation (disconnect, initiator left the room). Returns false
/// when the encounter was already terminal — cancelling twice is safe.
pub async fn cancel(ctx: &Arc<Ctx>, eid: EncounterId) -> bool {
    let closed = {
        let mut w = ctx.world.lock().await;
        close_locked(&mut w, eid, CloseReason::Cancelled).is_some()
    };
    if !closed {
        return false;
    }
    release(ctx, eid).await;
    info!(encounter = eid.0, "encounter cancelled");
    true
}

/// Drop the registry entry and fire the stop signal, ending all three
/// cadences.
async fn release(ctx: &Arc<Ctx>, eid: EncounterId) {
    let stop = { ctx.combat.lock().await.remove(eid) };
    if let Some(s) = stop {
        let _ = s.send(true);
    }
}

/// The terminal transition. Must be called with the world lock held; the
/// first caller wins, every later caller gets None. On a target death this
/// also fires the death side effects (occupant removal, permanent regen
/// stop) — exactly once, because only the winner reaches them.
fn close_locked(w: &mut World, eid: EncounterId, reason: CloseReason) -> Option<CloseOutcome> {
    let enc = w.encounters.get_mut(&eid)?;
    if enc.closed {
        return None;
    }
    enc.closed = true;
    let initiator = enc.initiator;
    let target = enc.target;
    w.encounters.remove(&eid);

    if let Some(a) = w.actors.get_mut(&initiator) {
        a.encounter = None;
    }

    let mut target_name = String::new();
    let mut dead_monster: Option<(String, ActorId)> = None;
    if let Some(t) = w.actors.get_mut(&target) {
        t.encounter = None;
        target_name = t.name.clone();
        if reason == CloseReason::TargetDead {
            t.regen_active = false;
            dead_monster = Some((t.location.clone(), t.id));
        }
        // On a cancel the target keeps regenerating: clearing the
        // back-reference above is what lifts the engagement pause.
    }
    if let Some((room, tid)) = dead_monster {
        w.remove_occupant(&room, tid);
    }

    Some(CloseOutcome {
        reason,
        target_name,
    })
}

/// One side's attack cadence. Swings every `period_ms`; damage application
/// and the dead-target no-op both happen under the world lock.
#[allow(clippy::too_many_arguments)]
fn spawn_attack(
    ctx: &Arc<Ctx>,
    eid: EncounterId,
    attacker: ActorId,
    defender: ActorId,
    skill: String,
    period_ms: u64,
    viewer: String,
    attacker_is_player: bool,
    mut stop: watch::Receiver<bool>,
) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let period = Duration::from_millis(period_ms.max(10));
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let msg = {
                        let mut guard = ctx.world.lock().await;
                        let w = &mut *guard;
                        let Some(enc) = w.encounters.get(&eid) else { break };
                        if enc.closed {
                            break;
                        }
                        let (Some(att), Some(def)) =
                            (w.actors.get(&attacker), w.actors.get(&defender))
                        else {
                            break;
                        };
                        if att.is_dead || def.is_dead {
                            // Let the status cadence observe and close; a
                            // swing in this window must not touch hp.
                            None
                        } else {
                            let att_name = att.name.clone();
                            let def_name = def.name.clone();
                            let dmg = actor::roll_damage(att, def, &skill, &mut w.rng);
                            if dmg > 0 {
                                w.actors
                                    .get_mut(&defender)
                                    .expect("defender present above")
                                    .apply_damage(dmg);
                            }
                            Some(swing_message(
                                attacker_is_player,
                                &att_name,
                                &def_name,
                                &skill,
                                dmg,
                            ))
                        }
                    };
                    if let Some(text) = msg {
                        let tx = { ctx.sessions.lock().await.player_tx(&viewer) };
                        if let Some(tx) = tx {
                            send_event(&tx, &Event::Notice { text }).await;
                        }
                    }
                }
                _ = stop.changed() => break,
            }
        }
    });
}

fn swing_message(
    attacker_is_player: bool,
    att_name: &str,
    def_name: &str,
    skill: &str,
    dmg: i32,
) -> String {
    if attacker_is_player {
        if dmg == 0 {
            format!("You missed {def_name}!")
        } else {
            format!("You {skill} {def_name} for {dmg} damage!")
        }
    } else if dmg == 0 {
        format!("{att_name} missed you!")
    } else {
        format!("{att_name} {skill}s you for {dmg} damage!")
    }
}

/// The status/death-check cadence: emits the combined hp snapshot every tick
/// and performs the exactly-once termination when it observes a death.
fn spawn_status(
    ctx: &Arc<Ctx>,
    eid: EncounterId,
    initiator: ActorId,
    target: ActorId,
    viewer: String,
    mut stop: watch::Receiver<bool>,
) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let period = Duration::from_millis(ctx.cfg.status_ms.max(10));
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let (status, outcome) = {
                        let mut guard = ctx.world.lock().await;
                        let w = &mut *guard;
                        let Some(enc) = w.encounters.get(&eid) else { break };
                        if enc.closed {
                            break;
                        }
                        let peek = match (w.actors.get(&initiator), w.actors.get(&target)) {
                            (Some(init), Some(tgt)) => Some((
                                init.name.clone(),
                                init.hp,
                                init.is_dead,
                                tgt.name.clone(),
                                tgt.hp,
                                tgt.is_dead,
                            )),
                            _ => None,
                        };
                        match peek {
                            Some((init_name, init_hp, init_dead, tgt_name, tgt_hp, tgt_dead)) => {
                                // The final snapshot (hp 0) still goes out
                                // before the victory notice, matching the
                                // source's tick order.
                                let ev = Event::CombatStatus {
                                    initiator_name: init_name,
                                    initiator_hp: init_hp,
                                    target_name: tgt_name,
                                    target_hp: tgt_hp,
                                };
                                let outcome = if tgt_dead {
                                    close_locked(w, eid, CloseReason::TargetDead)
                                } else if init_dead {
                                    close_locked(w, eid, CloseReason::InitiatorDead)
                                } else {
                                    None
                                };
                                (Some(ev), outcome)
                            }
                            // A participant vanished; fold the encounter.
                            None => (None, close_locked(w, eid, CloseReason::Cancelled)),
                        }
                    };

                    let tx = { ctx.sessions.lock().await.player_tx(&viewer) };
                    if let (Some(tx), Some(ev)) = (tx.as_ref(), status.as_ref()) {
                        send_event(tx, ev).await;
                    }
                    if let Some(out) = outcome {
                        release(&ctx, eid).await;
                        let text = match out.reason {
                            CloseReason::TargetDead => {
                                format!("Victory! You have defeated {}", out.target_name)
                            }
                            CloseReason::InitiatorDead => {
                                format!("You have been defeated by {}.", out.target_name)
                            }
                            CloseReason::Cancelled => String::new(),
                        };
                        if !text.is_empty() {
                            if let Some(tx) = tx {
                                send_event(&tx, &Event::Notice { text }).await;
                            }
                        }
                        info!(encounter = eid.0, reason = ?out.reason, "encounter closed");
                        break;
                    }
                }
                _ = stop.changed() => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use crate::ctx::testutil::test_ctx;
    use crate::session::{ConnId, Session};
    use crate::store::MonsterFile;
    use crate::world::tests::two_room_world;

    fn rat() -> MonsterFile {
        MonsterFile {
            name: "Rat".to_string(),
            at: "cellar".to_string(),
            hp: 20,
            max_hp: 20,
            speed_ms: 800,
            attack: 3,
            defense: 0,
            skills: vec!["bite".to_string()],
            default_skill: "bite".to_string(),
        }
    }

    async fn setup() -> (
        std::sync::Arc<Ctx>,
        tempfile::TempDir,
        ActorId,
        ActorId,
        mpsc::Receiver<Bytes>,
    ) {
        let (ctx, dir) = test_ctx(two_room_world());
        let (pid, rid) = {
            let mut w = ctx.world.lock().await;
            let pid = w.spawn_player("ava");
            w.actors.get_mut(&pid).unwrap().location = "cellar".to_string();
            let rid = w.spawn_monster(&rat()).unwrap();
            (pid, rid)
        };
        let (tx, rx) = mpsc::channel(4096);
        {
            let mut s = ctx.sessions.lock().await;
            s.bind(Session {
                conn: ConnId(1),
                username: "ava".to_string(),
                player: pid,
                write_tx: tx,
                push_stop: watch::channel(false).0,
            });
        }
        (ctx, dir, pid, rid, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(b) = rx.try_recv() {
            out.push(serde_json::from_slice::<Event>(&b).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn absent_target_creates_nothing() {
        let (ctx, _dir, pid, rid, _rx) = setup().await;
        let err = start(&ctx, pid, "Bat", None).await.unwrap_err();
        assert_eq!(err, FightError::TargetNotInRoom);

        let w = ctx.world.lock().await;
        assert!(w.encounters.is_empty());
        assert_eq!(w.actors[&pid].encounter, None);
        assert_eq!(w.actors[&rid].encounter, None);
        assert_eq!(w.actors[&rid].hp, 20);
        drop(w);
        assert!(ctx.combat.lock().await.is_empty());
    }

    #[tokio::test]
    async fn a_corpse_still_in_the_room_reads_as_dead() {
        let (ctx, _dir, pid, rid, _rx) = setup().await;
        // Simulate the window between a killing blow and the status sweep:
        // dead but not yet removed from the occupant set.
        ctx.world
            .lock()
            .await
            .actors
            .get_mut(&rid)
            .unwrap()
            .apply_damage(1_000);
        let err = start(&ctx, pid, "Rat", None).await.unwrap_err();
        assert_eq!(err, FightError::TargetDead);
        assert!(ctx.world.lock().await.encounters.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn an_engaged_monster_rejects_a_second_encounter() {
        let (ctx, _dir, pid, _rid, _rx) = setup().await;
        start(&ctx, pid, "Rat", None).await.unwrap();

        let bob = {
            let mut w = ctx.world.lock().await;
            let bob = w.spawn_player("bob");
            w.actors.get_mut(&bob).unwrap().location = "cellar".to_string();
            bob
        };
        let err = start(&ctx, bob, "Rat", None).await.unwrap_err();
        assert_eq!(err, FightError::AlreadyEngaged);
        // And the initiator cannot double-book itself either.
        let err = start(&ctx, pid, "Rat", None).await.unwrap_err();
        assert_eq!(err, FightError::AlreadyEngaged);
    }

    #[tokio::test(start_paused = true)]
    async fn fight_runs_to_exactly_one_victory() {
        let (ctx, _dir, pid, rid, mut rx) = setup().await;
        let eid = start(&ctx, pid, "Rat", None).await.unwrap();
        {
            let w = ctx.world.lock().await;
            assert_eq!(w.actors[&pid].encounter, Some(eid));
            assert_eq!(w.actors[&rid].encounter, Some(eid));
        }

        tokio::time::sleep(Duration::from_secs(30)).await;

        {
            let w = ctx.world.lock().await;
            assert!(w.actors[&rid].is_dead);
            assert_eq!(w.actors[&rid].hp, 0);
            assert!(w.rooms["cellar"].occupants.is_empty());
            assert_eq!(w.actors[&pid].encounter, None);
            assert!(w.encounters.is_empty());
        }
        assert!(ctx.combat.lock().await.is_empty());

        let events = drain(&mut rx);
        let victories = events
            .iter()
            .filter(|e| matches!(e, Event::Notice { text } if text.starts_with("Victory!")))
            .count();
        assert_eq!(victories, 1);
        let statuses = events
            .iter()
            .filter(|e| matches!(e, Event::CombatStatus { .. }))
            .count();
        assert!(statuses > 0);

        // Terminal state is absorbing: nothing more arrives.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_all_cadences_and_is_idempotent() {
        let (ctx, _dir, pid, rid, mut rx) = setup().await;
        let eid = start(&ctx, pid, "Rat", None).await.unwrap();

        // One swing at most has landed by now; the rat cannot be dead yet.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(cancel(&ctx, eid).await);
        assert!(!cancel(&ctx, eid).await);

        {
            let w = ctx.world.lock().await;
            assert!(!w.actors[&rid].is_dead);
            assert!(w.rooms["cellar"].occupants.contains(&rid));
            assert_eq!(w.actors[&pid].encounter, None);
            assert_eq!(w.actors[&rid].encounter, None);
            assert!(w.encounters.is_empty());
        }
        assert!(ctx.combat.lock().await.is_empty());

        drain(&mut rx);
        tokio::time::sleep(Duration::from_secs(5)).await;
        // No swings, no status: the cadences are gone.
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_damage_on_a_corpse_is_a_no_op() {
        let (ctx, _dir, pid, rid, _rx) = setup().await;
        start(&ctx, pid, "Rat", None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        // Dead, and pinned at zero no matter what raced in.
        let w = ctx.world.lock().await;
        assert_eq!(w.actors[&rid].hp, 0);
        assert!(w.actors[&rid].is_dead);
        assert_eq!(w.actors[&pid].encounter, None);
    }
}
