//! Passive regeneration: one cadence task per actor, supervised so a second
//! `ensure_regen` for the same actor never doubles the healing rate.
//!
//! The task heals only while the actor wants regeneration, is alive, and is
//! not engaged; engagement pauses healing without tearing the task down, and
//! death ends it for good. Dropping `regen_active` is the idempotent
//! "ensure not regenerating" switch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::actor::ActorId;
use crate::ctx::Ctx;

#[derive(Debug, Default)]
pub struct RegenRegistry {
    running: HashSet<ActorId>,
}

impl RegenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, id: ActorId) -> bool {
        self.running.contains(&id)
    }

    fn mark(&mut self, id: ActorId) -> bool {
        self.running.insert(id)
    }

    fn clear(&mut self, id: ActorId) {
        self.running.remove(&id);
    }
}

/// Idempotent "ensure this actor is regenerating": spawns the cadence task
/// unless one is already running. Callers flip `regen_active` on the actor
/// themselves (under the world lock) before calling this.
pub async fn ensure_regen(ctx: &Arc<Ctx>, actor: ActorId) {
    {
        let mut reg = ctx.regen.lock().await;
        if !reg.mark(actor) {
            return;
        }
    }

    let ctx = ctx.clone();
    tokio::spawn(async move {
        let period = Duration::from_millis(ctx.cfg.regen_ms.max(10));
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tick.tick().await;
            let done = {
                let mut w = ctx.world.lock().await;
                match w.actors.get_mut(&actor) {
                    None => true,
                    Some(a) if a.is_dead || !a.regen_active => true,
                    Some(a) if a.encounter.is_some() => false, // paused while fighting
                    Some(a) => {
                        a.heal(ctx.cfg.regen_hp);
                        false
                    }
                }
            };
            if done {
                break;
            }
        }
        ctx.regen.lock().await.clear(actor);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::testutil::test_ctx;
    use crate::world::tests::two_room_world;
    use crate::world::EncounterId;

    #[tokio::test(start_paused = true)]
    async fn heals_to_max_and_no_further() {
        let (ctx, _dir) = test_ctx(two_room_world());
        let pid = {
            let mut w = ctx.world.lock().await;
            let pid = w.spawn_player("ava");
            let a = w.actors.get_mut(&pid).unwrap();
            a.hp = 40;
            a.regen_active = true;
            pid
        };
        ensure_regen(&ctx, pid).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        let w = ctx.world.lock().await;
        assert_eq!(w.actors[&pid].hp, w.actors[&pid].max_hp);
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_is_idempotent() {
        let (ctx, _dir) = test_ctx(two_room_world());
        let pid = {
            let mut w = ctx.world.lock().await;
            let pid = w.spawn_player("ava");
            let a = w.actors.get_mut(&pid).unwrap();
            a.hp = 40;
            a.regen_active = true;
            pid
        };
        ensure_regen(&ctx, pid).await;
        ensure_regen(&ctx, pid).await;
        ensure_regen(&ctx, pid).await;

        // One tick's worth of healing, not three.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let w = ctx.world.lock().await;
        assert_eq!(w.actors[&pid].hp, 41);
    }

    #[tokio::test(start_paused = true)]
    async fn engagement_pauses_healing() {
        let (ctx, _dir) = test_ctx(two_room_world());
        let pid = {
            let mut w = ctx.world.lock().await;
            let pid = w.spawn_player("ava");
            let a = w.actors.get_mut(&pid).unwrap();
            a.hp = 40;
            a.regen_active = true;
            a.encounter = Some(EncounterId(1));
            pid
        };
        ensure_regen(&ctx, pid).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        {
            let w = ctx.world.lock().await;
            assert_eq!(w.actors[&pid].hp, 40);
        }

        // Clearing the back-reference resumes healing on the same task.
        ctx.world
            .lock()
            .await
            .actors
            .get_mut(&pid)
            .unwrap()
            .encounter = None;
        tokio::time::sleep(Duration::from_secs(3)).await;
        let w = ctx.world.lock().await;
        assert!(w.actors[&pid].hp > 40);
    }

    #[tokio::test(start_paused = true)]
    async fn death_ends_the_cadence_permanently() {
        let (ctx, _dir) = test_ctx(two_room_world());
        let pid = {
            let mut w = ctx.world.lock().await;
            let pid = w.spawn_player("ava");
            let a = w.actors.get_mut(&pid).unwrap();
            a.regen_active = true;
            pid
        };
        ensure_regen(&ctx, pid).await;

        ctx.world
            .lock()
            .await
            .actors
            .get_mut(&pid)
            .unwrap()
            .apply_damage(1_000);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!ctx.regen.lock().await.is_running(pid));
        let w = ctx.world.lock().await;
        assert_eq!(w.actors[&pid].hp, 0);
        assert!(w.actors[&pid].is_dead);
    }
}
