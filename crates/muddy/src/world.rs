//! The world state store: rooms, exits, occupant sets, and the actor table.
//!
//! This is the single source of truth for location data. All of it lives
//! behind one `tokio::sync::Mutex` (see `ctx.rs`); every public method here
//! assumes the caller holds that lock and none of them await.

use std::collections::{HashMap, HashSet};

use anyhow::Context;
use mudwire::{Event, MonsterView};
use tracing::warn;

use crate::actor::{Actor, ActorId, ActorKind, Rng64};
use crate::store::{MonsterFile, PlayerRec, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncounterId(pub u64);

#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub description: String,
    /// Direction token -> destination room id. Read-only after load.
    pub exits: HashMap<String, String>,
    /// Monsters present. Mutated only by spawn and death, under the world lock.
    pub occupants: HashSet<ActorId>,
}

/// One active fight. Owned by the combat coordinator; actors hold only the
/// id as a back-reference.
#[derive(Debug, Clone)]
pub struct Encounter {
    pub id: EncounterId,
    pub initiator: ActorId,
    pub target: ActorId,
    pub skill: String,
    /// Flipped exactly once, under the world lock, by whichever cadence or
    /// cancel path observes a terminal condition first.
    pub closed: bool,
}

#[derive(Debug, Clone)]
pub enum MoveError {
    NoSuchExit,
}

impl std::fmt::Display for MoveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MoveError::NoSuchExit => write!(f, "no such exit"),
        }
    }
}

impl std::error::Error for MoveError {}

pub struct World {
    pub rooms: HashMap<String, Room>,
    pub actors: HashMap<ActorId, Actor>,
    /// Username -> player actor. One entry per registered player, live or not.
    pub players: HashMap<String, ActorId>,
    pub encounters: HashMap<EncounterId, Encounter>,
    pub start_room: String,
    pub rng: Rng64,
    next_actor_id: u64,
    next_encounter_id: u64,
}

impl World {
    pub fn new(start_room: &str, seed: u64) -> Self {
        Self {
            rooms: HashMap::new(),
            actors: HashMap::new(),
            players: HashMap::new(),
            encounters: HashMap::new(),
            start_room: start_room.to_string(),
            rng: Rng64::from_seed(seed),
            next_actor_id: 1,
            next_encounter_id: 1,
        }
    }

    /// Load rooms, merge the monster roster into occupant sets, and restore
    /// the persisted player table. Runs once at startup.
    pub fn load(store: &Store, seed: u64) -> anyhow::Result<Self> {
        let rooms = store.load_rooms()?;
        anyhow::ensure!(!rooms.is_empty(), "world has no rooms");

        // Deterministic start room: an explicit "start" id wins, otherwise the
        // lexicographically first room.
        let start = if rooms.contains_key("start") {
            "start".to_string()
        } else {
            let mut ids = rooms.keys().cloned().collect::<Vec<_>>();
            ids.sort_unstable();
            ids.remove(0)
        };

        let mut w = World::new(&start, seed);
        for (id, rf) in rooms {
            w.rooms.insert(
                id.clone(),
                Room {
                    id,
                    description: rf.description,
                    exits: rf.exits,
                    occupants: HashSet::new(),
                },
            );
        }

        // Exits must resolve; a dangling exit would strand whoever takes it.
        for room in w.rooms.values() {
            for (dir, dest) in &room.exits {
                anyhow::ensure!(
                    w.rooms.contains_key(dest),
                    "room {} exit {} points at missing room {}",
                    room.id,
                    dir,
                    dest
                );
            }
        }

        for m in store.load_monsters()? {
            w.spawn_monster(&m)
                .with_context(|| format!("spawn monster {}", m.name))?;
        }

        for (username, rec) in store.load_players()? {
            w.restore_player(&username, rec);
        }

        Ok(w)
    }

    fn alloc_actor_id(&mut self) -> ActorId {
        let id = ActorId(self.next_actor_id);
        self.next_actor_id += 1;
        id
    }

    pub fn alloc_encounter_id(&mut self) -> EncounterId {
        let id = EncounterId(self.next_encounter_id);
        self.next_encounter_id += 1;
        id
    }

    /// Create a fresh player in the start room with default stats.
    pub fn spawn_player(&mut self, username: &str) -> ActorId {
        let id = self.alloc_actor_id();
        let start = self.start_room.clone();
        self.actors.insert(id, Actor::new_player(id, username, &start));
        self.players.insert(username.to_string(), id);
        id
    }

    /// Rebuild a player actor from a persisted snapshot.
    fn restore_player(&mut self, username: &str, rec: PlayerRec) {
        let id = self.alloc_actor_id();
        let location = if self.rooms.contains_key(&rec.at) {
            rec.at
        } else {
            // The world file changed under the player; fall back to start.
            warn!(player = username, room = %rec.at, "saved room is gone, moving player to start");
            self.start_room.clone()
        };
        self.actors.insert(
            id,
            Actor {
                id,
                name: rec.name,
                location,
                hp: rec.hp.clamp(0, rec.max_hp),
                max_hp: rec.max_hp,
                speed_ms: rec.speed_ms,
                attack: rec.attack,
                defense: rec.defense,
                is_dead: rec.is_dead,
                skills: rec.skills,
                default_skill: rec.default_skill,
                regen_active: false,
                encounter: None,
                kind: ActorKind::Player {
                    username: username.to_string(),
                },
            },
        );
        self.players.insert(username.to_string(), id);
    }

    /// Place a roster monster in its home room's occupant set.
    pub fn spawn_monster(&mut self, m: &MonsterFile) -> anyhow::Result<ActorId> {
        anyhow::ensure!(
            self.rooms.contains_key(&m.at),
            "home room {} does not exist",
            m.at
        );
        let id = self.alloc_actor_id();
        self.actors.insert(
            id,
            Actor {
                id,
                name: m.name.clone(),
                location: m.at.clone(),
                hp: m.hp.clamp(0, m.max_hp),
                max_hp: m.max_hp,
                speed_ms: m.speed_ms,
                attack: m.attack,
                defense: m.defense,
                is_dead: false,
                skills: if m.skills.is_empty() {
                    vec![m.default_skill.clone()]
                } else {
                    m.skills.clone()
                },
                default_skill: m.default_skill.clone(),
                regen_active: false,
                encounter: None,
                kind: ActorKind::Monster { home: m.at.clone() },
            },
        );
        self.rooms
            .get_mut(&m.at)
            .expect("home room checked above")
            .occupants
            .insert(id);
        Ok(id)
    }

    /// Move an actor through a named exit. Fails without any mutation when
    /// the direction is not an exit of its current room.
    pub fn move_actor(&mut self, id: ActorId, direction: &str) -> Result<String, MoveError> {
        let actor = self.actors.get(&id).ok_or(MoveError::NoSuchExit)?;
        let room = self
            .rooms
            .get(&actor.location)
            .ok_or(MoveError::NoSuchExit)?;
        let dest = room
            .exits
            .get(direction.trim())
            .cloned()
            .ok_or(MoveError::NoSuchExit)?;
        self.actors
            .get_mut(&id)
            .expect("actor looked up above")
            .location = dest.clone();
        Ok(dest)
    }

    /// The room an actor currently stands in.
    pub fn location_of(&self, id: ActorId) -> Option<&Room> {
        let actor = self.actors.get(&id)?;
        self.rooms.get(&actor.location)
    }

    /// Find a living monster by name in a room's occupant set.
    pub fn monster_in_room(&self, room_id: &str, name: &str) -> Option<ActorId> {
        let room = self.rooms.get(room_id)?;
        room.occupants
            .iter()
            .copied()
            .find(|id| {
                self.actors
                    .get(id)
                    .is_some_and(|a| !a.is_dead && a.name.eq_ignore_ascii_case(name))
            })
    }

    /// Remove a dead monster from its room's occupant set. The extension
    /// point for loot/respawn would hang off this transition.
    pub fn remove_occupant(&mut self, room_id: &str, id: ActorId) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.occupants.remove(&id);
        }
    }

    pub fn location_snapshot(&self, room_id: &str) -> Option<Event> {
        let room = self.rooms.get(room_id)?;
        let mut exits = room.exits.keys().cloned().collect::<Vec<_>>();
        exits.sort_unstable();
        let mut monsters = room
            .occupants
            .iter()
            .filter_map(|id| self.actors.get(id))
            .map(|a| MonsterView {
                name: a.name.clone(),
                hp: a.hp,
                max_hp: a.max_hp,
            })
            .collect::<Vec<_>>();
        monsters.sort_by(|a, b| a.name.cmp(&b.name));
        Some(Event::LocationSnapshot {
            room: room.id.clone(),
            description: room.description.clone(),
            exits,
            monsters,
        })
    }

    pub fn stats_snapshot(&self, id: ActorId) -> Option<Event> {
        let a = self.actors.get(&id)?;
        Some(Event::StatsSnapshot {
            name: a.name.clone(),
            hp: a.hp,
            max_hp: a.max_hp,
            attack: a.attack,
            defense: a.defense,
            speed_ms: a.speed_ms,
        })
    }

    /// The persisted view of every player: full actor snapshots, no session
    /// or encounter state.
    pub fn player_snapshot_table(&self) -> HashMap<String, PlayerRec> {
        let mut out = HashMap::new();
        for (username, id) in &self.players {
            let Some(a) = self.actors.get(id) else {
                continue;
            };
            out.insert(
                username.clone(),
                PlayerRec {
                    name: a.name.clone(),
                    at: a.location.clone(),
                    hp: a.hp,
                    max_hp: a.max_hp,
                    speed_ms: a.speed_ms,
                    attack: a.attack,
                    defense: a.defense,
                    is_dead: a.is_dead,
                    skills: a.skills.clone(),
                    default_skill: a.default_skill.clone(),
                },
            );
        }
        out
    }
}
