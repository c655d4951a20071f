//! Worlds, their players and the registry that holds them
//!
//! A [`World`] owns the authoritative roster of players and non-player
//! entities for one named space. Rosters live behind `RwLock`s so socket tasks
//! and the tick scheduler can touch them concurrently:
//! - Spawns and removals take the write lock for the whole operation, which
//!   keeps the capacity check and the insert atomic
//! - Ticks and broadcasts iterate a snapshot of the roster, so a removal that
//!   lands mid-tick never invalidates the iteration
//! - Every outbound message is encoded once and shared between recipients
//!
//! A poisoned lock means a thread panicked while mutating world state. That
//! surfaces as [`WorldError::Poisoned`] and stops the scheduler.

use crate::config::{IdStrategy, WorldConfig};
use log::{debug, info, warn};
use rand::Rng;
use shared::{host, Connection, ConnectionId, EntityId, Message};
use std::collections::{HashMap, HashSet};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Reason sent to players kicked for inactivity
pub const TIMED_OUT_REASON: &str = "Timed out.";

/// Random ids are drawn from this range, offset by the roster size
pub const RANDOM_ID_RANGE: std::ops::RangeInclusive<EntityId> = 111..=999;

const MAX_ID_ATTEMPTS: usize = 64;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("world {world:?} is full ({capacity} players)")]
    Full { world: String, capacity: usize },

    #[error("world {0:?} not found")]
    NotFound(String),

    #[error("world {0:?} already exists")]
    Duplicate(String),

    #[error("entity id {0} is already in use")]
    IdInUse(EntityId),

    #[error("no free entity id left in world {0:?}")]
    IdsExhausted(String),

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

fn read<'a, T>(lock: &'a RwLock<T>, what: &'static str) -> Result<RwLockReadGuard<'a, T>, WorldError> {
    lock.read().map_err(|_| WorldError::Poisoned(what))
}

fn write<'a, T>(
    lock: &'a RwLock<T>,
    what: &'static str,
) -> Result<RwLockWriteGuard<'a, T>, WorldError> {
    lock.write().map_err(|_| WorldError::Poisoned(what))
}

fn guard<'a, T>(lock: &'a Mutex<T>, what: &'static str) -> Result<MutexGuard<'a, T>, WorldError> {
    lock.lock().map_err(|_| WorldError::Poisoned(what))
}

/// Position, velocity and facing of a body, as last reported
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Kinematics {
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub rotation: f32,
}

/// A connected user's avatar inside a world
///
/// The player keeps a handle to its connection so the world can send to it
/// directly. Kinematics are written by the player's socket task and read by
/// the tick scheduler, hence the mutex.
pub struct Player {
    id: EntityId,
    name: String,
    world: String,
    connection: Arc<Connection>,
    kinematics: Mutex<Kinematics>,
}

impl Player {
    pub fn new(
        id: EntityId,
        name: impl Into<String>,
        world: impl Into<String>,
        connection: Arc<Connection>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            world: world.into(),
            connection,
            kinematics: Mutex::new(Kinematics::default()),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn world_name(&self) -> &str {
        &self.world
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    fn state(&self) -> MutexGuard<'_, Kinematics> {
        self.kinematics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kinematics(&self) -> Kinematics {
        *self.state()
    }

    pub fn place(&self, x: f32, y: f32) {
        let mut state = self.state();
        state.x = x;
        state.y = y;
    }

    pub fn set_position(&self, x: f32, y: f32, rotation: f32) {
        let mut state = self.state();
        state.x = x;
        state.y = y;
        state.rotation = rotation;
    }

    pub fn set_velocity(&self, velocity_x: f32, velocity_y: f32, rotation: f32) {
        let mut state = self.state();
        state.velocity_x = velocity_x;
        state.velocity_y = velocity_y;
        state.rotation = rotation;
    }

    pub fn create_message(&self) -> host::CreatePlayer {
        let state = self.kinematics();
        host::CreatePlayer {
            username: self.name.clone(),
            entity_id: self.id,
            x: state.x,
            y: state.y,
        }
    }

    pub fn remove_message(&self) -> host::RemovePlayer {
        host::RemovePlayer {
            entity_id: self.id,
            username: self.name.clone(),
        }
    }

    pub fn position_message(&self) -> host::PlayerPosition {
        let state = self.kinematics();
        host::PlayerPosition {
            entity_id: self.id,
            rotation: state.rotation,
            x: state.x,
            y: state.y,
        }
    }

    pub fn velocity_message(&self) -> host::PlayerVelocity {
        let state = self.kinematics();
        host::PlayerVelocity {
            entity_id: self.id,
            velocity_x: state.velocity_x,
            velocity_y: state.velocity_y,
            rotation: state.rotation,
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("world", &self.world)
            .field("connection", &self.connection.id())
            .finish()
    }
}

/// A non-player object tracked by a world
#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    kind: String,
    kinematics: Mutex<Kinematics>,
}

impl Entity {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn kinematics(&self) -> Kinematics {
        *self.kinematics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out entity ids; every id it returns stays reserved until released
#[derive(Debug)]
struct IdAllocator {
    strategy: IdStrategy,
    in_use: HashSet<EntityId>,
    next: EntityId,
    free: Vec<EntityId>,
}

impl IdAllocator {
    fn new(strategy: IdStrategy) -> Self {
        Self {
            strategy,
            in_use: HashSet::new(),
            next: 1,
            free: Vec::new(),
        }
    }

    fn allocate(&mut self, player_count: usize) -> Option<EntityId> {
        match self.strategy {
            IdStrategy::Random => {
                let base = EntityId::try_from(player_count).ok()?.checked_add(1)?;
                let mut rng = rand::thread_rng();
                for _ in 0..MAX_ID_ATTEMPTS {
                    let candidate = base.checked_add(rng.gen_range(RANDOM_ID_RANGE))?;
                    if self.in_use.insert(candidate) {
                        return Some(candidate);
                    }
                }
                // Crowded range: walk it once before giving up
                let candidate = (base + *RANDOM_ID_RANGE.start()..=base + *RANDOM_ID_RANGE.end())
                    .find(|id| !self.in_use.contains(id))?;
                self.in_use.insert(candidate);
                Some(candidate)
            }
            IdStrategy::Sequential => {
                while let Some(id) = self.free.pop() {
                    if self.in_use.insert(id) {
                        return Some(id);
                    }
                }
                while self.in_use.contains(&self.next) {
                    self.next = self.next.checked_add(1)?;
                }
                let id = self.next;
                self.next = self.next.checked_add(1)?;
                self.in_use.insert(id);
                Some(id)
            }
        }
    }

    fn release(&mut self, id: EntityId) -> bool {
        if !self.in_use.remove(&id) {
            return false;
        }
        if self.strategy == IdStrategy::Sequential {
            self.free.push(id);
        }
        true
    }
}

/// What one world tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Bytes handed to writers by the flush phase
    pub flushed_bytes: usize,
    /// Players kicked for inactivity
    pub timed_out: usize,
    /// Players whose state was broadcast
    pub broadcast: usize,
}

impl TickSummary {
    fn absorb(&mut self, other: TickSummary) {
        self.flushed_bytes += other.flushed_bytes;
        self.timed_out += other.timed_out;
        self.broadcast += other.broadcast;
    }
}

pub struct World {
    name: String,
    spawn: (f32, f32),
    capacity: usize,
    timeout: Duration,
    players: RwLock<HashMap<EntityId, Arc<Player>>>,
    entities: RwLock<HashMap<EntityId, Arc<Entity>>>,
    ids: Mutex<IdAllocator>,
}

impl World {
    pub fn new(config: &WorldConfig) -> Self {
        Self {
            name: config.name.clone(),
            spawn: (config.spawn_x, config.spawn_y),
            capacity: config.capacity,
            timeout: config.timeout(),
            players: RwLock::new(HashMap::new()),
            entities: RwLock::new(HashMap::new()),
            ids: Mutex::new(IdAllocator::new(config.id_strategy)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spawn_point(&self) -> (f32, f32) {
        self.spawn
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn player_count(&self) -> Result<usize, WorldError> {
        Ok(read(&self.players, "player roster")?.len())
    }

    pub fn is_full(&self) -> Result<bool, WorldError> {
        Ok(self.player_count()? >= self.capacity)
    }

    pub fn player(&self, id: EntityId) -> Result<Option<Arc<Player>>, WorldError> {
        Ok(read(&self.players, "player roster")?.get(&id).cloned())
    }

    pub fn contains_player(&self, id: EntityId) -> Result<bool, WorldError> {
        Ok(read(&self.players, "player roster")?.contains_key(&id))
    }

    /// Copy of the roster, safe to iterate while others mutate the world
    pub fn players(&self) -> Result<Vec<Arc<Player>>, WorldError> {
        Ok(read(&self.players, "player roster")?.values().cloned().collect())
    }

    /// Reserves a fresh id for a player or entity
    ///
    /// The id stays reserved until the player is removed or the id is released
    /// with [`release_entity_id`](Self::release_entity_id), so two joiners that
    /// have not spawned yet never share one.
    pub fn assign_entity_id(&self) -> Result<EntityId, WorldError> {
        let player_count = self.player_count()?;
        guard(&self.ids, "entity id allocator")?
            .allocate(player_count)
            .ok_or_else(|| WorldError::IdsExhausted(self.name.clone()))
    }

    pub fn release_entity_id(&self, id: EntityId) -> Result<bool, WorldError> {
        Ok(guard(&self.ids, "entity id allocator")?.release(id))
    }

    /// Adds `player` to the roster at `(x, y)`
    ///
    /// In order: the newcomer receives a `CreatePlayer` for every player
    /// already present, every existing player receives the newcomer's
    /// `CreatePlayer`, the newcomer is inserted, and finally the newcomer gets
    /// its own position. All of it is sent immediately.
    pub fn spawn_player_in_world(&self, player: Arc<Player>, x: f32, y: f32) -> Result<(), WorldError> {
        let mut players = write(&self.players, "player roster")?;

        if players.len() >= self.capacity {
            return Err(WorldError::Full {
                world: self.name.clone(),
                capacity: self.capacity,
            });
        }
        if players.contains_key(&player.id()) {
            return Err(WorldError::IdInUse(player.id()));
        }

        player.place(x, y);
        let newcomer = player.connection();

        for existing in players.values() {
            newcomer.send_immediately(&existing.create_message());
        }

        let announcement = player.create_message().to_frame();
        for existing in players.values() {
            existing.connection().send_frame(announcement.clone());
        }

        players.insert(player.id(), Arc::clone(&player));
        newcomer.send_immediately(&player.position_message());

        info!(
            "Player {} ({}) spawned in {} at ({:.1}, {:.1}), {}/{} players",
            player.name(),
            player.id(),
            self.name,
            x,
            y,
            players.len(),
            self.capacity
        );
        Ok(())
    }

    /// Removes `player` and tells everyone else; returns false if it was not present
    ///
    /// Only the exact player instance is removed, so a stale handle cannot evict
    /// a newer player that was given the same id.
    pub fn remove_player_in_world(&self, player: &Player) -> Result<bool, WorldError> {
        let removed = {
            let mut players = write(&self.players, "player roster")?;
            match players.get(&player.id()) {
                Some(current) if current.connection().id() == player.connection().id() => {
                    players.remove(&player.id())
                }
                _ => None,
            }
        };

        let Some(removed) = removed else {
            debug!("Player {} already gone from {}", player.id(), self.name);
            return Ok(false);
        };

        self.release_entity_id(removed.id())?;
        self.broadcast_immediately(None, &removed.remove_message())?;
        info!("Player {} ({}) left {}", removed.name(), removed.id(), self.name);
        Ok(true)
    }

    /// Drops whatever `connection` holds under `entity_id`: a spawned player, or
    /// an id reserved for a join that never finished loading
    pub fn evict(&self, entity_id: EntityId, connection: ConnectionId) -> Result<bool, WorldError> {
        match self.player(entity_id)? {
            Some(player) if player.connection().id() == connection => {
                self.remove_player_in_world(&player)
            }
            _ => self.release_entity_id(entity_id),
        }
    }

    /// Sends `message` now to every player except `exclude`; returns the recipient count
    pub fn broadcast_immediately<M: Message>(
        &self,
        exclude: Option<EntityId>,
        message: &M,
    ) -> Result<usize, WorldError> {
        let frame = message.to_frame();
        let mut sent = 0;
        for player in self.players()? {
            if Some(player.id()) != exclude && player.connection().send_frame(frame.clone()) {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Queues `message` on every player except `exclude` for the next flush
    pub fn broadcast_queued<M: Message>(
        &self,
        exclude: Option<EntityId>,
        message: &M,
    ) -> Result<usize, WorldError> {
        let frame = message.to_frame();
        let mut queued = 0;
        for player in self.players()? {
            if Some(player.id()) != exclude && !player.connection().is_closed() {
                player.connection().queue_frame(&frame);
                queued += 1;
            }
        }
        Ok(queued)
    }

    pub fn is_timed_out(&self, player: &Player, now: Instant) -> bool {
        now.saturating_duration_since(player.connection().last_message_received_at()) >= self.timeout
    }

    /// One world tick
    ///
    /// For each player in a roster snapshot: flush the batch queued during the
    /// previous tick, then either drop the player (inactive, or its connection
    /// already closed) or queue its position and velocity for everyone else.
    /// What gets queued here goes out on the next tick's flush.
    pub fn tick(&self, now: Instant) -> Result<TickSummary, WorldError> {
        let mut summary = TickSummary::default();

        for player in self.players()? {
            let connection = player.connection();
            summary.flushed_bytes += connection.flush();

            let closed = connection.is_closed();
            if closed || self.is_timed_out(&player, now) {
                if !closed {
                    warn!(
                        "Player {} ({}) timed out in {}",
                        player.name(),
                        player.id(),
                        self.name
                    );
                    connection.disconnect_with(&host::Disconnect::new(TIMED_OUT_REASON));
                    summary.timed_out += 1;
                }
                connection.unbind();
                self.remove_player_in_world(&player)?;
                continue;
            }

            self.broadcast_queued(Some(player.id()), &player.position_message())?;
            self.broadcast_queued(Some(player.id()), &player.velocity_message())?;
            summary.broadcast += 1;
        }

        Ok(summary)
    }

    pub fn add_entity(&self, kind: impl Into<String>, x: f32, y: f32) -> Result<EntityId, WorldError> {
        let id = self.assign_entity_id()?;
        let entity = Entity {
            id,
            kind: kind.into(),
            kinematics: Mutex::new(Kinematics {
                x,
                y,
                ..Kinematics::default()
            }),
        };
        write(&self.entities, "entity table")?.insert(id, Arc::new(entity));
        debug!("Entity {} added to {}", id, self.name);
        Ok(id)
    }

    pub fn remove_entity(&self, id: EntityId) -> Result<bool, WorldError> {
        let removed = write(&self.entities, "entity table")?.remove(&id).is_some();
        if removed {
            self.release_entity_id(id)?;
        }
        Ok(removed)
    }

    pub fn entity(&self, id: EntityId) -> Result<Option<Arc<Entity>>, WorldError> {
        Ok(read(&self.entities, "entity table")?.get(&id).cloned())
    }

    pub fn entity_count(&self) -> Result<usize, WorldError> {
        Ok(read(&self.entities, "entity table")?.len())
    }
}

/// Every world the server hosts, by name
#[derive(Default)]
pub struct WorldRegistry {
    worlds: RwLock<HashMap<String, Arc<World>>>,
}

impl WorldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[WorldConfig]) -> Result<Self, WorldError> {
        let registry = Self::new();
        for config in configs {
            registry.add_world(World::new(config))?;
        }
        Ok(registry)
    }

    pub fn add_world(&self, world: World) -> Result<Arc<World>, WorldError> {
        let mut worlds = write(&self.worlds, "world registry")?;
        if worlds.contains_key(world.name()) {
            return Err(WorldError::Duplicate(world.name().to_string()));
        }
        info!(
            "World {} ready: spawn {:?}, capacity {}, timeout {:?}",
            world.name(),
            world.spawn_point(),
            world.capacity(),
            world.timeout()
        );
        let world = Arc::new(world);
        worlds.insert(world.name().to_string(), Arc::clone(&world));
        Ok(world)
    }

    pub fn get(&self, name: &str) -> Result<Arc<World>, WorldError> {
        read(&self.worlds, "world registry")?
            .get(name)
            .cloned()
            .ok_or_else(|| WorldError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> Result<Vec<String>, WorldError> {
        let mut names: Vec<String> = read(&self.worlds, "world registry")?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn len(&self) -> usize {
        self.worlds.read().map(|worlds| worlds.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ticks every world in turn
    pub fn tick_all(&self, now: Instant) -> Result<TickSummary, WorldError> {
        let worlds: Vec<Arc<World>> = read(&self.worlds, "world registry")?.values().cloned().collect();
        let mut summary = TickSummary::default();
        for world in worlds {
            summary.absorb(world.tick(now)?);
        }
        Ok(summary)
    }
}
