use crate::body::{Body, BodyFactory, BodySize, Renderer};
use crate::reconciliation::{Correction, ReconcileConfig, Reconciler};
use log::{debug, info};
use shared::{host, peer, EntityId};
use std::collections::HashMap;

/// Another player's body, steered toward what the server reports
pub struct RemoteEntity<B> {
    pub entity_id: EntityId,
    pub username: String,
    pub body: B,
    reconciler: Reconciler,
}

impl<B: Body> RemoteEntity<B> {
    pub fn is_interpolating(&self) -> bool {
        self.reconciler.is_interpolating()
    }
}

/// Everything the client simulates: its own body plus one per remote player
pub struct ClientGameState<F: BodyFactory> {
    factory: F,
    config: ReconcileConfig,
    local_id: Option<EntityId>,
    local: Option<F::Body>,
    remotes: HashMap<EntityId, RemoteEntity<F::Body>>,
}

impl<F: BodyFactory> ClientGameState<F> {
    pub fn new(factory: F, config: ReconcileConfig) -> Self {
        Self {
            factory,
            config,
            local_id: None,
            local: None,
            remotes: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> Option<EntityId> {
        self.local_id
    }

    /// Marks `entity_id` as this client's own player
    pub fn set_local_player(&mut self, entity_id: EntityId) {
        self.local_id = Some(entity_id);
    }

    pub fn local_body(&self) -> Option<&F::Body> {
        self.local.as_ref()
    }

    pub fn local_body_mut(&mut self) -> Option<&mut F::Body> {
        self.local.as_mut()
    }

    pub fn remote(&self, entity_id: EntityId) -> Option<&RemoteEntity<F::Body>> {
        self.remotes.get(&entity_id)
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn spawn_remote(&mut self, message: host::CreatePlayer) {
        if Some(message.entity_id) == self.local_id {
            debug!("Ignoring CreatePlayer for our own entity {}", message.entity_id);
            return;
        }
        info!(
            "Player {} ({}) appeared at ({:.1}, {:.1})",
            message.username, message.entity_id, message.x, message.y
        );
        let body = self
            .factory
            .create_body(message.x, message.y, BodySize::default());
        self.remotes.insert(
            message.entity_id,
            RemoteEntity {
                entity_id: message.entity_id,
                username: message.username,
                body,
                reconciler: Reconciler::new(self.config),
            },
        );
    }

    pub fn remove_remote(&mut self, entity_id: EntityId) -> bool {
        match self.remotes.remove(&entity_id) {
            Some(remote) => {
                info!("Player {} ({}) left", remote.username, entity_id);
                true
            }
            None => false,
        }
    }

    /// Applies an authoritative position
    ///
    /// Our own entity is moved outright (spawn placement or a server
    /// correction); remote entities go through reconciliation.
    pub fn apply_position(&mut self, message: host::PlayerPosition) -> Option<Correction> {
        if Some(message.entity_id) == self.local_id {
            match self.local.as_mut() {
                Some(body) => body.teleport(message.x, message.y),
                None => {
                    let body = self
                        .factory
                        .create_body(message.x, message.y, BodySize::default());
                    self.local = Some(body);
                }
            }
            if let Some(body) = self.local.as_mut() {
                body.set_rotation(message.rotation);
            }
            return Some(Correction::Snapped);
        }

        let remote = self.remotes.get_mut(&message.entity_id)?;
        Some(
            remote
                .reconciler
                .on_position(&mut remote.body, message.x, message.y, message.rotation),
        )
    }

    pub fn apply_velocity(&mut self, message: host::PlayerVelocity) -> bool {
        if Some(message.entity_id) == self.local_id {
            return false;
        }
        match self.remotes.get_mut(&message.entity_id) {
            Some(remote) => {
                remote.reconciler.on_velocity(
                    &mut remote.body,
                    message.velocity_x,
                    message.velocity_y,
                    message.rotation,
                );
                true
            }
            None => false,
        }
    }

    pub fn apply_force(&mut self, message: host::ApplyBodyForce) -> bool {
        let force = (message.force_x, message.force_y);
        let point = (message.point_x, message.point_y);

        if Some(message.entity_id) == self.local_id {
            if let Some(body) = self.local.as_mut() {
                body.apply_force(force, point);
                return true;
            }
            return false;
        }
        match self.remotes.get_mut(&message.entity_id) {
            Some(remote) => {
                remote.body.apply_force(force, point);
                true
            }
            None => false,
        }
    }

    /// Reconciles every remote body, then steps every body by `dt`
    pub fn update(&mut self, dt: f32) {
        for remote in self.remotes.values_mut() {
            remote.reconciler.update(&mut remote.body);
            remote.body.step(dt);
        }
        if let Some(body) = self.local.as_mut() {
            body.step(dt);
        }
    }

    pub fn render<R: Renderer>(&self, renderer: &mut R) {
        for remote in self.remotes.values() {
            let (x, y) = remote.body.position();
            renderer.render(x, y, remote.body.rotation());
        }
        if let Some(body) = self.local.as_ref() {
            let (x, y) = body.position();
            renderer.render(x, y, body.rotation());
        }
    }

    /// Our body's state as the two messages sent to the server every update
    pub fn local_state(&self) -> Option<(peer::PlayerPosition, peer::PlayerVelocity)> {
        let body = self.local.as_ref()?;
        let (x, y) = body.position();
        let (velocity_x, velocity_y) = body.velocity();
        let rotation = body.rotation();
        Some((
            peer::PlayerPosition { rotation, x, y },
            peer::PlayerVelocity {
                velocity_x,
                velocity_y,
                rotation,
            },
        ))
    }

    /// Forgets every entity, e.g. after leaving a world
    pub fn clear(&mut self) {
        self.local_id = None;
        self.local = None;
        self.remotes.clear();
    }
}
