//! Authoritative Simulation Tick
//!
//! [`Simulation`] is the physics collaborator: movement, firing, bullet
//! travel and hits. [`MatchRunner`] wraps it with everything the host owns
//! around a tick: timers for powerup spawn, expiry, despawn and respawn,
//! powerup pickup, and the powerup event bus.

use tracing::{debug, info};

use crate::core::timer::{TimerHandle, TimerQueue};
use crate::core::vec2::Vec2;
use crate::game::collision::{bounce_off_edges, bullet_hits_tank, check_pickups, Pickup};
use crate::game::events::{PowerupBus, PowerupEvent};
use crate::game::input::Action;
use crate::game::powerup::{FireStrategy, PowerupKind, WallStrategy};
use crate::game::spawner::maybe_spawn_powerup;
use crate::game::state::{
    ActivePowerup, BulletState, GameSettings, MatchPhase, MatchState, PeerId, TankId, TankState,
    BULLET_RADIUS, LASER_RADIUS, POWERUP_LIFETIME_MS, RESPAWN_DELAY_MS,
};

/// Spread between triple-shot barrels, radians.
const TRIPLE_SPREAD: f32 = 0.2;

/// Laser speed relative to a regular bullet.
const LASER_SPEED_FACTOR: f32 = 2.0;

/// A bullet hitting a tank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    /// Destroyed tank
    pub victim: TankId,
    /// Tank that fired
    pub shooter: TankId,
}

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Tanks destroyed this tick
    pub hits: Vec<Hit>,
    /// Tanks touching board powerups
    pub pickups: Vec<Pickup>,
    /// Tanks that pressed special while holding a powerup
    pub dropped: Vec<TankId>,
    /// Board powerups placed this tick
    pub spawned: Vec<u32>,
}

/// Scheduled host-side work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Generator interval
    SpawnPowerup,
    /// Held powerup ran out
    ExpirePowerup { tank: TankId, powerup_id: u32 },
    /// Board powerup lifetime over
    DespawnPowerup { powerup_id: u32 },
    /// Respawn countdown over
    Respawn { tank: TankId },
}

// =============================================================================
// SIMULATION
// =============================================================================

/// Advances canonical state by one tick.
pub trait Simulation {
    /// Run one tick against the tanks' current input.
    fn advance(&mut self, state: &mut MatchState) -> TickResult;
}

/// Default arena physics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArenaSimulation;

impl Simulation for ArenaSimulation {
    fn advance(&mut self, state: &mut MatchState) -> TickResult {
        let mut result = TickResult::default();
        if !matches!(state.phase, MatchPhase::Playing) {
            return result;
        }

        // 0. Advance tick counter
        state.tick += 1;
        let arena = state.arena_size();
        let settings = state.settings.clone();
        let tick = state.tick;

        // 1. Movement, firing and specials
        for tank in state.tanks.values_mut().filter(|t| t.alive) {
            move_tank(tank, arena, settings.move_speed, settings.rotation_speed);

            let fire = tank.input.is_set(Action::Fire);
            if fire && !tank.fire_latched {
                fire_bullets(tank, &settings, tick);
            }
            tank.fire_latched = fire;

            let special = tank.input.is_set(Action::Special);
            if special && !tank.special_latched && tank.active_powerup.is_some() {
                result.dropped.push(tank.id.clone());
            }
            tank.special_latched = special;
        }

        // 2. Bullet travel and bounce expiry
        for tank in state.tanks.values_mut() {
            tank.bullets.retain_mut(|bullet| {
                let (position, velocity, bounced) = bounce_off_edges(bullet.position + bullet.velocity, bullet.velocity, arena);
                bullet.position = position;
                bullet.velocity = velocity;
                if bounced {
                    bullet.bounces = bullet.bounces.saturating_add(1);
                }
                bullet.bounces <= bullet.max_bounces
            });
        }

        // 3. Hits
        result.hits = resolve_hits(state);

        // 4. Pickups
        result.pickups = check_pickups(state);

        result
    }
}

/// Apply drive and turn through the tank's movement and wall strategies.
fn move_tank(tank: &mut TankState, arena: Vec2, move_speed: f32, rotation_speed: f32) {
    let factor = tank.strategies.movement().speed_factor();
    if factor == 0.0 {
        return;
    }

    tank.rotation = (tank.rotation + tank.input.turn() * rotation_speed * factor)
        .rem_euclid(std::f32::consts::TAU);

    let step = tank.facing() * (tank.input.drive() * move_speed * factor);
    let next = tank.position + step;
    tank.position = match tank.strategies.wall() {
        WallStrategy::Solid => next.clamp_to(arena),
        WallStrategy::PassThrough => next.wrap_to(arena),
    };
}

/// Fire through the tank's fire strategy, bounded by the bullet limit.
fn fire_bullets(tank: &mut TankState, settings: &GameSettings, tick: u64) {
    let free = (settings.bullet_limit as usize).saturating_sub(tank.bullets.len());
    if free == 0 {
        return;
    }

    let (angles, speed, radius, max_bounces): (&[f32], f32, f32, u8) = match tank.strategies.fire() {
        FireStrategy::Single => (&[0.0], settings.bullet_speed, BULLET_RADIUS, settings.bounce_limit),
        FireStrategy::Triple => (
            &[-TRIPLE_SPREAD, 0.0, TRIPLE_SPREAD],
            settings.bullet_speed,
            BULLET_RADIUS,
            settings.bounce_limit,
        ),
        FireStrategy::Laser => (&[0.0], settings.bullet_speed * LASER_SPEED_FACTOR, LASER_RADIUS, 0),
    };

    let muzzle = tank.position + tank.facing() * (tank.radius() + radius + 1.0);
    for offset in angles.iter().take(free) {
        tank.bullets.push(BulletState {
            position: muzzle,
            velocity: Vec2::from_rotation(tank.rotation + offset) * speed,
            colour: tank.colour.clone(),
            radius,
            bounces: 0,
            max_bounces,
            created_tick: tick,
        });
    }
}

/// Remove bullets that hit a tank, destroy the tank and credit the shooter.
fn resolve_hits(state: &mut MatchState) -> Vec<Hit> {
    let friendly_fire = state.settings.friendly_fire;
    let targets: Vec<(TankId, PeerId, Vec2, u16, u16)> = state
        .tanks
        .values()
        .filter(|t| t.alive)
        .map(|t| (t.id.clone(), t.owner.clone(), t.position, t.width, t.height))
        .collect();

    let mut hits: Vec<Hit> = Vec::new();
    for shooter in state.tanks.values_mut() {
        let shooter_id = shooter.id.clone();
        let shooter_owner = shooter.owner.clone();
        shooter.bullets.retain(|bullet| {
            let hit = targets.iter().find(|(id, owner, position, width, height)| {
                // A fresh bullet leaving the barrel cannot hit its own tank
                if *id == shooter_id && bullet.bounces == 0 {
                    return false;
                }
                if !friendly_fire && *owner == shooter_owner {
                    return false;
                }
                if hits.iter().any(|h| &h.victim == id) {
                    return false;
                }
                bullet_hits_tank(bullet.position, bullet.radius, *position, *width, *height)
            });
            match hit {
                Some((victim, ..)) => {
                    hits.push(Hit { victim: victim.clone(), shooter: shooter_id.clone() });
                    false
                }
                None => true,
            }
        });
    }

    for hit in &hits {
        if let Some(victim) = state.tanks.get_mut(&hit.victim) {
            victim.alive = false;
            victim.input = Default::default();
        }
        if hit.shooter != hit.victim {
            if let Some(shooter) = state.tanks.get_mut(&hit.shooter) {
                shooter.score += 1;
            }
        }
    }
    hits
}

// =============================================================================
// MATCH RUNNER
// =============================================================================

/// Canonical state plus the host-owned timers and powerup bus.
#[derive(Debug)]
pub struct MatchRunner<S: Simulation = ArenaSimulation> {
    /// Canonical state
    pub state: MatchState,
    /// Pending timers
    pub timers: TimerQueue<TimerEvent>,
    /// Powerup event queues
    pub bus: PowerupBus,
    simulation: S,
    spawn_timer: Option<TimerHandle>,
}

impl MatchRunner<ArenaSimulation> {
    /// Runner with the default arena physics.
    pub fn new(state: MatchState) -> Self {
        Self::with_simulation(state, ArenaSimulation)
    }
}

impl<S: Simulation> MatchRunner<S> {
    /// Runner with a custom simulation.
    pub fn with_simulation(state: MatchState, simulation: S) -> Self {
        Self {
            state,
            timers: TimerQueue::new(),
            bus: PowerupBus::new(),
            simulation,
            spawn_timer: None,
        }
    }

    /// Enter play and arm the powerup generator.
    pub fn start(&mut self, now_ms: u64) {
        self.state.phase = MatchPhase::Playing;
        if let Some(handle) = self.spawn_timer.take() {
            self.timers.cancel(handle);
        }
        let interval = self.state.settings.powerup_interval_ms as u64;
        self.spawn_timer = Some(self.timers.schedule_interval(now_ms, interval, TimerEvent::SpawnPowerup));
        info!(tanks = self.state.tanks.len(), "Match started");
    }

    /// Run due timers, advance the simulation and resolve its outcome.
    pub fn step(&mut self, now_ms: u64) -> TickResult {
        let mut spawned = Vec::new();
        while let Some((_, event)) = self.timers.pop_due(now_ms) {
            if let Some(id) = self.handle_timer(event, now_ms) {
                spawned.push(id);
            }
        }

        let mut result = self.simulation.advance(&mut self.state);
        result.spawned = spawned;

        for hit in &result.hits {
            debug!(victim = %hit.victim, shooter = %hit.shooter, "Tank destroyed");
            self.release_powerup(&hit.victim);
            self.timers.schedule(now_ms, RESPAWN_DELAY_MS, TimerEvent::Respawn { tank: hit.victim.clone() });
        }
        for tank in &result.dropped {
            self.release_powerup(tank);
        }
        for pickup in &result.pickups {
            self.pick_up(&pickup.tank, pickup.powerup_id, now_ms);
        }
        result
    }

    fn handle_timer(&mut self, event: TimerEvent, now_ms: u64) -> Option<u32> {
        match event {
            TimerEvent::SpawnPowerup => {
                let id = maybe_spawn_powerup(&mut self.state)?;
                let handle = self.timers.schedule(now_ms, POWERUP_LIFETIME_MS, TimerEvent::DespawnPowerup { powerup_id: id });
                if let Some(powerup) = self.state.powerups.get_mut(&id) {
                    powerup.despawn = Some(handle);
                }
                debug!(powerup_id = id, "Powerup spawned");
                Some(id)
            }
            TimerEvent::ExpirePowerup { tank, powerup_id } => {
                let current = self
                    .state
                    .tank(&tank)
                    .and_then(|t| t.active_powerup.as_ref())
                    .map(|p| p.powerup_id);
                if current == Some(powerup_id) {
                    self.release_powerup(&tank);
                }
                None
            }
            TimerEvent::DespawnPowerup { powerup_id } => {
                self.state.powerups.remove(&powerup_id);
                None
            }
            TimerEvent::Respawn { tank } => {
                self.state.respawn_tank(&tank);
                None
            }
        }
    }

    /// Claim a board powerup for `tank` and activate it.
    ///
    /// Returns false when the powerup was already claimed or gone.
    pub fn pick_up(&mut self, tank: &TankId, powerup_id: u32, now_ms: u64) -> bool {
        if self.state.tank(tank).map_or(true, |t| !t.alive) {
            return false;
        }
        let Some(powerup) = self.state.claim_powerup(powerup_id) else {
            return false;
        };
        if let Some(handle) = powerup.despawn {
            self.timers.cancel(handle);
        }
        self.activate_powerup(tank, powerup_id, powerup.kind, now_ms);
        true
    }

    /// Give `tank` a powerup effect, replacing what it holds.
    pub fn activate_powerup(&mut self, tank: &TankId, powerup_id: u32, kind: PowerupKind, now_ms: u64) {
        if let Some(replaced) = self.state.grant_powerup(tank, powerup_id, kind) {
            self.finish_release(tank, replaced);
        }

        let duration = self.state.settings.powerup_duration_ms as u64;
        let handle = self.timers.schedule(
            now_ms,
            duration,
            TimerEvent::ExpirePowerup { tank: tank.clone(), powerup_id },
        );
        match self.state.tank_mut(tank).and_then(|t| t.active_powerup.as_mut()) {
            Some(active) => active.expiry = Some(handle),
            None => {
                self.timers.cancel(handle);
                return;
            }
        }

        info!(tank = %tank, kind = kind.name(), powerup_id, "Powerup activated");
        self.bus.publish(PowerupEvent::activate(kind, tank.clone(), powerup_id));
    }

    /// Undo whatever `tank` holds.
    pub fn release_powerup(&mut self, tank: &TankId) -> bool {
        match self.state.release_powerup(tank) {
            Some(released) => {
                self.finish_release(tank, released);
                true
            }
            None => false,
        }
    }

    fn finish_release(&mut self, tank: &TankId, released: ActivePowerup) {
        if let Some(handle) = released.expiry {
            self.timers.cancel(handle);
        }
        info!(tank = %tank, kind = released.kind.name(), powerup_id = released.powerup_id, "Powerup deactivated");
        self.bus.publish(PowerupEvent::deactivate(released.kind, tank.clone(), released.powerup_id));
    }

    /// Remove a tank, undoing and announcing anything it held.
    pub fn remove_tank(&mut self, tank: &TankId) -> bool {
        match self.state.remove_tank(tank) {
            Some((_, released)) => {
                if let Some(released) = released {
                    self.finish_release(tank, released);
                }
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
