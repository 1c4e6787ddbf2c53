//! Core simulation types for the Slipstream rival-driver AI.
//!
//! The crate models the opponent car of a vertical-scrolling racer as a
//! fixed-timestep simulation: a periodic decision engine picks a target lane,
//! while a per-tick motion integrator steers, clamps, and advances the car.
//! Rendering, audio, and map loading live outside this crate; the embedding
//! layer feeds in per-tick hazard and target snapshots and reads back
//! positions, lifecycle states, and a discrete visual state.

use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::collections::VecDeque;
use thiserror::Error;

new_key_type! {
    /// Stable handle for rival agents backed by a generational slot map.
    pub struct AgentId;
}

/// Number of lane centerlines on every track.
pub const LANE_COUNT: usize = 4;

/// Scale constant converting per-tick speed into world units per second.
pub const SPEED_SCALE: f32 = 60.0;

/// Half width of a vehicle's collision box in world units.
pub const VEHICLE_HALF_WIDTH: f32 = 33.0;
/// Half height of a vehicle's collision box in world units.
pub const VEHICLE_HALF_HEIGHT: f32 = 60.0;

/// Number of blast stages an exploding agent walks through.
pub const EXPLOSION_STAGES: u8 = 4;

const EXPLOSION_STAGE_TICKS: u8 = 10;

const REACTION_JITTER_MIN: f32 = 0.8;
const REACTION_JITTER_MAX: f32 = 1.2;

const LANE_TOLERANCE: f32 = 50.0;
const TARGET_BUFFER_FORWARD: f32 = 100.0;
const TARGET_BUFFER_LATERAL: f32 = 80.0;
const SAFE_LANE_TARGET_LATERAL: f32 = 80.0;
const SAFE_LANE_TARGET_FORWARD: f32 = 200.0;
const FOLLOW_OFFSET: f32 = 60.0;

const STUCK_LATERAL: f32 = 50.0;
const STUCK_AHEAD_MAX: f32 = 300.0;
const STUCK_TRIGGER_SECS: f32 = 2.0;

const BUFFER_LATERAL: f32 = 70.0;
const BUFFER_FORWARD: f32 = 100.0;
const BUFFER_NUDGE: f32 = 1.0;
const BUFFER_TARGET_MARGIN: f32 = 20.0;
const BUFFER_TARGET_EXTENT: f32 = 50.0;

const LATERAL_SPEED: f32 = 3.0;
const LANE_EPSILON: f32 = 2.0;

const SPEED_STEP: f32 = 0.1;
const RAMP_BOOST: f32 = 2.0;
const PUDDLE_FACTOR: f32 = 0.6;
const BRAKE_FACTOR: f32 = 0.5;

const SPAWN_GRACE_SECS: f32 = 10.0;
const WALL_FATAL_SECS: f32 = 5.0;

const COLLISION_COOLDOWN_SECS: f32 = 1.0;
const BUMP_SELF_FACTOR: f32 = 0.8;
const BUMP_TARGET_DRAG: f32 = 0.9;

const HAZARD_HALF_EXTENT: f32 = 50.0;

const SPEED_BAND_MID: f32 = 3.0;
const SPEED_BAND_FAST: f32 = 7.0;

/// Monotonic simulation tick counter.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Axis-aligned 2D position; x is lateral, y is distance along the track.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Errors raised when validating session or track configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Indicates a track layout that cannot host a race.
    #[error("invalid track layout: {0}")]
    InvalidLayout(&'static str),
    /// Indicates an invalid session configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Fixed lane centerlines, wall limits, and finish line of one track.
///
/// Immutable for the lifetime of a session and shared read-only by every
/// vehicle on the grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrackLayout {
    /// Ascending lane center x-coordinates.
    pub lanes: [f32; LANE_COUNT],
    /// Smallest x a vehicle center may occupy.
    pub left_wall: f32,
    /// Largest x a vehicle center may occupy.
    pub right_wall: f32,
    /// Crossing this y-coordinate ends the race for a vehicle.
    pub finish_line_y: f32,
}

impl Default for TrackLayout {
    fn default() -> Self {
        Self {
            lanes: [115.0, 205.0, 295.0, 385.0],
            left_wall: 70.0,
            right_wall: 430.0,
            finish_line_y: 20_096.0,
        }
    }
}

impl TrackLayout {
    /// Construct and validate a layout.
    pub fn new(
        lanes: [f32; LANE_COUNT],
        left_wall: f32,
        right_wall: f32,
        finish_line_y: f32,
    ) -> Result<Self, ConfigError> {
        let layout = Self {
            lanes,
            left_wall,
            right_wall,
            finish_line_y,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Ensure walls bound the lanes and the finish line is reachable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.left_wall.is_finite() || !self.right_wall.is_finite() {
            return Err(ConfigError::InvalidLayout("walls must be finite"));
        }
        if self.left_wall >= self.right_wall {
            return Err(ConfigError::InvalidLayout(
                "left wall must lie left of right wall",
            ));
        }
        for pair in self.lanes.windows(2) {
            if pair[0] >= pair[1] {
                return Err(ConfigError::InvalidLayout("lanes must ascend"));
            }
        }
        for &lane in &self.lanes {
            if !lane.is_finite() || lane < self.left_wall || lane > self.right_wall {
                return Err(ConfigError::InvalidLayout("lanes must sit between walls"));
            }
        }
        if !(self.finish_line_y.is_finite() && self.finish_line_y > 0.0) {
            return Err(ConfigError::InvalidLayout("finish line must be positive"));
        }
        Ok(())
    }

    /// Lane center closest to the given x-coordinate.
    #[must_use]
    pub fn nearest_lane(&self, x: f32) -> f32 {
        self.lanes.iter().copied().fold(self.lanes[0], |best, lane| {
            if (lane - x).abs() < (best - x).abs() {
                lane
            } else {
                best
            }
        })
    }

    /// Clamp an x-coordinate into the drivable band between the walls.
    #[must_use]
    pub fn clamp_x(&self, x: f32) -> f32 {
        x.clamp(self.left_wall, self.right_wall)
    }
}

/// Per-level tuning bundle for a rival driver.
///
/// Profiles tune only the inputs of one fixed decision policy: shorter
/// reaction, higher follow accuracy, and stronger avoidance produce a
/// faster, safer driver without any extra branching in the policy itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DifficultyProfile {
    /// Seconds between decision cycles, before jitter.
    pub reaction_time: f32,
    /// Probability of switching lanes when stuck behind the target.
    pub lane_change_chance: f32,
    /// Chance to track the target's lane instead of drifting off it.
    pub follow_accuracy: f32,
    /// Cruise speed in per-tick units.
    pub max_speed: f32,
    /// How far ahead hazards are noticed, in world units.
    pub awareness_distance: f32,
    /// Probability of picking a safe lane when a crash is imminent.
    pub avoidance_strength: f32,
    /// Probability of a random swerve when not avoiding.
    pub panic_chance: f32,
}

impl DifficultyProfile {
    /// Tuning for the given level. Levels outside the shipped range fall
    /// back to the level 1 bundle.
    #[must_use]
    pub fn for_level(level: u32) -> Self {
        match level {
            2 => Self {
                reaction_time: 0.8,
                lane_change_chance: 0.10,
                follow_accuracy: 0.55,
                max_speed: 5.6,
                awareness_distance: 280.0,
                avoidance_strength: 0.45,
                panic_chance: 0.4,
            },
            3 => Self {
                reaction_time: 0.6,
                lane_change_chance: 0.15,
                follow_accuracy: 0.70,
                max_speed: 5.9,
                awareness_distance: 360.0,
                avoidance_strength: 0.60,
                panic_chance: 0.3,
            },
            4 => Self {
                reaction_time: 0.4,
                lane_change_chance: 0.25,
                follow_accuracy: 0.80,
                max_speed: 6.1,
                awareness_distance: 450.0,
                avoidance_strength: 0.75,
                panic_chance: 0.2,
            },
            5 => Self {
                reaction_time: 0.3,
                lane_change_chance: 0.35,
                follow_accuracy: 0.90,
                max_speed: 5.6,
                awareness_distance: 520.0,
                avoidance_strength: 0.85,
                panic_chance: 0.1,
            },
            6 => Self {
                reaction_time: 0.2,
                lane_change_chance: 0.50,
                follow_accuracy: 0.98,
                max_speed: 6.5,
                awareness_distance: 600.0,
                avoidance_strength: 0.95,
                panic_chance: 0.05,
            },
            _ => Self {
                reaction_time: 1.0,
                lane_change_chance: 0.05,
                follow_accuracy: 0.40,
                max_speed: 5.8,
                awareness_distance: 200.0,
                avoidance_strength: 0.3,
                panic_chance: 0.5,
            },
        }
    }
}

impl Default for DifficultyProfile {
    fn default() -> Self {
        Self::for_level(1)
    }
}

/// What a hazard does to a vehicle that meets it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HazardKind {
    /// Solid obstruction. Lethal until broken by a prior impact.
    Obstacle {
        /// Broken obstacles stay on the track but no longer destroy cars.
        broken: bool,
    },
    /// Slowdown zone.
    Puddle,
    /// Speed-boost zone.
    Ramp,
    /// Moving obstruction.
    Drone,
}

impl HazardKind {
    /// Whether the decision engine steers around this kind.
    #[must_use]
    pub const fn is_avoidable(self) -> bool {
        !matches!(self, Self::Ramp)
    }
}

/// One world hazard: a position plus the half-extents of its footprint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Hazard {
    pub position: Position,
    pub half_width: f32,
    pub half_height: f32,
    pub kind: HazardKind,
}

impl Hazard {
    /// Construct a hazard with an explicit footprint.
    #[must_use]
    pub const fn new(kind: HazardKind, position: Position, half_width: f32, half_height: f32) -> Self {
        Self {
            position,
            half_width,
            half_height,
            kind,
        }
    }

    /// Unbroken obstacle with the standard tile footprint.
    #[must_use]
    pub const fn obstacle(position: Position) -> Self {
        Self::new(
            HazardKind::Obstacle { broken: false },
            position,
            HAZARD_HALF_EXTENT,
            HAZARD_HALF_EXTENT,
        )
    }

    /// Slowdown zone with the standard tile footprint.
    #[must_use]
    pub const fn puddle(position: Position) -> Self {
        Self::new(HazardKind::Puddle, position, HAZARD_HALF_EXTENT, HAZARD_HALF_EXTENT)
    }

    /// Boost zone with the standard tile footprint.
    #[must_use]
    pub const fn ramp(position: Position) -> Self {
        Self::new(HazardKind::Ramp, position, HAZARD_HALF_EXTENT, HAZARD_HALF_EXTENT)
    }

    /// Moving obstruction with the standard tile footprint.
    #[must_use]
    pub const fn drone(position: Position) -> Self {
        Self::new(HazardKind::Drone, position, HAZARD_HALF_EXTENT, HAZARD_HALF_EXTENT)
    }

    /// Whether contact destroys a car outright.
    #[must_use]
    pub const fn is_lethal(&self) -> bool {
        matches!(self.kind, HazardKind::Obstacle { broken: false })
    }

    /// Rectangle-overlap test against a vehicle centered at `center`.
    #[must_use]
    pub fn overlaps_vehicle(&self, center: Position) -> bool {
        (self.position.x - center.x).abs() < self.half_width + VEHICLE_HALF_WIDTH
            && (self.position.y - center.y).abs() < self.half_height + VEHICLE_HALF_HEIGHT
    }

    /// Mark an obstacle as broken. No effect on other kinds.
    pub fn break_obstacle(&mut self) {
        if let HazardKind::Obstacle { broken } = &mut self.kind {
            *broken = true;
        }
    }
}

/// Flat per-tick snapshot of every hazard on the track.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HazardCatalog {
    hazards: Vec<Hazard>,
}

impl HazardCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of catalogued hazards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hazards.len()
    }

    /// Returns true when no hazards are catalogued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hazards.is_empty()
    }

    /// Append a hazard.
    pub fn push(&mut self, hazard: Hazard) {
        self.hazards.push(hazard);
    }

    /// Append every hazard from an iterator.
    pub fn extend(&mut self, hazards: impl IntoIterator<Item = Hazard>) {
        self.hazards.extend(hazards);
    }

    /// Drop all hazards while retaining capacity.
    pub fn clear(&mut self) {
        self.hazards.clear();
    }

    /// Iterate over all hazards.
    pub fn iter(&self) -> impl Iterator<Item = &Hazard> {
        self.hazards.iter()
    }

    /// Iterate mutably, e.g. to break obstacles or move drones.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Hazard> {
        self.hazards.iter_mut()
    }

    /// Hazards the decision engine steers around: everything but ramps.
    pub fn avoidable(&self) -> impl Iterator<Item = &Hazard> {
        self.hazards.iter().filter(|h| h.kind.is_avoidable())
    }
}

/// Read-only per-tick snapshot of the vehicle the agent reacts to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetState {
    pub position: Position,
    pub speed: f32,
}

impl TargetState {
    /// Construct a new snapshot.
    #[must_use]
    pub const fn new(position: Position, speed: f32) -> Self {
        Self { position, speed }
    }
}

/// Lifecycle of a rival agent.
///
/// `Dormant` waits for the target to start moving. `Exploding`, `Destroyed`,
/// and `Finished` perform no decision-making and no movement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum RivalState {
    #[default]
    Dormant,
    Active,
    Exploding,
    Destroyed,
    Finished,
}

impl RivalState {
    /// Whether the agent can still influence the race.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Dormant | Self::Active)
    }

    /// Whether the agent has left the race for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed | Self::Finished)
    }
}

/// Steering direction reported for animation purposes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Lean {
    #[default]
    Straight,
    Left,
    Right,
}

/// Coarse speed bucket driving the animation row selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SpeedBand {
    Slow,
    Mid,
    Fast,
}

impl SpeedBand {
    /// Bucket a per-tick speed magnitude.
    #[must_use]
    pub fn from_speed(speed: f32) -> Self {
        let magnitude = speed.abs();
        if magnitude < SPEED_BAND_MID {
            Self::Slow
        } else if magnitude < SPEED_BAND_FAST {
            Self::Mid
        } else {
            Self::Fast
        }
    }
}

/// Discrete tuple sufficient for the embedding layer to pick a sprite frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VisualState {
    pub band: SpeedBand,
    pub lean: Lean,
}

/// What perception extracted from the hazard catalog this decision cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Perception {
    /// Forward distance to the nearest hazard in the agent's path, if any.
    pub nearest_hazard: Option<f32>,
    /// True when a hazard sits ahead within awareness and lane tolerance.
    pub imminent_crash: bool,
    /// True when the tracked target is inside the proximity buffer.
    pub target_too_close: bool,
}

impl Perception {
    /// Scan the catalog from `position` looking `awareness` units ahead.
    ///
    /// Only hazards strictly ahead and within the lane tolerance register;
    /// the target is evaluated separately against its own buffer box.
    #[must_use]
    pub fn scan(
        position: Position,
        awareness: f32,
        target: Option<&TargetState>,
        hazards: &HazardCatalog,
    ) -> Self {
        let mut nearest: Option<f32> = None;
        for hazard in hazards.avoidable() {
            let ahead = hazard.position.y - position.y;
            if ahead > 0.0
                && ahead < awareness
                && (hazard.position.x - position.x).abs() < LANE_TOLERANCE
                && nearest.is_none_or(|best| ahead < best)
            {
                nearest = Some(ahead);
            }
        }
        let target_too_close = target.is_some_and(|t| {
            (position.y - t.position.y).abs() < TARGET_BUFFER_FORWARD
                && (position.x - t.position.x).abs() < TARGET_BUFFER_LATERAL
        });
        Self {
            nearest_hazard: nearest,
            imminent_crash: nearest.is_some(),
            target_too_close,
        }
    }
}

/// Per-tick inputs handed to an agent by its owning session.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Seconds of simulated time this tick covers.
    pub dt: f32,
    /// Tracked-target snapshot; `None` suspends the agent entirely.
    pub target: Option<TargetState>,
    /// Hazard snapshot for this tick.
    pub hazards: &'a HazardCatalog,
}

/// Events one agent emitted during a single tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AgentEvents {
    /// Lifecycle state entered this tick, at most one per tick.
    pub transition: Option<RivalState>,
    /// Speed multiplier the embedding layer should apply to the target.
    pub target_drag: Option<f32>,
}

/// The AI-controlled opponent car.
///
/// All mutable state lives on the struct and is rebuilt per spawn; the agent
/// holds no references into the world and reads hazards only through the
/// per-tick [`StepContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RivalAgent {
    position: Position,
    profile: DifficultyProfile,
    layout: TrackLayout,
    base_speed: f32,
    current_speed: f32,
    target_lane_x: f32,
    changing_lane: bool,
    lean: Lean,
    slowing_down: bool,
    hit_wall: bool,
    reaction_timer: f32,
    stuck_timer: f32,
    collision_cooldown: f32,
    spawn_elapsed: f32,
    wall_contact_timer: f32,
    explosion_stage: u8,
    explosion_counter: u8,
    state: RivalState,
}

impl RivalAgent {
    /// Construct a dormant agent at `position`.
    #[must_use]
    pub fn new(position: Position, profile: DifficultyProfile, layout: TrackLayout) -> Self {
        Self {
            position,
            profile,
            layout,
            base_speed: profile.max_speed,
            current_speed: profile.max_speed,
            target_lane_x: position.x,
            changing_lane: false,
            lean: Lean::Straight,
            slowing_down: false,
            hit_wall: false,
            reaction_timer: 0.0,
            stuck_timer: 0.0,
            collision_cooldown: 0.0,
            spawn_elapsed: 0.0,
            wall_contact_timer: 0.0,
            explosion_stage: 0,
            explosion_counter: 0,
            state: RivalState::Dormant,
        }
    }

    /// Current world position.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RivalState {
        self.state
    }

    /// Current per-tick speed.
    #[must_use]
    pub const fn current_speed(&self) -> f32 {
        self.current_speed
    }

    /// Lane x the agent is steering toward.
    #[must_use]
    pub const fn target_lane_x(&self) -> f32 {
        self.target_lane_x
    }

    /// Whether a deliberate lane change is in progress.
    #[must_use]
    pub const fn is_changing_lane(&self) -> bool {
        self.changing_lane
    }

    /// Whether the last wall clamp actually moved the agent.
    #[must_use]
    pub const fn hit_wall(&self) -> bool {
        self.hit_wall
    }

    /// Seconds spent crowding the target without resolution.
    #[must_use]
    pub const fn stuck_time(&self) -> f32 {
        self.stuck_timer
    }

    /// Whether the agent is mid-explosion.
    #[must_use]
    pub const fn is_exploding(&self) -> bool {
        matches!(self.state, RivalState::Exploding)
    }

    /// Whether the explosion has run its course.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        matches!(self.state, RivalState::Destroyed)
    }

    /// Whether the agent crossed the finish line.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, RivalState::Finished)
    }

    /// Blast stage index while exploding; retains the final stage afterwards.
    #[must_use]
    pub const fn explosion_stage(&self) -> u8 {
        self.explosion_stage
    }

    /// The tuning bundle this agent was built with.
    #[must_use]
    pub const fn profile(&self) -> &DifficultyProfile {
        &self.profile
    }

    /// Discrete animation state derived from speed and lean.
    #[must_use]
    pub fn visual_state(&self) -> VisualState {
        VisualState {
            band: SpeedBand::from_speed(self.current_speed),
            lean: self.lean,
        }
    }

    /// Trigger an explosion from outside the per-tick pipeline.
    ///
    /// Without `force` the spawn grace period suppresses the blast. Returns
    /// whether the agent actually started exploding; repeat triggers and
    /// triggers on non-active agents are no-ops.
    pub fn explode(&mut self, force: bool) -> bool {
        let mut events = AgentEvents::default();
        self.trigger_explosion(force, &mut events)
    }

    /// Advance the agent by one fixed timestep.
    ///
    /// Decision-making runs on its own reaction-interval clock inside this
    /// call; everything else (steering, clamping, speed, collisions) runs
    /// every tick. At most one lifecycle transition is reported per tick.
    pub fn step(&mut self, ctx: &StepContext<'_>, rng: &mut dyn RngCore) -> AgentEvents {
        let mut events = AgentEvents::default();
        match self.state {
            RivalState::Destroyed | RivalState::Finished => return events,
            RivalState::Exploding => {
                self.advance_explosion(&mut events);
                return events;
            }
            RivalState::Dormant => {
                // Frozen on the grid until the target starts moving.
                if !ctx.target.is_some_and(|t| t.speed > 0.0) {
                    return events;
                }
                self.activate(&mut events);
            }
            RivalState::Active => {}
        }

        let Some(target) = ctx.target else {
            // No target to race: suspend without erroring.
            return events;
        };

        self.spawn_elapsed += ctx.dt;
        if self.collision_cooldown > 0.0 {
            self.collision_cooldown = (self.collision_cooldown - ctx.dt).max(0.0);
        }

        self.reaction_timer -= ctx.dt;
        if self.reaction_timer <= 0.0 {
            self.decide(&target, ctx.hazards, rng);
            self.reaction_timer = self.profile.reaction_time
                * rng.random_range(REACTION_JITTER_MIN..REACTION_JITTER_MAX);
        }

        self.track_stuck(&target, ctx.dt);
        self.enforce_buffer(&target);
        self.steer_lateral();
        self.clamp_to_walls(ctx.dt, &mut events);
        if self.state == RivalState::Exploding {
            return events;
        }

        self.govern_speed(ctx.hazards);
        self.position.y += self.current_speed * ctx.dt * SPEED_SCALE;

        self.resolve_target_collision(&target, &mut events);
        self.check_obstacle_collision(ctx.hazards, &mut events);
        if self.state == RivalState::Exploding {
            return events;
        }

        if self.position.y >= self.layout.finish_line_y {
            self.push_transition(RivalState::Finished, &mut events);
        }
        events
    }

    fn activate(&mut self, events: &mut AgentEvents) {
        self.spawn_elapsed = 0.0;
        self.wall_contact_timer = 0.0;
        self.collision_cooldown = 0.0;
        self.push_transition(RivalState::Active, events);
    }

    /// Record a lifecycle transition unless one already happened this tick.
    fn push_transition(&mut self, next: RivalState, events: &mut AgentEvents) -> bool {
        if events.transition.is_some() {
            return false;
        }
        self.state = next;
        events.transition = Some(next);
        true
    }

    fn trigger_explosion(&mut self, force: bool, events: &mut AgentEvents) -> bool {
        if self.state != RivalState::Active {
            return false;
        }
        if !force && self.spawn_elapsed < SPAWN_GRACE_SECS {
            return false;
        }
        self.push_transition(RivalState::Exploding, events)
    }

    fn advance_explosion(&mut self, events: &mut AgentEvents) {
        self.explosion_counter += 1;
        if self.explosion_counter >= EXPLOSION_STAGE_TICKS {
            self.explosion_counter = 0;
            if self.explosion_stage + 1 < EXPLOSION_STAGES {
                self.explosion_stage += 1;
            } else {
                self.push_transition(RivalState::Destroyed, events);
            }
        }
    }

    /// One decision cycle: re-evaluate the target lane and slow-down intent.
    fn decide(&mut self, target: &TargetState, hazards: &HazardCatalog, rng: &mut dyn RngCore) {
        let perception = Perception::scan(
            self.position,
            self.profile.awareness_distance,
            Some(target),
            hazards,
        );
        self.slowing_down = false;

        if perception.imminent_crash || perception.target_too_close {
            // The target crowding us always warrants evasion; hazards only
            // with the profile's avoidance probability.
            if perception.target_too_close
                || rng.random::<f32>() < self.profile.avoidance_strength
            {
                let current = self.layout.nearest_lane(self.position.x);
                let safe: Vec<f32> = self
                    .layout
                    .lanes
                    .iter()
                    .copied()
                    .filter(|&lane| lane != current)
                    .filter(|&lane| self.lane_is_safe(lane, target, hazards))
                    .collect();
                if let Some(&lane) = safe.choose(rng) {
                    self.target_lane_x = lane;
                    self.changing_lane = true;
                } else {
                    // Nowhere to go: brake and hold the line.
                    self.slowing_down = true;
                }
            } else if rng.random::<f32>() < self.profile.panic_chance {
                if let Some(&lane) = self.layout.lanes.choose(rng) {
                    self.target_lane_x = lane;
                    self.changing_lane = true;
                }
            }
        } else {
            let mut nominal = target.position.x;
            if rng.random::<f32>() > self.profile.follow_accuracy {
                if let Some(&offset) = [-FOLLOW_OFFSET, FOLLOW_OFFSET].choose(rng) {
                    nominal += offset;
                }
            }
            if self.stuck_timer > STUCK_TRIGGER_SECS {
                if rng.random::<f32>() < self.profile.lane_change_chance {
                    if let Some(&lane) = self.layout.lanes.choose(rng) {
                        self.target_lane_x = lane;
                        self.changing_lane = true;
                    }
                    self.stuck_timer = 0.0;
                } else {
                    self.target_lane_x = nominal;
                }
            } else if !self.changing_lane {
                self.target_lane_x = nominal;
            }
        }

        self.target_lane_x = self.layout.clamp_x(self.target_lane_x);
    }

    /// A lane is safe when no avoidable hazard sits ahead of us in it and the
    /// target is not occupying it nearby.
    fn lane_is_safe(&self, lane: f32, target: &TargetState, hazards: &HazardCatalog) -> bool {
        for hazard in hazards.avoidable() {
            let ahead = hazard.position.y - self.position.y;
            if ahead > 0.0
                && ahead < self.profile.awareness_distance
                && (hazard.position.x - lane).abs() < LANE_TOLERANCE
            {
                return false;
            }
        }
        if (lane - target.position.x).abs() < SAFE_LANE_TARGET_LATERAL
            && (self.position.y - target.position.y).abs() < SAFE_LANE_TARGET_FORWARD
        {
            return false;
        }
        true
    }

    fn track_stuck(&mut self, target: &TargetState, dt: f32) {
        let lateral = (self.position.x - target.position.x).abs();
        let ahead = target.position.y - self.position.y;
        if lateral < STUCK_LATERAL && ahead > 0.0 && ahead < STUCK_AHEAD_MAX {
            self.stuck_timer += dt;
        } else {
            self.stuck_timer = 0.0;
        }
    }

    /// Continuous proximity reflex, independent of the decision cadence.
    ///
    /// Keeps the agent from overlapping the target between decisions by
    /// nudging it away and dragging the lane target along.
    fn enforce_buffer(&mut self, target: &TargetState) {
        let lateral = self.position.x - target.position.x;
        if lateral.abs() >= BUFFER_LATERAL
            || (self.position.y - target.position.y).abs() >= BUFFER_FORWARD
        {
            return;
        }
        if lateral > 0.0 {
            self.position.x += BUFFER_NUDGE;
            if self.target_lane_x < self.position.x + BUFFER_TARGET_MARGIN {
                self.target_lane_x =
                    (self.position.x + BUFFER_TARGET_EXTENT).min(self.layout.right_wall);
            }
        } else {
            self.position.x -= BUFFER_NUDGE;
            if self.target_lane_x > self.position.x - BUFFER_TARGET_MARGIN {
                self.target_lane_x =
                    (self.position.x - BUFFER_TARGET_EXTENT).max(self.layout.left_wall);
            }
        }
    }

    fn steer_lateral(&mut self) {
        let distance = self.target_lane_x - self.position.x;
        if distance.abs() > LANE_EPSILON {
            if distance > 0.0 {
                self.position.x += LATERAL_SPEED;
                self.lean = Lean::Right;
            } else {
                self.position.x -= LATERAL_SPEED;
                self.lean = Lean::Left;
            }
        } else {
            self.lean = Lean::Straight;
            self.changing_lane = false;
        }
    }

    /// Clamp into the drivable band and track sustained wall grinding.
    /// Five continuous seconds against a wall past the spawn grace period
    /// wrecks the car.
    fn clamp_to_walls(&mut self, dt: f32, events: &mut AgentEvents) {
        if self.position.x < self.layout.left_wall {
            self.position.x = self.layout.left_wall;
            self.hit_wall = true;
        } else if self.position.x > self.layout.right_wall {
            self.position.x = self.layout.right_wall;
            self.hit_wall = true;
        } else {
            self.hit_wall = false;
        }
        if self.hit_wall && self.spawn_elapsed >= SPAWN_GRACE_SECS {
            self.wall_contact_timer += dt;
            if self.wall_contact_timer >= WALL_FATAL_SECS {
                self.trigger_explosion(true, events);
            }
        } else {
            self.wall_contact_timer = 0.0;
        }
    }

    /// Smooth the current speed toward a ceiling shaped by zone overlaps and
    /// the slow-down intent. Never jumps instantaneously.
    fn govern_speed(&mut self, hazards: &HazardCatalog) {
        let mut ceiling = self.base_speed;
        if hazards
            .iter()
            .any(|h| matches!(h.kind, HazardKind::Ramp) && h.overlaps_vehicle(self.position))
        {
            ceiling += RAMP_BOOST;
        }
        if hazards
            .iter()
            .any(|h| matches!(h.kind, HazardKind::Puddle) && h.overlaps_vehicle(self.position))
        {
            ceiling *= PUDDLE_FACTOR;
        }
        if self.slowing_down {
            ceiling *= BRAKE_FACTOR;
        }
        if self.current_speed < ceiling {
            self.current_speed = (self.current_speed + SPEED_STEP).min(ceiling);
        } else if self.current_speed > ceiling {
            self.current_speed = (self.current_speed - SPEED_STEP).max(ceiling);
        }
    }

    /// Rubbing is racing: contact with the target costs both cars some
    /// speed, at most once per cooldown window.
    fn resolve_target_collision(&mut self, target: &TargetState, events: &mut AgentEvents) {
        let overlap = (self.position.x - target.position.x).abs() < VEHICLE_HALF_WIDTH * 2.0
            && (self.position.y - target.position.y).abs() < VEHICLE_HALF_HEIGHT * 2.0;
        if overlap && self.collision_cooldown <= 0.0 {
            self.current_speed *= BUMP_SELF_FACTOR;
            events.target_drag = Some(BUMP_TARGET_DRAG);
            self.collision_cooldown = COLLISION_COOLDOWN_SECS;
        }
    }

    /// First contact with an unbroken obstacle is terminal, grace permitting.
    fn check_obstacle_collision(&mut self, hazards: &HazardCatalog, events: &mut AgentEvents) {
        let lethal = hazards
            .iter()
            .any(|h| h.is_lethal() && h.overlaps_vehicle(self.position));
        if lethal {
            self.trigger_explosion(false, events);
        }
    }
}

/// Static configuration for one race session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Level whose difficulty bundle the rivals use.
    pub level: u32,
    /// Optional RNG seed for reproducible races.
    pub rng_seed: Option<u64>,
    /// Track geometry shared by every vehicle.
    pub layout: TrackLayout,
    /// Simulation ticks per second.
    pub tick_rate: f32,
    /// Maximum number of per-tick summaries retained in memory.
    pub history_capacity: usize,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            level: 1,
            rng_seed: None,
            layout: TrackLayout::default(),
            tick_rate: 60.0,
            history_capacity: 256,
        }
    }
}

impl RaceConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout.validate()?;
        if !(self.tick_rate.is_finite() && self.tick_rate > 0.0) {
            return Err(ConfigError::InvalidConfig("tick_rate must be positive"));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, seeding from entropy when no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

/// Events emitted after processing one session tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickEvents {
    pub tick: Tick,
    /// Lifecycle transitions that happened this tick, one per agent at most.
    pub transitions: Vec<(AgentId, RivalState)>,
    /// Combined speed multiplier to apply to the tracked target, if any
    /// rival made contact this tick.
    pub target_drag: Option<f32>,
}

/// Per-tick summary retained in the session history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub agent_count: usize,
    pub active: usize,
    pub finished: usize,
    pub destroyed: usize,
    /// Track position of the rival furthest along, excluding wrecks.
    pub leading_rival_y: Option<f32>,
}

/// Owner of the rival agents, the hazard snapshot, and the session RNG.
///
/// The session advances every agent one fixed timestep per [`step`] call and
/// reports lifecycle transitions and target drag back to the embedding
/// layer. Resetting the session rebuilds everything from configuration.
///
/// [`step`]: RaceSession::step
pub struct RaceSession {
    config: RaceConfig,
    profile: DifficultyProfile,
    tick: Tick,
    rng: SmallRng,
    agents: SlotMap<AgentId, RivalAgent>,
    hazards: HazardCatalog,
    target: Option<TargetState>,
    history: VecDeque<TickSummary>,
}

impl std::fmt::Debug for RaceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaceSession")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("agent_count", &self.agents.len())
            .field("hazard_count", &self.hazards.len())
            .finish()
    }
}

impl RaceSession {
    /// Instantiate a session from a validated configuration.
    pub fn new(config: RaceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let profile = DifficultyProfile::for_level(config.level);
        let rng = config.seeded_rng();
        let history_capacity = config.history_capacity;
        Ok(Self {
            profile,
            rng,
            config,
            tick: Tick::zero(),
            agents: SlotMap::with_key(),
            hazards: HazardCatalog::new(),
            target: None,
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Immutable access to the configuration.
    #[must_use]
    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    /// The difficulty bundle rivals spawn with.
    #[must_use]
    pub const fn profile(&self) -> &DifficultyProfile {
        &self.profile
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Seconds of simulated time per tick.
    #[must_use]
    pub fn dt(&self) -> f32 {
        1.0 / self.config.tick_rate
    }

    /// Borrow the session RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /// Spawn a dormant rival at `position`, returning its handle.
    pub fn spawn_rival(&mut self, position: Position) -> AgentId {
        let agent = RivalAgent::new(position, self.profile, self.config.layout);
        self.agents.insert(agent)
    }

    /// Remove a rival by handle, returning its final state.
    pub fn remove_rival(&mut self, id: AgentId) -> Option<RivalAgent> {
        self.agents.remove(id)
    }

    /// Borrow a rival by handle.
    #[must_use]
    pub fn rival(&self, id: AgentId) -> Option<&RivalAgent> {
        self.agents.get(id)
    }

    /// Mutably borrow a rival by handle.
    #[must_use]
    pub fn rival_mut(&mut self, id: AgentId) -> Option<&mut RivalAgent> {
        self.agents.get_mut(id)
    }

    /// Iterate over all rivals with their handles.
    pub fn rivals(&self) -> impl Iterator<Item = (AgentId, &RivalAgent)> {
        self.agents.iter()
    }

    /// Number of rivals on the grid.
    #[must_use]
    pub fn rival_count(&self) -> usize {
        self.agents.len()
    }

    /// Replace the tracked-target snapshot for subsequent ticks.
    pub fn set_target(&mut self, target: Option<TargetState>) {
        self.target = target;
    }

    /// The current tracked-target snapshot.
    #[must_use]
    pub const fn target(&self) -> Option<TargetState> {
        self.target
    }

    /// Immutable access to the hazard snapshot.
    #[must_use]
    pub const fn hazards(&self) -> &HazardCatalog {
        &self.hazards
    }

    /// Mutable access to the hazard snapshot.
    #[must_use]
    pub fn hazards_mut(&mut self) -> &mut HazardCatalog {
        &mut self.hazards
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Advance every rival by one fixed timestep.
    pub fn step(&mut self) -> TickEvents {
        let dt = self.dt();
        let ctx = StepContext {
            dt,
            target: self.target,
            hazards: &self.hazards,
        };
        let mut transitions = Vec::new();
        let mut target_drag: Option<f32> = None;
        for (id, agent) in &mut self.agents {
            let events = agent.step(&ctx, &mut self.rng);
            if let Some(state) = events.transition {
                transitions.push((id, state));
            }
            if let Some(drag) = events.target_drag {
                target_drag = Some(target_drag.map_or(drag, |combined| combined * drag));
            }
        }
        self.tick = self.tick.next();
        self.push_history();
        TickEvents {
            tick: self.tick,
            transitions,
            target_drag,
        }
    }

    /// Tear the session back down to its freshly constructed state.
    pub fn reset(&mut self) {
        self.agents.clear();
        self.hazards.clear();
        self.target = None;
        self.history.clear();
        self.tick = Tick::zero();
        self.rng = self.config.seeded_rng();
    }

    fn push_history(&mut self) {
        let mut active = 0;
        let mut finished = 0;
        let mut destroyed = 0;
        let mut leading: Option<f32> = None;
        for agent in self.agents.values() {
            match agent.state() {
                RivalState::Active => active += 1,
                RivalState::Finished => finished += 1,
                RivalState::Destroyed => destroyed += 1,
                RivalState::Dormant | RivalState::Exploding => {}
            }
            if !matches!(agent.state(), RivalState::Exploding | RivalState::Destroyed) {
                let y = agent.position().y;
                leading = Some(leading.map_or(y, |best| best.max(y)));
            }
        }
        let summary = TickSummary {
            tick: self.tick,
            agent_count: self.agents.len(),
            active,
            finished,
            destroyed,
            leading_rival_y: leading,
        };
        while self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rng(seed: u64) -> SmallRng {
        SmallRng::seed_from_u64(seed)
    }

    fn moving_target(x: f32, y: f32) -> Option<TargetState> {
        Some(TargetState::new(Position::new(x, y), 5.0))
    }

    fn active_agent(x: f32, y: f32) -> RivalAgent {
        // Perfect follow accuracy keeps the activation-tick decision from
        // drifting the lane target, so positions stay predictable.
        let profile = DifficultyProfile {
            follow_accuracy: 1.0,
            ..DifficultyProfile::for_level(1)
        };
        let mut agent = RivalAgent::new(Position::new(x, y), profile, TrackLayout::default());
        let empty = HazardCatalog::new();
        let ctx = StepContext {
            dt: 1.0 / 60.0,
            target: moving_target(x, y + 400.0),
            hazards: &empty,
        };
        let events = agent.step(&ctx, &mut test_rng(0));
        assert_eq!(events.transition, Some(RivalState::Active));
        agent
    }

    #[test]
    fn profile_lookup_falls_back_to_level_one() {
        let first = DifficultyProfile::for_level(1);
        assert_eq!(DifficultyProfile::for_level(0), first);
        assert_eq!(DifficultyProfile::for_level(99), first);
        assert_ne!(DifficultyProfile::for_level(6), first);
    }

    #[test]
    fn layout_validation_rejects_bad_geometry() {
        let unsorted = TrackLayout::new([205.0, 115.0, 295.0, 385.0], 70.0, 430.0, 1_000.0);
        assert_eq!(
            unsorted,
            Err(ConfigError::InvalidLayout("lanes must ascend"))
        );
        let outside = TrackLayout::new([10.0, 205.0, 295.0, 385.0], 70.0, 430.0, 1_000.0);
        assert_eq!(
            outside,
            Err(ConfigError::InvalidLayout("lanes must sit between walls"))
        );
        let inverted = TrackLayout::new([115.0, 205.0, 295.0, 385.0], 430.0, 70.0, 1_000.0);
        assert!(inverted.is_err());
        assert!(TrackLayout::default().validate().is_ok());
    }

    #[test]
    fn nearest_lane_and_clamp() {
        let layout = TrackLayout::default();
        assert_eq!(layout.nearest_lane(100.0), 115.0);
        assert_eq!(layout.nearest_lane(390.0), 385.0);
        assert_eq!(layout.nearest_lane(250.0), 205.0);
        assert_eq!(layout.clamp_x(0.0), 70.0);
        assert_eq!(layout.clamp_x(500.0), 430.0);
        assert_eq!(layout.clamp_x(300.0), 300.0);
    }

    #[test]
    fn speed_bands_bucket_by_magnitude() {
        assert_eq!(SpeedBand::from_speed(0.0), SpeedBand::Slow);
        assert_eq!(SpeedBand::from_speed(2.9), SpeedBand::Slow);
        assert_eq!(SpeedBand::from_speed(3.0), SpeedBand::Mid);
        assert_eq!(SpeedBand::from_speed(-6.9), SpeedBand::Mid);
        assert_eq!(SpeedBand::from_speed(7.0), SpeedBand::Fast);
    }

    #[test]
    fn catalog_avoidable_excludes_ramps() {
        let mut catalog = HazardCatalog::new();
        catalog.push(Hazard::obstacle(Position::new(115.0, 100.0)));
        catalog.push(Hazard::ramp(Position::new(205.0, 100.0)));
        catalog.push(Hazard::puddle(Position::new(295.0, 100.0)));
        catalog.push(Hazard::drone(Position::new(385.0, 100.0)));
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.avoidable().count(), 3);
    }

    #[test]
    fn broken_obstacles_lose_lethality() {
        let mut hazard = Hazard::obstacle(Position::new(115.0, 0.0));
        assert!(hazard.is_lethal());
        hazard.break_obstacle();
        assert!(!hazard.is_lethal());
        assert!(hazard.kind.is_avoidable());
    }

    #[test]
    fn perception_respects_window_and_tolerance() {
        let mut catalog = HazardCatalog::new();
        catalog.push(Hazard::obstacle(Position::new(115.0, 150.0)));
        let at = Position::new(115.0, 0.0);

        let seen = Perception::scan(at, 200.0, None, &catalog);
        assert!(seen.imminent_crash);
        assert_eq!(seen.nearest_hazard, Some(150.0));

        let beyond = Perception::scan(at, 100.0, None, &catalog);
        assert!(!beyond.imminent_crash);

        let behind = Perception::scan(Position::new(115.0, 200.0), 200.0, None, &catalog);
        assert!(!behind.imminent_crash);

        let off_lane = Perception::scan(Position::new(205.0, 0.0), 200.0, None, &catalog);
        assert!(!off_lane.imminent_crash);
    }

    #[test]
    fn perception_flags_crowding_target() {
        let catalog = HazardCatalog::new();
        let target = TargetState::new(Position::new(150.0, 50.0), 5.0);
        let close = Perception::scan(Position::new(115.0, 0.0), 200.0, Some(&target), &catalog);
        assert!(close.target_too_close);
        let far = Perception::scan(Position::new(115.0, 300.0), 200.0, Some(&target), &catalog);
        assert!(!far.target_too_close);
    }

    #[test]
    fn dormant_agent_ignores_stationary_target() {
        let mut agent = RivalAgent::new(
            Position::new(115.0, 0.0),
            DifficultyProfile::for_level(1),
            TrackLayout::default(),
        );
        let catalog = HazardCatalog::new();
        let ctx = StepContext {
            dt: 1.0 / 60.0,
            target: Some(TargetState::new(Position::new(205.0, 20.0), 0.0)),
            hazards: &catalog,
        };
        let mut rng = test_rng(3);
        for _ in 0..120 {
            let events = agent.step(&ctx, &mut rng);
            assert_eq!(events, AgentEvents::default());
        }
        assert_eq!(agent.state(), RivalState::Dormant);
        assert_eq!(agent.position(), Position::new(115.0, 0.0));
    }

    #[test]
    fn missing_target_suspends_active_agent() {
        let mut agent = active_agent(115.0, 0.0);
        let before = agent.position();
        let catalog = HazardCatalog::new();
        let ctx = StepContext {
            dt: 1.0 / 60.0,
            target: None,
            hazards: &catalog,
        };
        let mut rng = test_rng(4);
        for _ in 0..60 {
            let events = agent.step(&ctx, &mut rng);
            assert_eq!(events, AgentEvents::default());
        }
        assert_eq!(agent.state(), RivalState::Active);
        assert_eq!(agent.position(), before);
    }

    #[test]
    fn explosion_walks_stages_then_destroys() {
        let mut agent = active_agent(115.0, 0.0);
        assert!(agent.explode(true));
        assert_eq!(agent.state(), RivalState::Exploding);
        assert!(!agent.explode(true), "repeat trigger must be a no-op");

        let position = agent.position();
        let catalog = HazardCatalog::new();
        let ctx = StepContext {
            dt: 1.0 / 60.0,
            target: moving_target(205.0, 400.0),
            hazards: &catalog,
        };
        let mut rng = test_rng(5);
        let mut destroyed_at = None;
        for tick in 1..=50 {
            let events = agent.step(&ctx, &mut rng);
            if events.transition == Some(RivalState::Destroyed) {
                destroyed_at = Some(tick);
                break;
            }
        }
        assert_eq!(destroyed_at, Some(40), "four stages of ten ticks each");
        assert_eq!(agent.explosion_stage(), EXPLOSION_STAGES - 1);
        assert_eq!(agent.position(), position, "wrecks do not move");
    }

    #[test]
    fn grace_period_suppresses_unforced_explosions() {
        let mut agent = active_agent(115.0, 0.0);
        assert!(!agent.explode(false));
        assert_eq!(agent.state(), RivalState::Active);
        assert!(agent.explode(true));
    }

    #[test]
    fn buffer_reflex_nudges_away_from_target() {
        let mut agent = active_agent(115.0, 0.0);
        let catalog = HazardCatalog::new();
        // Target hugging our left flank pushes us right.
        let ctx = StepContext {
            dt: 1.0 / 60.0,
            target: moving_target(80.0, 10.0),
            hazards: &catalog,
        };
        let before_x = agent.position().x;
        agent.step(&ctx, &mut test_rng(6));
        assert!(agent.position().x > before_x);
    }

    #[test]
    fn reaction_timer_stays_non_negative_after_each_step() {
        let mut agent = active_agent(295.0, 0.0);
        let catalog = HazardCatalog::new();
        let mut rng = test_rng(7);
        for tick in 0..600 {
            let ctx = StepContext {
                dt: 1.0 / 60.0,
                target: moving_target(295.0, 400.0 + tick as f32 * 5.0),
                hazards: &catalog,
            };
            agent.step(&ctx, &mut rng);
            assert!(agent.reaction_timer >= 0.0, "timer went negative");
        }
    }

    #[test]
    fn follow_with_perfect_accuracy_tracks_target_lane() {
        let profile = DifficultyProfile {
            follow_accuracy: 1.0,
            reaction_time: 0.1,
            ..DifficultyProfile::for_level(1)
        };
        let mut agent = RivalAgent::new(Position::new(115.0, 0.0), profile, TrackLayout::default());
        let catalog = HazardCatalog::new();
        let ctx = StepContext {
            dt: 1.0 / 60.0,
            target: moving_target(295.0, 400.0),
            hazards: &catalog,
        };
        agent.step(&ctx, &mut test_rng(8));
        assert_eq!(agent.target_lane_x(), 295.0);
    }

    #[test]
    fn session_rejects_invalid_config() {
        let bad_tick = RaceConfig {
            tick_rate: 0.0,
            ..RaceConfig::default()
        };
        assert!(RaceSession::new(bad_tick).is_err());
        let bad_history = RaceConfig {
            history_capacity: 0,
            ..RaceConfig::default()
        };
        assert!(RaceSession::new(bad_history).is_err());
    }

    #[test]
    fn session_spawns_and_removes_rivals() {
        let mut session = RaceSession::new(RaceConfig::default()).expect("session");
        let a = session.spawn_rival(Position::new(115.0, -20.0));
        let b = session.spawn_rival(Position::new(385.0, -20.0));
        assert_ne!(a, b);
        assert_eq!(session.rival_count(), 2);
        assert!(session.rival(a).is_some());
        let removed = session.remove_rival(a).expect("removed");
        assert_eq!(removed.state(), RivalState::Dormant);
        assert_eq!(session.rival_count(), 1);
        assert!(session.rival(a).is_none());
    }

    #[test]
    fn session_history_is_bounded() {
        let config = RaceConfig {
            history_capacity: 8,
            rng_seed: Some(1),
            ..RaceConfig::default()
        };
        let mut session = RaceSession::new(config).expect("session");
        session.spawn_rival(Position::new(115.0, -20.0));
        session.set_target(Some(TargetState::new(Position::new(205.0, 0.0), 5.0)));
        for _ in 0..32 {
            session.step();
        }
        assert_eq!(session.history().count(), 8);
        let last = session.history().last().expect("summary");
        assert_eq!(last.tick, Tick(32));
        assert_eq!(last.agent_count, 1);
        assert_eq!(last.active, 1);
    }

    #[test]
    fn session_reset_rebuilds_from_scratch() {
        let config = RaceConfig {
            rng_seed: Some(2),
            ..RaceConfig::default()
        };
        let mut session = RaceSession::new(config).expect("session");
        session.spawn_rival(Position::new(115.0, -20.0));
        session.hazards_mut().push(Hazard::puddle(Position::new(205.0, 600.0)));
        session.set_target(Some(TargetState::new(Position::new(205.0, 0.0), 5.0)));
        for _ in 0..16 {
            session.step();
        }
        session.reset();
        assert_eq!(session.tick(), Tick::zero());
        assert_eq!(session.rival_count(), 0);
        assert!(session.hazards().is_empty());
        assert!(session.target().is_none());
        assert_eq!(session.history().count(), 0);
    }
}
