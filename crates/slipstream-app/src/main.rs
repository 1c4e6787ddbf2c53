//! Headless race harness: a scripted player car versus the rival AI.
//!
//! Seeds a procedural hazard field, runs the fixed-timestep session until the
//! race settles, and reports the outcome. Useful for tuning difficulty
//! bundles and for watching the rival's lifecycle without a renderer.

use anyhow::Result;
use clap::Parser;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::Serialize;
use slipstream_core::{
    Hazard, HazardCatalog, HazardKind, Position, RaceConfig, RaceSession, RivalState, SPEED_SCALE,
    TargetState, TrackLayout,
};
use tracing::{debug, info, warn};

const PLAYER_ACCEL: f32 = 0.08;
const PLAYER_LATERAL_SPEED: f32 = 3.0;
const PLAYER_LANE_EPSILON: f32 = 2.0;
const PLAYER_PUDDLE_FACTOR: f32 = 0.6;
const PLAYER_RAMP_BOOST: f32 = 4.0;
const PLAYER_OBSTACLE_FACTOR: f32 = 0.5;
const PLAYER_LIVES: i32 = 3;
const WEAVE_MIN_SECS: f32 = 2.5;
const WEAVE_MAX_SECS: f32 = 6.0;

#[derive(Parser, Debug)]
#[command(
    name = "slipstream",
    version,
    about = "Race the Slipstream rival AI without a renderer"
)]
struct Cli {
    /// Track level to race (1 to 6); the rival difficulty follows it.
    #[arg(long, default_value_t = 1)]
    level: u32,
    /// RNG seed for a reproducible race. Random when omitted.
    #[arg(long)]
    seed: Option<u64>,
    /// Number of rival cars on the grid.
    #[arg(long, default_value_t = 1)]
    rivals: usize,
    /// Abort the race after this many ticks.
    #[arg(long, default_value_t = 36_000)]
    max_ticks: u64,
    /// Cruise speed of the scripted player car, in per-tick units.
    #[arg(long, default_value_t = 6.2)]
    player_speed: f32,
    /// Emit the final report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

/// Scripted stand-in for the human player: cruises toward a target speed and
/// weaves between lanes on a timer.
struct PlayerCar {
    position: Position,
    speed: f32,
    cruise: f32,
    target_lane_x: f32,
    weave_timer: f32,
    lives: i32,
    finished: bool,
    wrecked: bool,
}

impl PlayerCar {
    fn new(layout: &TrackLayout, cruise: f32) -> Self {
        let lane = layout.lanes[1];
        Self {
            position: Position::new(lane, 0.0),
            speed: 0.0,
            cruise,
            target_lane_x: lane,
            weave_timer: WEAVE_MAX_SECS,
            lives: PLAYER_LIVES,
            finished: false,
            wrecked: false,
        }
    }

    fn step(
        &mut self,
        dt: f32,
        layout: &TrackLayout,
        hazards: &mut HazardCatalog,
        rng: &mut SmallRng,
    ) {
        if self.finished || self.wrecked {
            return;
        }

        self.weave_timer -= dt;
        if self.weave_timer <= 0.0 {
            let lane = layout.lanes[rng.random_range(0..layout.lanes.len())];
            self.target_lane_x = lane;
            self.weave_timer = rng.random_range(WEAVE_MIN_SECS..WEAVE_MAX_SECS);
        }

        let distance = self.target_lane_x - self.position.x;
        if distance.abs() > PLAYER_LANE_EPSILON {
            self.position.x += PLAYER_LATERAL_SPEED.copysign(distance);
        }
        self.position.x = layout.clamp_x(self.position.x);

        if self.speed < self.cruise {
            self.speed = (self.speed + PLAYER_ACCEL).min(self.cruise);
        }

        for hazard in hazards.iter_mut() {
            if !hazard.overlaps_vehicle(self.position) {
                continue;
            }
            if hazard.is_lethal() {
                hazard.break_obstacle();
                self.lives -= 1;
                self.speed *= PLAYER_OBSTACLE_FACTOR;
                warn!(lives = self.lives, "player smashed an obstacle");
                if self.lives <= 0 {
                    self.wrecked = true;
                    self.speed = 0.0;
                    return;
                }
            } else {
                match hazard.kind {
                    HazardKind::Puddle => {
                        self.speed = (self.speed * PLAYER_PUDDLE_FACTOR).max(1.0);
                    }
                    HazardKind::Ramp => {
                        self.speed = (self.speed + PLAYER_RAMP_BOOST)
                            .min(self.cruise + PLAYER_RAMP_BOOST);
                    }
                    _ => {}
                }
            }
        }

        self.position.y += self.speed * dt * SPEED_SCALE;
    }
}

#[derive(Debug, Serialize)]
struct RivalReport {
    state: RivalState,
    y: f32,
    speed: f32,
}

#[derive(Debug, Serialize)]
struct RaceReport {
    level: u32,
    seed: u64,
    ticks: u64,
    winner: &'static str,
    player_finished: bool,
    player_wrecked: bool,
    player_lives: i32,
    player_y: f32,
    rivals: Vec<RivalReport>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let report = run_race(&cli)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "level {} seed {}: {} won after {} ticks",
            report.level, report.seed, report.winner, report.ticks
        );
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Scatter obstacles, puddles, ramps, and the odd drone along the track,
/// leaving breathing room after the grid and before the finish line.
fn build_hazards(layout: &TrackLayout, rng: &mut SmallRng) -> Vec<Hazard> {
    let mut field = Vec::new();
    let mut y = 600.0;
    while y < layout.finish_line_y - 600.0 {
        let lane = layout.lanes[rng.random_range(0..layout.lanes.len())];
        let position = Position::new(lane, y);
        let roll: f32 = rng.random();
        let hazard = if roll < 0.45 {
            Hazard::obstacle(position)
        } else if roll < 0.75 {
            Hazard::puddle(position)
        } else if roll < 0.9 {
            Hazard::ramp(position)
        } else {
            Hazard::drone(position)
        };
        field.push(hazard);
        y += rng.random_range(250.0..650.0);
    }
    field
}

fn run_race(cli: &Cli) -> Result<RaceReport> {
    let seed = cli.seed.unwrap_or_else(rand::random);
    let layout = TrackLayout::default();
    let config = RaceConfig {
        level: cli.level,
        rng_seed: Some(seed),
        layout,
        ..RaceConfig::default()
    };
    let mut session = RaceSession::new(config)?;

    let mut harness_rng = SmallRng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15);
    let field = build_hazards(&layout, &mut harness_rng);
    info!(
        level = cli.level,
        seed,
        hazards = field.len(),
        rivals = cli.rivals,
        "track seeded"
    );
    session.hazards_mut().extend(field);

    // The player holds lane 1; rivals fill the remaining lanes, then stack
    // in rows behind the grid.
    let rival_lanes = [0usize, 2, 3];
    for index in 0..cli.rivals {
        let lane = layout.lanes[rival_lanes[index % rival_lanes.len()]];
        let row = (index / rival_lanes.len()) as f32;
        session.spawn_rival(Position::new(lane, -20.0 - row * 150.0));
    }

    let mut player = PlayerCar::new(&layout, cli.player_speed);
    let dt = session.dt();
    let mut player_finish_tick = None;
    let mut first_rival_finish_tick = None;
    let mut ticks = 0;

    for tick in 0..cli.max_ticks {
        ticks = tick + 1;
        player.step(dt, &layout, session.hazards_mut(), &mut harness_rng);
        if !player.finished && !player.wrecked && player.position.y >= layout.finish_line_y {
            player.finished = true;
            player.speed = 0.0;
            player_finish_tick = Some(tick);
            info!(tick, "player crossed the finish line");
        }

        session.set_target(Some(TargetState::new(player.position, player.speed)));
        let events = session.step();

        if let Some(drag) = events.target_drag {
            player.speed *= drag;
            debug!(tick, drag, "contact drag applied to the player");
        }
        for (id, state) in &events.transitions {
            info!(tick, rival = ?id, state = ?state, "rival lifecycle transition");
            if *state == RivalState::Finished && first_rival_finish_tick.is_none() {
                first_rival_finish_tick = Some(tick);
            }
        }

        let rivals_settled = session.rivals().all(|(_, rival)| rival.state().is_terminal());
        if rivals_settled && (player.finished || player.wrecked) {
            break;
        }
    }

    let winner = match (player_finish_tick, first_rival_finish_tick) {
        (Some(player_tick), Some(rival_tick)) if player_tick <= rival_tick => "player",
        (Some(_), Some(_)) | (None, Some(_)) => "rival",
        (Some(_), None) => "player",
        (None, None) => "nobody",
    };
    info!(winner, ticks, player_y = player.position.y, "race over");

    let rivals = session
        .rivals()
        .map(|(_, rival)| RivalReport {
            state: rival.state(),
            y: rival.position().y,
            speed: rival.current_speed(),
        })
        .collect();

    Ok(RaceReport {
        level: cli.level,
        seed,
        ticks,
        winner,
        player_finished: player.finished,
        player_wrecked: player.wrecked,
        player_lives: player.lives,
        player_y: player.position.y,
        rivals,
    })
}
