use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use slipstream_core::{Hazard, Position, RaceConfig, RaceSession, TargetState};
use std::time::Duration;

fn seeded_session(rivals: usize) -> RaceSession {
    let config = RaceConfig {
        rng_seed: Some(0xBEEF),
        level: 4,
        ..RaceConfig::default()
    };
    let mut session = RaceSession::new(config).expect("session");
    let lanes = session.config().layout.lanes;
    for index in 0..rivals {
        let lane = lanes[index % lanes.len()];
        let row = (index / lanes.len()) as f32;
        session.spawn_rival(Position::new(lane, -20.0 - row * 150.0));
    }
    let mut y = 400.0;
    let mut lane = 0usize;
    while y < 20_000.0 {
        session
            .hazards_mut()
            .push(Hazard::obstacle(Position::new(lanes[lane % 4], y)));
        session
            .hazards_mut()
            .push(Hazard::puddle(Position::new(lanes[(lane + 2) % 4], y + 200.0)));
        lane += 1;
        y += 400.0;
    }
    session
}

fn bench_session_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_step");
    group.sample_size(30);
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(8));
    let steps = 256usize;
    for &rivals in &[1usize, 4, 16] {
        group.bench_function(format!("steps{steps}_rivals{rivals}"), |b| {
            b.iter_batched(
                || seeded_session(rivals),
                |mut session| {
                    for tick in 0..steps {
                        let y = tick as f32 * 6.0;
                        session.set_target(Some(TargetState::new(Position::new(205.0, y), 6.0)));
                        session.step();
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_session_steps);
criterion_main!(benches);
