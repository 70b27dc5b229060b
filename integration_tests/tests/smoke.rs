mod common;

use corruption_sim::{build_headless_app, current_tick, run_tick, CorruptionState};

#[test]
fn app_initializes() {
    common::ensure_test_config();
    let mut app = build_headless_app();
    // run a single update tick to ensure schedule executes without panic
    run_tick(&mut app);
    assert_eq!(current_tick(&app), 1);
    assert_eq!(app.world.resource::<CorruptionState>().total_progress(), 0);
}

#[test]
fn ticks_advance_monotonically() {
    common::ensure_test_config();
    let mut app = build_headless_app();
    for expected in 1..=20 {
        run_tick(&mut app);
        assert_eq!(current_tick(&app), expected);
    }
}
