#![allow(dead_code)]

pub use rundag_test_utils::builders;
pub use rundag_test_utils::harness::Harness;
pub use rundag_test_utils::init_tracing;

use chrono::TimeDelta;

use rundag::engine::{CoreCommand, EngineConfig, SpeculationConfig};
use rundag::ids::AttemptId;
use rundag::state::AttemptState;

/// Engine config with speculation switched on and the default tunables.
pub fn speculation_config() -> EngineConfig {
    EngineConfig {
        speculation: SpeculationConfig {
            enabled: true,
            ..SpeculationConfig::default()
        },
        ..EngineConfig::default()
    }
}

/// Start `attempt`, let `secs` pass, then succeed it.
pub fn run_for(h: &mut Harness, attempt: AttemptId, secs: i64) {
    h.start(attempt);
    h.advance(TimeDelta::seconds(secs));
    h.succeed(attempt);
}

pub fn count_states(attempts: &[(AttemptId, AttemptState)], state: AttemptState) -> usize {
    attempts.iter().filter(|(_, s)| *s == state).count()
}

pub fn requested_in(commands: &[CoreCommand]) -> Vec<AttemptId> {
    commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::RequestWorker { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect()
}

pub fn cancelled_in(commands: &[CoreCommand]) -> Vec<AttemptId> {
    commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::CancelAttempt { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect()
}
