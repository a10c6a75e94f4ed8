//! `seed.flow`: deterministic outputs for exercising the pipeline end to end.

use edge_core::Args;

use crate::seed::{OperationSpec, Seed, SeedError, SeedFailure, SeedMetadata, SeedOutput};

pub const SEED_ID: &str = "seed.flow";

const EXIT_UNKNOWN_STEP: i32 = 2;
const EXIT_UNKNOWN_ACTION: i32 = 64;

#[derive(Clone, Copy, Debug, Default)]
pub struct FlowSeed;

impl FlowSeed {
    pub fn new() -> Self {
        Self
    }
}

impl Seed for FlowSeed {
    fn metadata(&self) -> SeedMetadata {
        SeedMetadata {
            id: SEED_ID.into(),
            name: "Flow".into(),
            description: "Deterministic control-flow seed".into(),
        }
    }

    fn operations(&self) -> Vec<OperationSpec> {
        vec![
            OperationSpec::idempotent("status", "deterministic health/status response"),
            OperationSpec::idempotent("echo", "deterministic argument echo"),
            OperationSpec::idempotent("step", "deterministic pseudo-step mapping"),
        ]
    }

    fn execute(&self, operation: &str, args: &Args) -> Result<SeedOutput, SeedFailure> {
        tracing::debug!(operation, args = args.len(), "seed.flow execute");
        match operation {
            "status" => Ok(SeedOutput::ok("flow status: ok\n")),
            "echo" => Ok(SeedOutput::ok(render_args(args))),
            "step" => {
                let name = args.get("name").map(|n| n.trim()).unwrap_or_default();
                match step_transition(name) {
                    Some(next) => Ok(SeedOutput::ok(format!("flow step: {name} -> {next}\n"))),
                    None => Err(SeedFailure::new(
                        SeedOutput::error("flow step: unknown", EXIT_UNKNOWN_STEP),
                        SeedError::UnknownStep {
                            name: name.to_string(),
                        },
                    )),
                }
            }
            other => Err(SeedFailure::new(
                SeedOutput::error(&format!("unknown action: {other}"), EXIT_UNKNOWN_ACTION),
                SeedError::UnknownAction {
                    seed: SEED_ID,
                    action: other.to_string(),
                },
            )),
        }
    }
}

fn step_transition(name: &str) -> Option<&'static str> {
    match name {
        "init" => Some("ready"),
        "plan" => Some("queued"),
        "apply" => Some("complete"),
        _ => None,
    }
}

fn render_args(args: &Args) -> String {
    if args.is_empty() {
        return "flow echo: {}\n".into();
    }
    let pairs: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("flow echo: {}\n", pairs.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::SeedStatus;

    fn args(pairs: &[(&str, &str)]) -> Args {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn status_is_fixed() {
        let out = FlowSeed.execute("status", &Args::new()).unwrap();
        assert_eq!(out.status, Some(SeedStatus::Ok));
        assert_eq!(&out.stdout[..], b"flow status: ok\n");
        assert_eq!(out.exit_code, 0);
    }

    #[test]
    fn echo_sorts_keys() {
        let out = FlowSeed
            .execute("echo", &args(&[("zeta", "1"), ("alpha", "2")]))
            .unwrap();
        assert_eq!(&out.stdout[..], b"flow echo: alpha=2,zeta=1\n");

        let empty = FlowSeed.execute("echo", &Args::new()).unwrap();
        assert_eq!(&empty.stdout[..], b"flow echo: {}\n");
    }

    #[test]
    fn steps_map_to_next_phase() {
        let cases = [
            ("init", "flow step: init -> ready\n"),
            (" plan ", "flow step: plan -> queued\n"),
            ("apply", "flow step: apply -> complete\n"),
        ];
        for (name, want) in cases {
            let out = FlowSeed.execute("step", &args(&[("name", name)])).unwrap();
            assert_eq!(String::from_utf8_lossy(&out.stdout), want);
        }
    }

    #[test]
    fn unknown_step_exits_two() {
        let failure = FlowSeed
            .execute("step", &args(&[("name", "deploy")]))
            .unwrap_err();
        assert_eq!(failure.output.exit_code, 2);
        assert_eq!(&failure.output.stderr[..], b"flow step: unknown\n");
        assert!(matches!(failure.error, SeedError::UnknownStep { name } if name == "deploy"));
    }

    #[test]
    fn unknown_action_exits_sixty_four() {
        let failure = FlowSeed.execute("explode", &Args::new()).unwrap_err();
        assert_eq!(failure.output.status, Some(SeedStatus::Error));
        assert_eq!(failure.output.exit_code, 64);
        assert_eq!(&failure.output.stderr[..], b"unknown action: explode\n");
    }
}
