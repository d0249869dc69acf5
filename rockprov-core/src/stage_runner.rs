use crate::errors::StageResult;
use crate::report::{RunReport, StageRecord};

pub type StageFn<'a> = Box<dyn Fn(&mut StageRecord) -> StageResult + 'a>;

pub struct StageDefinition<'a> {
    pub name: &'static str,
    pub run: StageFn<'a>,
}

/// Runs stages strictly in order and stops at the first failure.
#[derive(Debug, Default)]
pub struct StageRunner;

impl StageRunner {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, stages: &[StageDefinition<'_>], report: &mut RunReport) -> StageResult {
        for stage in stages {
            log::info!("▶️  Stage {}", stage.name);
            let result = (stage.run)(report.stage_started(stage.name));
            match result {
                Ok(()) => {
                    report.stage_completed(stage.name);
                    log::info!("✅ Stage {} complete", stage.name);
                }
                Err(failure) => {
                    log::error!("❌ {}", failure);
                    report.stage_failed(&failure);
                    return Err(failure);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProvisionError, StageFailure};
    use std::sync::{Arc, Mutex};

    #[test]
    fn runner_halts_at_first_failure() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_a = calls.clone();
        let calls_b = calls.clone();
        let calls_c = calls.clone();

        let stages = vec![
            StageDefinition {
                name: "a",
                run: Box::new(move |record| {
                    calls_a.lock().unwrap().push("a");
                    record.step_completed("only");
                    Ok(())
                }),
            },
            StageDefinition {
                name: "b",
                run: Box::new(move |_| {
                    calls_b.lock().unwrap().push("b");
                    Err(StageFailure::new(
                        "b",
                        "Boom",
                        ProvisionError::Config("injected".into()),
                    ))
                }),
            },
            StageDefinition {
                name: "c",
                run: Box::new(move |_| {
                    calls_c.lock().unwrap().push("c");
                    Ok(())
                }),
            },
        ];

        let mut report = RunReport::new(false);
        let failure = StageRunner::new().run(&stages, &mut report).unwrap_err();

        assert_eq!(failure.stage, "b");
        assert_eq!(calls.lock().unwrap().as_slice(), &["a", "b"]);
        assert_eq!(report.completed_stages(), vec!["a"]);
        assert_eq!(report.stages[0].steps, vec!["only".to_string()]);
        assert_eq!(report.stages.len(), 2);
    }
}
