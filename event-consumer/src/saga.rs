use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tracing::{error, info};

type StepFn = Box<dyn Fn() -> BoxFuture<'static, Result<(), anyhow::Error>> + Send + Sync>;

/// A multi-step operation with per-step compensation.
///
/// Steps run in registration order. When a step fails, the compensations
/// of the steps that already succeeded run in reverse order; the failed
/// step itself is not compensated. Compensation errors are logged and do
/// not stop the remaining rollback.
pub struct Saga {
    steps: Vec<SagaStep>,
}

struct SagaStep {
    name: String,
    run: StepFn,
    compensate: StepFn,
}

#[derive(Debug, Error)]
#[error("saga step '{step}' failed: {source}")]
pub struct SagaError {
    pub step: String,
    #[source]
    pub source: anyhow::Error,
}

impl Saga {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn step<R, RFut, C, CFut>(mut self, name: &str, run: R, compensate: C) -> Self
    where
        R: Fn() -> RFut + Send + Sync + 'static,
        RFut: std::future::Future<Output = Result<(), anyhow::Error>> + Send + 'static,
        C: Fn() -> CFut + Send + Sync + 'static,
        CFut: std::future::Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.steps.push(SagaStep {
            name: name.to_string(),
            run: Box::new(move || run().boxed()),
            compensate: Box::new(move || compensate().boxed()),
        });
        self
    }

    pub async fn run(self) -> Result<(), SagaError> {
        let mut completed: Vec<&SagaStep> = Vec::new();

        for step in &self.steps {
            match (step.run)().await {
                Ok(()) => completed.push(step),
                Err(source) => {
                    info!(
                        step = %step.name,
                        completed = completed.len(),
                        "saga step failed, rolling back"
                    );
                    for done in completed.iter().rev() {
                        if let Err(err) = (done.compensate)().await {
                            error!(
                                step = %done.name,
                                %err,
                                "saga compensation failed, continuing rollback"
                            );
                        }
                    }
                    return Err(SagaError {
                        step: step.name.clone(),
                        source,
                    });
                }
            }
        }

        Ok(())
    }
}

impl Default for Saga {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let push = {
            let log = log.clone();
            move |entry: &'static str| log.lock().unwrap().push(entry.to_string())
        };
        (log, push)
    }

    #[tokio::test]
    async fn all_steps_run_in_order_on_success() {
        let (log, push) = recorder();

        let saga = Saga::new()
            .step(
                "reserve",
                {
                    let push = push.clone();
                    move || {
                        push("reserve");
                        async { Ok(()) }
                    }
                },
                || async { Ok(()) },
            )
            .step(
                "charge",
                {
                    let push = push.clone();
                    move || {
                        push("charge");
                        async { Ok(()) }
                    }
                },
                || async { Ok(()) },
            );

        saga.run().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["reserve", "charge"]);
    }

    #[tokio::test]
    async fn failure_rolls_back_completed_steps_in_reverse() {
        let (log, push) = recorder();

        let saga = Saga::new()
            .step(
                "reserve",
                || async { Ok(()) },
                {
                    let push = push.clone();
                    move || {
                        push("undo-reserve");
                        async { Ok(()) }
                    }
                },
            )
            .step(
                "charge",
                || async { Ok(()) },
                {
                    let push = push.clone();
                    move || {
                        push("undo-charge");
                        async { Ok(()) }
                    }
                },
            )
            .step(
                "ship",
                || async { Err(anyhow::anyhow!("no trucks")) },
                {
                    let push = push.clone();
                    move || {
                        push("undo-ship");
                        async { Ok(()) }
                    }
                },
            );

        let err = saga.run().await.unwrap_err();
        assert_eq!(err.step, "ship");
        // The failed step is not compensated; earlier steps unwind newest-first
        assert_eq!(*log.lock().unwrap(), vec!["undo-charge", "undo-reserve"]);
    }

    #[tokio::test]
    async fn success_never_triggers_rollback() {
        let (log, push) = recorder();

        let saga = Saga::new().step(
            "only",
            || async { Ok(()) },
            {
                let push = push.clone();
                move || {
                    push("undo-only");
                    async { Ok(()) }
                }
            },
        );

        saga.run().await.unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn compensation_errors_do_not_stop_the_rollback() {
        let (log, push) = recorder();

        let saga = Saga::new()
            .step(
                "first",
                || async { Ok(()) },
                {
                    let push = push.clone();
                    move || {
                        push("undo-first");
                        async { Ok(()) }
                    }
                },
            )
            .step(
                "second",
                || async { Ok(()) },
                || async { Err(anyhow::anyhow!("undo exploded")) },
            )
            .step("third", || async { Err(anyhow::anyhow!("boom")) }, || async {
                Ok(())
            });

        let err = saga.run().await.unwrap_err();
        assert_eq!(err.step, "third");
        assert_eq!(*log.lock().unwrap(), vec!["undo-first"]);
    }
}
