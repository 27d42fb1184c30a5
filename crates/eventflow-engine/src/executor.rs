//! Step execution state machine.
//!
//! Instances move `active -> {completed | error}`. Auto-action steps advance
//! through their first satisfied transition in a work-list loop; a step id seen
//! twice in one execution attempt is reported as a cycle instead of looping.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::actions::{ActionDispatcher, DeliveryContext};
use crate::condition::ConditionEvaluator;
use crate::error::{EngineError, EngineResult};
use crate::model::{InstanceStatus, Step, StepType, WorkflowDefinition, WorkflowInstance};
use crate::result::ActionResult;
use crate::store::WorkflowStore;

/// How an execution attempt stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// An auto-action step had no satisfied transition; instance completed.
    Completed,
    /// Stopped at a human task; instance stays active.
    AwaitingHumanTask { step_id: String },
    /// A referenced step does not exist; instance set to error.
    StepNotFound { step_id: String },
    /// A step was revisited within one attempt; instance set to error.
    CycleDetected { step_id: String },
}

/// Actions run for one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRun {
    pub step_id: String,
    pub results: Vec<ActionResult>,
}

/// Steps run during one execution attempt and where it stopped.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub steps: Vec<StepRun>,
    pub outcome: StepOutcome,
}

/// Instance snapshot after an execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub instance: WorkflowInstance,
    pub steps: Vec<StepRun>,
    pub outcome: StepOutcome,
}

/// Drives workflow instances through their step graph.
pub struct StepExecutor {
    store: Arc<dyn WorkflowStore>,
    dispatcher: ActionDispatcher,
    evaluator: ConditionEvaluator,
}

impl StepExecutor {
    /// Create a new step executor.
    pub fn new(store: Arc<dyn WorkflowStore>, dispatcher: ActionDispatcher) -> Self {
        Self {
            store,
            dispatcher,
            evaluator: ConditionEvaluator::new(),
        }
    }

    /// Create and persist a new active instance for a matched definition.
    ///
    /// Returns `None` when the definition has no steps.
    pub async fn create_instance(
        &self,
        definition: &WorkflowDefinition,
        payload: &Map<String, Value>,
    ) -> EngineResult<Option<WorkflowInstance>> {
        let entry = match definition.entry_step_id() {
            Some(entry) if !definition.steps.is_empty() => entry,
            _ => {
                tracing::warn!(workflow_id = %definition.id, "Workflow has no steps");
                return Ok(None);
            }
        };

        let instance = WorkflowInstance::new(&definition.id, entry, payload.clone());
        self.store.insert_instance(&instance).await?;

        tracing::debug!(
            workflow_id = %definition.id,
            instance_id = %instance.id,
            initial_step = %entry,
            "Workflow instance created"
        );

        Ok(Some(instance))
    }

    /// Create an instance and execute it from its initial step.
    ///
    /// `origin` is the delivering message id, used for action deduplication keys.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        payload: &Map<String, Value>,
        origin: Option<&str>,
    ) -> EngineResult<Option<ExecutionReport>> {
        let Some(mut instance) = self.create_instance(definition, payload).await? else {
            return Ok(None);
        };

        let entry = instance.current_step.clone().unwrap_or_default();
        let execution = self
            .execute_step(&mut instance, &definition.steps, &entry, origin)
            .await?;

        Ok(Some(ExecutionReport {
            instance,
            steps: execution.steps,
            outcome: execution.outcome,
        }))
    }

    /// Execute `step_id` and keep advancing through auto-action steps.
    ///
    /// Action failures are captured in the results; only store failures are
    /// returned as errors.
    pub async fn execute_step(
        &self,
        instance: &mut WorkflowInstance,
        steps: &[Step],
        step_id: &str,
        origin: Option<&str>,
    ) -> EngineResult<Execution> {
        let mut visited = HashSet::new();
        let mut runs = Vec::new();
        let mut next = step_id.to_string();

        loop {
            if !visited.insert(next.clone()) {
                tracing::error!(
                    workflow_id = %instance.workflow_id,
                    instance_id = %instance.id,
                    step_id = %next,
                    "Transition cycle detected"
                );
                self.fail_instance(instance).await?;
                return Ok(Execution {
                    steps: runs,
                    outcome: StepOutcome::CycleDetected { step_id: next },
                });
            }

            let Some(step) = steps.iter().find(|s| s.id == next) else {
                tracing::error!(
                    workflow_id = %instance.workflow_id,
                    instance_id = %instance.id,
                    step_id = %next,
                    "Step not found in workflow"
                );
                self.fail_instance(instance).await?;
                return Ok(Execution {
                    steps: runs,
                    outcome: StepOutcome::StepNotFound { step_id: next },
                });
            };

            let results = self.run_actions(instance, step, origin).await;

            instance.current_step = Some(step.id.clone());
            instance.touch();
            self.store.update_instance(instance).await?;
            runs.push(StepRun {
                step_id: step.id.clone(),
                results,
            });

            if step.step_type == StepType::HumanTask {
                tracing::debug!(
                    instance_id = %instance.id,
                    step_id = %step.id,
                    "Awaiting human task completion"
                );
                return Ok(Execution {
                    steps: runs,
                    outcome: StepOutcome::AwaitingHumanTask {
                        step_id: step.id.clone(),
                    },
                });
            }

            match self.next_step(step, &instance.context) {
                Some(to) => {
                    tracing::debug!(
                        instance_id = %instance.id,
                        from = %step.id,
                        to = %to,
                        "Advancing to next step"
                    );
                    next = to;
                }
                None => {
                    self.complete_instance(instance).await?;
                    return Ok(Execution {
                        steps: runs,
                        outcome: StepOutcome::Completed,
                    });
                }
            }
        }
    }

    /// Signal completion of the human task an instance is waiting on.
    ///
    /// `context_patch` is merged into the instance context before the task's
    /// transitions are evaluated.
    pub async fn complete_human_task(
        &self,
        instance_id: &str,
        context_patch: Map<String, Value>,
        origin: Option<&str>,
    ) -> EngineResult<ExecutionReport> {
        let mut instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("instance {}", instance_id)))?;

        if instance.status != InstanceStatus::Active {
            return Err(EngineError::InvalidState(format!(
                "instance {} is {}",
                instance.id, instance.status
            )));
        }

        let definition = self
            .store
            .get_definition(&instance.workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow {}", instance.workflow_id)))?;

        let current = instance.current_step.clone().unwrap_or_default();
        let step = definition
            .step(&current)
            .filter(|s| s.step_type == StepType::HumanTask)
            .ok_or_else(|| {
                EngineError::InvalidState(format!(
                    "instance {} is not waiting on a human task (current step: {})",
                    instance.id, current
                ))
            })?;

        if let Value::Object(context) = &mut instance.context {
            context.extend(context_patch);
        } else {
            instance.context = Value::Object(context_patch);
        }

        tracing::info!(
            instance_id = %instance.id,
            step_id = %step.id,
            "Human task completed"
        );

        let execution = match self.next_step(step, &instance.context) {
            Some(to) => {
                self.execute_step(&mut instance, &definition.steps, &to, origin)
                    .await?
            }
            None => {
                self.complete_instance(&mut instance).await?;
                Execution {
                    steps: Vec::new(),
                    outcome: StepOutcome::Completed,
                }
            }
        };

        Ok(ExecutionReport {
            instance,
            steps: execution.steps,
            outcome: execution.outcome,
        })
    }

    /// Run every action of a step; each result is isolated from the others.
    async fn run_actions(
        &self,
        instance: &WorkflowInstance,
        step: &Step,
        origin: Option<&str>,
    ) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(step.actions.len());

        for (index, action) in step.actions.iter().enumerate() {
            let delivery = origin.map(|message_id| DeliveryContext {
                message_id: message_id.to_string(),
                step_id: step.id.clone(),
                action_index: index,
            });

            let result = self
                .dispatcher
                .execute(action, &instance.context, delivery.as_ref())
                .await;

            tracing::debug!(
                instance_id = %instance.id,
                step_id = %step.id,
                action = %action.kind,
                status = %result.status,
                "Action executed"
            );

            results.push(result);
        }

        results
    }

    /// First transition whose condition is absent or holds.
    fn next_step(&self, step: &Step, context: &Value) -> Option<String> {
        step.transitions
            .iter()
            .find(|t| self.evaluator.evaluate(t.condition.as_ref(), context))
            .map(|t| t.to_step_id.clone())
    }

    async fn complete_instance(&self, instance: &mut WorkflowInstance) -> EngineResult<()> {
        instance.status = InstanceStatus::Completed;
        instance.touch();
        self.store.update_instance(instance).await
    }

    async fn fail_instance(&self, instance: &mut WorkflowInstance) -> EngineResult<()> {
        instance.status = InstanceStatus::Error;
        instance.touch();
        self.store.update_instance(instance).await
    }
}
