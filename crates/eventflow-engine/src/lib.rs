//! EventFlow Engine
//!
//! Event-triggered workflow automation core.
//!
//! This crate provides:
//! - Workflow definition and instance model
//! - Condition evaluation over nested JSON contexts
//! - Trigger matching of events against active definitions
//! - Action dispatch (email, ticket/task/webhook intents)
//! - Step execution state machine with human-task pauses
//! - Workflow store abstraction with an in-memory implementation

pub mod actions;
pub mod condition;
pub mod context;
pub mod error;
pub mod executor;
pub mod matcher;
pub mod model;
pub mod result;
pub mod store;

pub use actions::{ActionDispatcher, DeliveryContext, EmailMessage, EmailTransport, TransportError};
pub use condition::ConditionEvaluator;
pub use error::{EngineError, EngineResult};
pub use executor::{Execution, ExecutionReport, StepExecutor, StepOutcome, StepRun};
pub use matcher::WorkflowMatcher;
pub use model::{
    Action, ActionKind, Condition, Event, InstanceStatus, Operator, Step, StepType, Transition,
    Trigger, WorkflowDefinition, WorkflowInstance,
};
pub use result::{ActionResult, ActionStatus};
pub use store::{InMemoryWorkflowStore, WorkflowStore};
