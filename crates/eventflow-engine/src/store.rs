//! Workflow store collaborator.
//!
//! The store only keeps definitions and instances on the engine's behalf; it
//! never initiates workflow logic.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::EngineResult;
use crate::model::{WorkflowDefinition, WorkflowInstance};

/// Create/read/update access to definitions and instances.
///
/// Implementations need single-row atomicity only.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// All definitions with `is_active == true`, in a stable order.
    async fn active_definitions(&self) -> EngineResult<Vec<WorkflowDefinition>>;

    /// Fetch a definition by id.
    async fn get_definition(&self, id: &str) -> EngineResult<Option<WorkflowDefinition>>;

    /// Insert or replace a definition.
    async fn save_definition(&self, definition: &WorkflowDefinition) -> EngineResult<()>;

    /// Persist a newly created instance.
    async fn insert_instance(&self, instance: &WorkflowInstance) -> EngineResult<()>;

    /// Persist the current state of an existing instance.
    async fn update_instance(&self, instance: &WorkflowInstance) -> EngineResult<()>;

    /// Fetch an instance by id.
    async fn get_instance(&self, id: &str) -> EngineResult<Option<WorkflowInstance>>;
}

/// In-memory store for tests and single-process runs.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    definitions: RwLock<Vec<WorkflowDefinition>>,
    instances: RwLock<HashMap<String, WorkflowInstance>>,
}

impl InMemoryWorkflowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with definitions.
    pub fn with_definitions(definitions: Vec<WorkflowDefinition>) -> Self {
        Self {
            definitions: RwLock::new(definitions),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of all instances.
    pub fn instances(&self) -> Vec<WorkflowInstance> {
        self.instances.read().values().cloned().collect()
    }

    /// Number of stored instances.
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn active_definitions(&self) -> EngineResult<Vec<WorkflowDefinition>> {
        Ok(self
            .definitions
            .read()
            .iter()
            .filter(|d| d.is_active)
            .cloned()
            .collect())
    }

    async fn get_definition(&self, id: &str) -> EngineResult<Option<WorkflowDefinition>> {
        Ok(self.definitions.read().iter().find(|d| d.id == id).cloned())
    }

    async fn save_definition(&self, definition: &WorkflowDefinition) -> EngineResult<()> {
        let mut definitions = self.definitions.write();
        match definitions.iter_mut().find(|d| d.id == definition.id) {
            Some(existing) => *existing = definition.clone(),
            None => definitions.push(definition.clone()),
        }
        Ok(())
    }

    async fn insert_instance(&self, instance: &WorkflowInstance) -> EngineResult<()> {
        self.instances
            .write()
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> EngineResult<()> {
        self.instances
            .write()
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> EngineResult<Option<WorkflowInstance>> {
        Ok(self.instances.read().get(id).cloned())
    }
}
