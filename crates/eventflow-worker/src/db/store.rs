//! PostgreSQL workflow store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventflow_engine::{EngineError, EngineResult, WorkflowDefinition, WorkflowInstance, WorkflowStore};
use serde_json::Value;
use sqlx::FromRow;

use super::DbPool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS workflow_definitions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        definition JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_instances (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        current_step TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        context JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_workflow_instances_workflow_id ON workflow_instances (workflow_id)",
];

#[derive(Debug, Clone, FromRow)]
struct DefinitionRow {
    id: String,
    name: String,
    is_active: bool,
    definition: Value,
}

impl DefinitionRow {
    fn into_definition(self) -> EngineResult<WorkflowDefinition> {
        WorkflowDefinition::from_parts(self.id, self.name, self.is_active, self.definition)
    }
}

/// Convert stored rows, dropping the ones that no longer parse.
///
/// A broken row never reaches the matcher, so its events go unhandled until
/// the definition is fixed.
fn valid_definitions(rows: Vec<DefinitionRow>) -> Vec<WorkflowDefinition> {
    let mut definitions = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id.clone();
        match row.into_definition() {
            Ok(definition) => definitions.push(definition),
            Err(e) => {
                tracing::error!(workflow_id = %id, error = %e, "Skipping invalid workflow definition");
            }
        }
    }
    definitions
}

#[derive(Debug, Clone, FromRow)]
struct InstanceRow {
    id: String,
    workflow_id: String,
    current_step: Option<String>,
    status: String,
    #[sqlx(default)]
    context: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InstanceRow {
    fn into_instance(self) -> EngineResult<WorkflowInstance> {
        Ok(WorkflowInstance {
            status: self.status.parse()?,
            id: self.id,
            workflow_id: self.workflow_id,
            current_step: self.current_step,
            context: self
                .context
                .unwrap_or_else(|| Value::Object(Default::default())),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn store_err(e: sqlx::Error) -> EngineError {
    EngineError::Store(e.to_string())
}

/// Workflow store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: DbPool,
}

impl PgWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create the workflow tables if they do not exist.
    pub async fn ensure_schema(&self) -> EngineResult<()> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn active_definitions(&self) -> EngineResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query_as::<_, DefinitionRow>(
            r#"
            SELECT id, name, is_active, definition
            FROM workflow_definitions
            WHERE is_active = TRUE
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(valid_definitions(rows))
    }

    async fn get_definition(&self, id: &str) -> EngineResult<Option<WorkflowDefinition>> {
        let row = sqlx::query_as::<_, DefinitionRow>(
            r#"
            SELECT id, name, is_active, definition
            FROM workflow_definitions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(DefinitionRow::into_definition).transpose()
    }

    async fn save_definition(&self, definition: &WorkflowDefinition) -> EngineResult<()> {
        let body = definition.body()?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, name, is_active, definition)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                is_active = EXCLUDED.is_active,
                definition = EXCLUDED.definition,
                updated_at = NOW()
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.name)
        .bind(definition.is_active)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn insert_instance(&self, instance: &WorkflowInstance) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_instances
                (id, workflow_id, current_step, status, context, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.workflow_id)
        .bind(&instance.current_step)
        .bind(instance.status.as_str())
        .bind(&instance.context)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET current_step = $2, status = $3, context = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.current_step)
        .bind(instance.status.as_str())
        .bind(&instance.context)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("instance {}", instance.id)));
        }

        Ok(())
    }

    async fn get_instance(&self, id: &str) -> EngineResult<Option<WorkflowInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT id, workflow_id, current_step, status, context, created_at, updated_at
            FROM workflow_instances
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(InstanceRow::into_instance).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventflow_engine::InstanceStatus;
    use serde_json::json;

    #[test]
    fn test_definition_row_conversion() {
        let row = DefinitionRow {
            id: "wf-1".to_string(),
            name: "Contact form".to_string(),
            is_active: true,
            definition: json!({
                "trigger": {"type": "form_submitted"},
                "initial_step_id": "s1",
                "steps": [{"id": "s1", "type": "auto_action"}]
            }),
        };

        let definition = row.into_definition().unwrap();
        assert_eq!(definition.trigger.event_type, "form_submitted");
        assert_eq!(definition.steps.len(), 1);
    }

    #[test]
    fn test_invalid_definition_row() {
        let row = DefinitionRow {
            id: "wf-bad".to_string(),
            name: "Broken".to_string(),
            is_active: true,
            definition: json!({"steps": "nope"}),
        };

        assert!(matches!(
            row.into_definition(),
            Err(EngineError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_invalid_rows_are_skipped() {
        let row = |id: &str, definition: Value| DefinitionRow {
            id: id.to_string(),
            name: id.to_string(),
            is_active: true,
            definition,
        };

        let definitions = valid_definitions(vec![
            row(
                "wf-bad-op",
                json!({
                    "trigger": {"type": "x", "conditions": {"path": "a", "op": "regex", "value": 1}},
                    "steps": [{"id": "s1", "type": "auto_action"}]
                }),
            ),
            row(
                "wf-ok",
                json!({
                    "trigger": {"type": "x"},
                    "steps": [{"id": "s1", "type": "auto_action"}]
                }),
            ),
            row(
                "wf-bad-step",
                json!({
                    "trigger": {"type": "x"},
                    "steps": [{"id": "s1", "type": "sometimes"}]
                }),
            ),
        ]);

        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].id, "wf-ok");
    }

    #[test]
    fn test_instance_row_conversion() {
        let now = Utc::now();
        let row = InstanceRow {
            id: "i-1".to_string(),
            workflow_id: "wf-1".to_string(),
            current_step: Some("s1".to_string()),
            status: "completed".to_string(),
            context: None,
            created_at: now,
            updated_at: now,
        };

        let instance = row.into_instance().unwrap();
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert_eq!(instance.context, json!({}));
    }

    #[test]
    fn test_instance_row_unknown_status() {
        let now = Utc::now();
        let row = InstanceRow {
            id: "i-1".to_string(),
            workflow_id: "wf-1".to_string(),
            current_step: None,
            status: "paused".to_string(),
            context: None,
            created_at: now,
            updated_at: now,
        };

        assert!(row.into_instance().is_err());
    }
}
