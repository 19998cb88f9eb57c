//! Handler Registry (spec §4.5): a closed `task_type -> handler` map,
//! validated against each handler's declared payload schema before a task
//! is ever handed to it.

use std::collections::HashMap;

use async_trait::async_trait;
use relaygrid_core::{OrchestratorError, Task};
use serde_json::Value;

/// One task type's business logic. Handlers report success/failure through
/// the return value rather than panicking; a panic is a worker bug, not a
/// handler business failure.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &str;

    /// JSON Schema the payload must satisfy before this handler ever sees
    /// it (spec §4.5 `register`). `None` means any payload is accepted.
    fn payload_schema(&self) -> Option<Value> {
        None
    }

    async fn handle(&self, task: &Task) -> Result<Value, OrchestratorError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn TaskHandler>) {
        self.handlers.insert(handler.task_type().to_string(), handler);
    }

    /// Validates `payload` against the registered handler's schema, if it
    /// declared one (spec §4.5, §6 ingress validation step).
    pub fn validate_payload(&self, task_type: &str, payload: &Value) -> Result<(), OrchestratorError> {
        let handler = self
            .handlers
            .get(task_type)
            .ok_or_else(|| OrchestratorError::UnknownTaskType(task_type.to_string()))?;

        let Some(schema) = handler.payload_schema() else {
            return Ok(());
        };

        let compiled = jsonschema::JSONSchema::compile(&schema).map_err(|e| {
            OrchestratorError::SchemaValidation {
                task_type: task_type.to_string(),
                reason: format!("invalid schema: {e}"),
            }
        })?;

        if let Err(errors) = compiled.validate(payload) {
            let reason = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(OrchestratorError::SchemaValidation {
                task_type: task_type.to_string(),
                reason,
            });
        }
        Ok(())
    }

    pub async fn dispatch(&self, task: &Task) -> Result<Value, OrchestratorError> {
        let handler = self
            .handlers
            .get(task.task_type.as_str())
            .ok_or_else(|| OrchestratorError::UnknownTaskType(task.task_type.clone()))?;
        handler.handle(task).await
    }

    pub fn is_registered(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        fn task_type(&self) -> &str {
            "echo"
        }

        fn payload_schema(&self) -> Option<Value> {
            Some(serde_json::json!({
                "type": "object",
                "required": ["message"],
                "properties": { "message": { "type": "string" } }
            }))
        }

        async fn handle(&self, task: &Task) -> Result<Value, OrchestratorError> {
            Ok(task.payload.clone())
        }
    }

    #[test]
    fn unregistered_task_type_is_rejected() {
        let registry = HandlerRegistry::new();
        let err = registry
            .validate_payload("nonexistent", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTaskType(_)));
    }

    #[test]
    fn payload_must_satisfy_declared_schema() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(EchoHandler));

        assert!(registry
            .validate_payload("echo", &serde_json::json!({"message": "hi"}))
            .is_ok());
        assert!(registry
            .validate_payload("echo", &serde_json::json!({"nope": 1}))
            .is_err());
    }

    #[tokio::test]
    async fn dispatch_invokes_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(EchoHandler));
        let task = Task::new("echo", serde_json::json!({"message": "hi"}));
        let result = registry.dispatch(&task).await.unwrap();
        assert_eq!(result, serde_json::json!({"message": "hi"}));
    }
}
