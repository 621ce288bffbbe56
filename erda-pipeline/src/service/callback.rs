//! Task callbacks
//!
//! Actions report metadata and errors back to the service once they run.
//! Reports accumulate in the task result; a field reported twice keeps the
//! latest value.

use erda_core::domain::task::TaskResult;
use erda_core::dto::pipeline::TaskCallbackRequest;

use crate::repository::task_repository;
use crate::service::error::{Result, ServiceError};
use crate::service::pipeline::PipelineService;

impl PipelineService {
    pub async fn task_callback(&self, req: TaskCallbackRequest) -> Result<()> {
        if req.task_id <= 0 {
            return Err(ServiceError::MissingParameter("taskID".to_string()));
        }
        let task = task_repository::find_by_id(&self.pool, req.task_id)
            .await?
            .filter(|t| req.pipeline_id <= 0 || t.pipeline_id == req.pipeline_id)
            .ok_or_else(|| ServiceError::not_found(format!("task {}", req.task_id)))?;

        let mut result = task.result.unwrap_or_default();
        merge_callback(&mut result, req);
        task_repository::update_result(&self.pool, task.id, &result).await?;

        tracing::debug!(
            "Task {} result now has {} metadata field(s) and {} error(s)",
            task.id,
            result.metadata.len(),
            result.errors.len()
        );
        Ok(())
    }
}

fn merge_callback(result: &mut TaskResult, req: TaskCallbackRequest) {
    for field in req.metadata {
        match result.metadata.iter_mut().find(|m| m.name == field.name) {
            Some(existing) => *existing = field,
            None => result.metadata.push(field),
        }
    }
    for err in req.errors {
        if !result.errors.iter().any(|e| e.msg == err.msg) {
            result.errors.push(err);
        }
    }
}
