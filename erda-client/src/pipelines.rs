//! Pipeline-related API endpoints

use crate::PipelineClient;
use crate::error::Result;
use erda_core::dto::pipeline::{
    BatchCreateRequest, CancelPipelineRequest, CreatePipelineRequest, CreatePipelineRequestV2,
    OperatePipelineRequest, PagingRequest, PagingResponse, PipelineDetail, PipelineSummary,
    QuerySnippetRequest, QuerySnippetResponse, RerunPipelineRequest, RunPipelineRequest,
    StatisticRequest, StatisticResponse, TaskCallbackRequest, TaskDetail,
};

impl PipelineClient {
    // =============================================================================
    // Creation
    // =============================================================================

    /// Create a pipeline
    ///
    /// # Example
    /// ```no_run
    /// # use erda_client::PipelineClient;
    /// # use erda_core::dto::pipeline::CreatePipelineRequestV2;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = PipelineClient::new("http://localhost:3081");
    /// let pipeline = client.create_pipeline_v2(&CreatePipelineRequestV2 {
    ///     pipeline_yml: std::fs::read_to_string("pipeline.yml")?,
    ///     pipeline_source: "dice".to_string(),
    ///     cluster_name: "local".to_string(),
    ///     auto_run_at_once: true,
    ///     ..Default::default()
    /// }).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_pipeline_v2(&self, req: &CreatePipelineRequestV2) -> Result<PipelineSummary> {
        let url = format!("{}/api/v2/pipelines", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Create a pipeline through the legacy endpoint
    pub async fn create_pipeline(&self, req: &CreatePipelineRequest) -> Result<PipelineSummary> {
        let url = format!("{}/api/pipelines", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    pub async fn batch_create_pipelines(
        &self,
        req: &BatchCreateRequest,
    ) -> Result<Vec<PipelineSummary>> {
        let url = format!("{}/api/pipelines/batch", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Queries
    // =============================================================================

    /// Get a pipeline with its stages, tasks and buttons
    pub async fn get_pipeline(&self, pipeline_id: i64) -> Result<PipelineDetail> {
        let url = format!("{}/api/pipelines/{}", self.base_url, pipeline_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    pub async fn list_pipelines(&self, req: &PagingRequest) -> Result<PagingResponse> {
        let url = format!("{}/api/pipelines", self.base_url);
        let response = self.client.get(&url).query(req).send().await?;

        self.handle_response(response).await
    }

    pub async fn statistic(&self, req: &StatisticRequest) -> Result<StatisticResponse> {
        let url = format!("{}/api/pipelines/statistics", self.base_url);
        let response = self.client.get(&url).query(req).send().await?;

        self.handle_response(response).await
    }

    pub async fn get_task(&self, pipeline_id: i64, task_id: i64) -> Result<TaskDetail> {
        let url = format!(
            "{}/api/pipelines/{}/tasks/{}",
            self.base_url, pipeline_id, task_id
        );
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Params and outputs declared by a snippet yml
    pub async fn query_snippet_yml(&self, req: &QuerySnippetRequest) -> Result<QuerySnippetResponse> {
        let url = format!(
            "{}/api/pipelines/snippets/actions/query-snippet-yml",
            self.base_url
        );
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Lifecycle
    // =============================================================================

    pub async fn run_pipeline(&self, pipeline_id: i64, req: &RunPipelineRequest) -> Result<()> {
        let url = format!("{}/api/pipelines/{}/actions/run", self.base_url, pipeline_id);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    pub async fn cancel_pipeline(
        &self,
        pipeline_id: i64,
        req: &CancelPipelineRequest,
    ) -> Result<()> {
        let url = format!(
            "{}/api/pipelines/{}/actions/cancel",
            self.base_url, pipeline_id
        );
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    /// Rerun a finished pipeline. Returns the new pipeline.
    pub async fn rerun_pipeline(
        &self,
        pipeline_id: i64,
        req: &RerunPipelineRequest,
    ) -> Result<PipelineSummary> {
        let url = format!(
            "{}/api/pipelines/{}/actions/rerun",
            self.base_url, pipeline_id
        );
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Rerun only the failed tasks of a pipeline. Returns the new pipeline.
    pub async fn rerun_failed_pipeline(
        &self,
        pipeline_id: i64,
        req: &RerunPipelineRequest,
    ) -> Result<PipelineSummary> {
        let url = format!(
            "{}/api/pipelines/{}/actions/rerun-failed",
            self.base_url, pipeline_id
        );
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    pub async fn operate_pipeline(
        &self,
        pipeline_id: i64,
        req: &OperatePipelineRequest,
    ) -> Result<()> {
        let url = format!(
            "{}/api/pipelines/{}/actions/operate",
            self.base_url, pipeline_id
        );
        let response = self.client.put(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    pub async fn delete_pipeline(&self, pipeline_id: i64) -> Result<()> {
        let url = format!("{}/api/pipelines/{}", self.base_url, pipeline_id);
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Report an external task result
    pub async fn task_callback(&self, req: &TaskCallbackRequest) -> Result<()> {
        let url = format!("{}/api/pipelines/actions/callback", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }
}
