//! Config management endpoints

use crate::PipelineClient;
use crate::error::Result;
use erda_core::dto::cms::{
    ConfigsResponse, DeleteConfigsRequest, GetConfigsRequest, UpdateConfigsRequest,
};

impl PipelineClient {
    /// Create or update configs of a namespace, creating the namespace if needed
    pub async fn update_configs(&self, ns: &str, req: &UpdateConfigsRequest) -> Result<()> {
        let response = self.client.post(self.configs_url(ns)).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    pub async fn get_configs(&self, ns: &str, req: &GetConfigsRequest) -> Result<ConfigsResponse> {
        let response = self
            .client
            .get(self.configs_url(ns))
            .query(req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn delete_configs(&self, ns: &str, req: &DeleteConfigsRequest) -> Result<()> {
        let response = self
            .client
            .delete(self.configs_url(ns))
            .query(req)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    fn configs_url(&self, ns: &str) -> String {
        format!("{}/api/pipelines/cms/ns/{}/configs", self.base_url, ns)
    }
}
