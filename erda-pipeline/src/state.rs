//! Application state shared by every handler

use std::sync::Arc;

use crate::service::{CmsService, PipelineService};

#[derive(Clone)]
pub struct AppState {
    pub pipelines: Arc<PipelineService>,
    pub cms: CmsService,
}

impl AppState {
    pub fn new(pipelines: PipelineService, cms: CmsService) -> Self {
        Self {
            pipelines: Arc::new(pipelines),
            cms,
        }
    }
}
