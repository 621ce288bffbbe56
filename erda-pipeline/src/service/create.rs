//! Pipeline creation
//!
//! Validates a create request, turns its labels into typed fields, builds
//! the pipeline graph and optionally starts the pipeline and its cron.

use chrono::DateTime;
use erda_core::domain::pipeline::{
    EnqueueCondition, Pipeline, PipelineType, QueueInfo, RerunFailedDetail, TriggerMode,
    UserIdentity, DEFAULT_PIPELINE_YML_NAME,
};
use erda_core::domain::status::PipelineStatus;
use erda_core::dto::pipeline::{
    BatchCreateRequest, CreatePipelineRequestV2, PipelineSummary, RunPipelineRequest,
};
use erda_core::labels::{
    LABEL_BIND_QUEUE_CUSTOM_PRIORITY, LABEL_BIND_QUEUE_ENQUEUE_CONDITION, LABEL_BIND_QUEUE_ID,
    LABEL_CREATE_USER_ID, LABEL_PIPELINE_CRON_ID, LABEL_PIPELINE_CRON_TRIGGER_TIME,
    LABEL_PIPELINE_TRIGGER_MODE, LABEL_PIPELINE_TYPE, MAX_INDEXED_LABEL_LEN,
};
use erda_core::yml::PipelineYml;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::repository::cron_repository;
use crate::service::error::{Result, ServiceError};
use crate::service::events::PipelineEvent;
use crate::service::pipeline::PipelineService;

const MAX_SOURCE_LEN: usize = 64;

impl PipelineService {
    /// Create a pipeline, on an edge cluster when the request targets one
    pub async fn create_v2(&self, mut req: CreatePipelineRequestV2) -> Result<PipelineSummary> {
        validate_create_request(&mut req)?;

        if self
            .edge
            .can_proxy_to_edge(&req.pipeline_source, &req.cluster_name)
        {
            let edge = self.edge.create(&req).await?;
            return self.record_edge_pipeline(&req, edge).await;
        }

        let p = self.create_local(req, None).await?;
        Ok(PipelineSummary::from(&p))
    }

    /// Create every request in order, stopping at the first failure
    pub async fn batch_create(&self, req: BatchCreateRequest) -> Result<Vec<PipelineSummary>> {
        if req.requests.is_empty() {
            return Err(ServiceError::MissingParameter("requests".to_string()));
        }
        let mut created = Vec::with_capacity(req.requests.len());
        for one in req.requests {
            created.push(self.create_v2(one).await?);
        }
        Ok(created)
    }

    /// Create a pipeline on this node. The request must already be validated.
    pub(crate) async fn create_local(
        &self,
        req: CreatePipelineRequestV2,
        rerun_failed: Option<RerunFailedDetail>,
    ) -> Result<Pipeline> {
        let yml = PipelineYml::parse(&req.pipeline_yml)?;
        let mut p = self.make_pipeline(&req, &yml).await?;
        p.extra.rerun_failed_detail = rerun_failed;

        let passed = self.registry.search_actions(&yml.action_keys()).await?;
        self.create_pipeline_graph(&mut p, &yml, &passed).await?;
        self.emit(PipelineEvent::instance_created(&p));

        info!(
            "Pipeline created: {} ({}/{}, type {})",
            p.id(),
            p.base.source,
            p.base.yml_name,
            p.base.pipeline_type.as_str()
        );

        let scope = self.cache.scope(p.id());
        scope.set_passed_data(p.id(), passed);

        if req.auto_run_at_once {
            let run = RunPipelineRequest {
                force_run: req.force_run,
                run_params: req.run_params,
                secrets: req.secrets,
                config_manage_namespaces: Vec::new(),
                identity: req.identity,
            };
            self.run_one_pipeline(&scope, &mut p, run).await?;
        }

        if req.auto_start_cron {
            match p.base.cron_id {
                Some(cron_id) => {
                    cron_repository::update_enable(&self.pool, cron_id, true).await?;
                    info!("Cron {} of pipeline {} started", cron_id, p.id());
                }
                None => warn!("pipeline {} has no cron to start", p.id()),
            }
        }

        Ok(p)
    }

    /// Build an unsaved `Analyzed` pipeline from a validated request
    async fn make_pipeline(
        &self,
        req: &CreatePipelineRequestV2,
        yml: &PipelineYml,
    ) -> Result<Pipeline> {
        let mut p = Pipeline::default();
        p.base.source = req.pipeline_source.clone();
        p.base.yml_name = req.pipeline_yml_name.clone();
        p.base.cluster_name = req.cluster_name.clone();
        p.base.status = PipelineStatus::Analyzed;
        p.base.is_snippet = req.is_snippet;
        p.base.parent_pipeline_id = req.parent_pipeline_id;
        p.base.parent_task_id = req.parent_task_id;
        p.base.is_edge = self.edge.is_edge();

        p.extra.pipeline_yml = req.pipeline_yml.clone();
        p.extra.namespace = req.namespace.clone().unwrap_or_default();
        p.extra.labels = req.labels.clone();
        p.extra.normal_labels = req.normal_labels.clone();
        if let Some(user_id) = req.identity.user_id.as_deref().filter(|u| !u.is_empty()) {
            p.extra
                .labels
                .insert(LABEL_CREATE_USER_ID.to_string(), user_id.to_string());
            p.extra.submit_user = Some(UserIdentity::new(user_id));
        }
        p.extra.internal_client = req.identity.internal_client.clone();
        p.extra.snapshot.envs = req.envs.clone();
        p.extra.snapshot.run_params = req.run_params.clone();
        p.extra.snapshot.defined_outputs = yml.outputs.clone();
        p.extra.task_operates = req.task_operates.clone();
        p.extra.snippet_chain = req.snippet_chain.clone();
        p.extra.incoming_secrets = req.secrets.clone();
        p.extra.config_manage_namespaces = req.config_manage_namespaces.clone();
        p.extra.cron_expr = yml.cron.clone();
        p.extra.enable_local_storage = yml
            .storage
            .as_ref()
            .and_then(|s| s.context.as_deref())
            == Some("local");
        p.extra.gc = req.gc.clone().unwrap_or_default();
        p.ensure_gc(&self.gc_defaults);

        let labels = p.merged_labels();
        apply_labels(&mut p, &labels)?;

        if let Some(cron_id) = p.base.cron_id {
            let cron = cron_repository::find_by_id(&self.pool, cron_id)
                .await?
                .ok_or(ServiceError::NotFoundPipelineCron(cron_id))?;
            p.extra.cron_expr = Some(cron.cron_expr);
        }

        Ok(p)
    }
}

/// Check required fields, fill defaults and move oversized labels out of the
/// index
pub fn validate_create_request(req: &mut CreatePipelineRequestV2) -> Result<()> {
    if req.pipeline_yml.trim().is_empty() {
        return Err(ServiceError::MissingParameter("pipelineYml".to_string()));
    }
    if req.cluster_name.trim().is_empty() {
        return Err(ServiceError::MissingParameter("clusterName".to_string()));
    }
    if req.pipeline_yml_name.trim().is_empty() {
        req.pipeline_yml_name = DEFAULT_PIPELINE_YML_NAME.to_string();
    }
    if req.pipeline_source.is_empty() {
        return Err(ServiceError::MissingParameter("pipelineSource".to_string()));
    }
    if !is_valid_source(&req.pipeline_source) {
        return Err(ServiceError::InvalidParameter(format!(
            "source: {}",
            req.pipeline_source
        )));
    }
    if req.identity.is_empty() {
        return Err(ServiceError::MissingParameter("identity".to_string()));
    }

    let oversized: Vec<String> = req
        .labels
        .iter()
        .filter(|(k, v)| k.len() > MAX_INDEXED_LABEL_LEN || v.len() > MAX_INDEXED_LABEL_LEN)
        .map(|(k, _)| k.clone())
        .collect();
    for key in oversized {
        if let Some(value) = req.labels.remove(&key) {
            warn!("label {} is too long to be indexed, moved to normal labels", key);
            req.normal_labels.insert(key, value);
        }
    }

    parse_queue(&req.labels)?;
    Ok(())
}

fn is_valid_source(source: &str) -> bool {
    source.len() <= MAX_SOURCE_LEN
        && source
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

/// Copy the well-known labels into typed pipeline fields
fn apply_labels(p: &mut Pipeline, labels: &BTreeMap<String, String>) -> Result<()> {
    if let Some(v) = labels.get(LABEL_PIPELINE_TYPE) {
        match PipelineType::parse(v) {
            Some(t) => p.base.pipeline_type = t,
            None => warn!("ignored unknown {} label: {}", LABEL_PIPELINE_TYPE, v),
        }
    }

    if let Some(v) = labels.get(LABEL_PIPELINE_TRIGGER_MODE) {
        match TriggerMode::parse(v) {
            Some(mode) => p.base.trigger_mode = mode,
            None => warn!("ignored unknown {} label: {}", LABEL_PIPELINE_TRIGGER_MODE, v),
        }
    }

    if let Some(v) = labels.get(LABEL_PIPELINE_CRON_TRIGGER_TIME) {
        let nanos: i64 = v.parse().map_err(|_| {
            ServiceError::InvalidParameter(format!("{LABEL_PIPELINE_CRON_TRIGGER_TIME}: {v}"))
        })?;
        p.extra.cron_trigger_time = Some(DateTime::from_timestamp_nanos(nanos));
    }

    if let Some(v) = labels.get(LABEL_PIPELINE_CRON_ID) {
        let cron_id: i64 = v.parse().map_err(|_| {
            ServiceError::InvalidParameter(format!("{LABEL_PIPELINE_CRON_ID}: {v}"))
        })?;
        p.base.cron_id = Some(cron_id);
    }

    p.extra.queue = parse_queue(labels)?;
    Ok(())
}

/// Queue binding declared through labels, `None` when unbound
fn parse_queue(labels: &BTreeMap<String, String>) -> Result<Option<QueueInfo>> {
    let Some(raw_id) = labels.get(LABEL_BIND_QUEUE_ID) else {
        return Ok(None);
    };
    let queue_id: i64 = raw_id.trim().parse().map_err(|_| {
        ServiceError::InvalidParameter(format!("failed to parse bindQueueID: {raw_id}"))
    })?;

    let custom_priority = match labels.get(LABEL_BIND_QUEUE_CUSTOM_PRIORITY) {
        Some(v) => v.trim().parse().map_err(|_| {
            ServiceError::InvalidParameter(format!("failed to parse queue priority: {v}"))
        })?,
        None => 0,
    };

    let enqueue_condition = labels
        .get(LABEL_BIND_QUEUE_ENQUEUE_CONDITION)
        .and_then(|v| EnqueueCondition::parse(v));

    Ok(Some(QueueInfo {
        queue_id,
        custom_priority,
        enqueue_condition,
    }))
}
