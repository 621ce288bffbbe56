//! Edge pipeline proxy
//!
//! A center node forwards pipeline verbs to the pipeline service of an edge
//! cluster when the pipeline's source is edge-eligible and its cluster is a
//! registered edge.
//!
//! A pipeline created on an edge is mirrored by a center row with `is_edge`
//! set and the edge-side ID in its extra. Later verbs address the mirror by
//! its center ID and are forwarded with the edge ID.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use erda_client::PipelineClient;
use erda_core::domain::pipeline::{Pipeline, UserIdentity};
use erda_core::domain::status::PipelineStatus;
use erda_core::dto::pipeline::{
    CancelPipelineRequest, CreatePipelineRequestV2, PipelineSummary, RerunPipelineRequest,
    RunPipelineRequest,
};

use crate::config::{Config, NodeRole};
use crate::repository::pipeline_repository;
use crate::service::error::{Result, ServiceError};
use crate::service::pipeline::PipelineService;

/// Pipeline verbs an edge cluster serves
#[async_trait]
pub trait EdgeClient: Send + Sync {
    async fn create(&self, req: &CreatePipelineRequestV2) -> erda_client::Result<PipelineSummary>;

    async fn run(&self, pipeline_id: i64, req: &RunPipelineRequest) -> erda_client::Result<()>;

    async fn cancel(
        &self,
        pipeline_id: i64,
        req: &CancelPipelineRequest,
    ) -> erda_client::Result<()>;

    async fn rerun(
        &self,
        pipeline_id: i64,
        req: &RerunPipelineRequest,
    ) -> erda_client::Result<PipelineSummary>;

    async fn rerun_failed(
        &self,
        pipeline_id: i64,
        req: &RerunPipelineRequest,
    ) -> erda_client::Result<PipelineSummary>;
}

#[async_trait]
impl EdgeClient for PipelineClient {
    async fn create(&self, req: &CreatePipelineRequestV2) -> erda_client::Result<PipelineSummary> {
        self.create_pipeline_v2(req).await
    }

    async fn run(&self, pipeline_id: i64, req: &RunPipelineRequest) -> erda_client::Result<()> {
        self.run_pipeline(pipeline_id, req).await
    }

    async fn cancel(
        &self,
        pipeline_id: i64,
        req: &CancelPipelineRequest,
    ) -> erda_client::Result<()> {
        self.cancel_pipeline(pipeline_id, req).await
    }

    async fn rerun(
        &self,
        pipeline_id: i64,
        req: &RerunPipelineRequest,
    ) -> erda_client::Result<PipelineSummary> {
        self.rerun_pipeline(pipeline_id, req).await
    }

    async fn rerun_failed(
        &self,
        pipeline_id: i64,
        req: &RerunPipelineRequest,
    ) -> erda_client::Result<PipelineSummary> {
        self.rerun_failed_pipeline(pipeline_id, req).await
    }
}

pub struct EdgeProxy {
    role: NodeRole,
    sources: HashSet<String>,
    clients: HashMap<String, Arc<dyn EdgeClient>>,
}

impl EdgeProxy {
    pub fn new(
        role: NodeRole,
        sources: HashSet<String>,
        clients: HashMap<String, Arc<dyn EdgeClient>>,
    ) -> Self {
        Self {
            role,
            sources,
            clients,
        }
    }

    /// Build one client per registered edge cluster, sharing the bundle timeout
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.edge_bundle_timeout)
            .build()?;

        let clients = config
            .edge_clusters
            .iter()
            .map(|(cluster, url)| {
                let client: Arc<dyn EdgeClient> =
                    Arc::new(PipelineClient::with_client(url, http.clone()));
                (cluster.clone(), client)
            })
            .collect();

        Ok(Self::new(config.role, config.edge_sources.clone(), clients))
    }

    /// A proxy that never forwards
    pub fn disabled() -> Self {
        Self::new(NodeRole::Standalone, HashSet::new(), HashMap::new())
    }

    pub fn is_edge(&self) -> bool {
        self.role == NodeRole::Edge
    }

    pub fn can_proxy_to_edge(&self, source: &str, cluster_name: &str) -> bool {
        self.role == NodeRole::Center
            && self.sources.contains(source)
            && self.clients.contains_key(cluster_name)
    }

    /// Edge-side ID of a mirrored pipeline, `None` for a pipeline living here
    ///
    /// A mirror whose cluster is no longer a registered edge is never run
    /// locally.
    pub fn edge_id_of(&self, p: &Pipeline) -> Result<Option<i64>> {
        let Some(edge_id) = p.extra.edge_pipeline_id else {
            return Ok(None);
        };
        if !self.can_proxy_to_edge(&p.base.source, &p.base.cluster_name) {
            return Err(ServiceError::InvalidState(format!(
                "pipeline {} lives on edge cluster {}, which is not reachable from here",
                p.id(),
                p.base.cluster_name
            )));
        }
        Ok(Some(edge_id))
    }

    fn client(&self, cluster_name: &str) -> Result<&Arc<dyn EdgeClient>> {
        self.clients.get(cluster_name).ok_or_else(|| {
            ServiceError::InvalidParameter(format!("cluster {cluster_name} is not an edge cluster"))
        })
    }

    pub async fn create(&self, req: &CreatePipelineRequestV2) -> Result<PipelineSummary> {
        tracing::info!(
            "Forwarding create of {}/{} to edge cluster {}",
            req.pipeline_source,
            req.pipeline_yml_name,
            req.cluster_name
        );
        Ok(self.client(&req.cluster_name)?.create(req).await?)
    }

    pub async fn run(
        &self,
        cluster_name: &str,
        edge_id: i64,
        req: &RunPipelineRequest,
    ) -> Result<()> {
        tracing::info!(
            "Forwarding run of pipeline {} to edge cluster {}",
            edge_id,
            cluster_name
        );
        Ok(self.client(cluster_name)?.run(edge_id, req).await?)
    }

    pub async fn cancel(
        &self,
        cluster_name: &str,
        edge_id: i64,
        req: &CancelPipelineRequest,
    ) -> Result<()> {
        tracing::info!(
            "Forwarding cancel of pipeline {} to edge cluster {}",
            edge_id,
            cluster_name
        );
        Ok(self.client(cluster_name)?.cancel(edge_id, req).await?)
    }

    pub async fn rerun(
        &self,
        cluster_name: &str,
        edge_id: i64,
        req: &RerunPipelineRequest,
    ) -> Result<PipelineSummary> {
        tracing::info!(
            "Forwarding rerun of pipeline {} to edge cluster {}",
            edge_id,
            cluster_name
        );
        Ok(self.client(cluster_name)?.rerun(edge_id, req).await?)
    }

    pub async fn rerun_failed(
        &self,
        cluster_name: &str,
        edge_id: i64,
        req: &RerunPipelineRequest,
    ) -> Result<PipelineSummary> {
        tracing::info!(
            "Forwarding rerun-failed of pipeline {} to edge cluster {}",
            edge_id,
            cluster_name
        );
        Ok(self.client(cluster_name)?.rerun_failed(edge_id, req).await?)
    }
}

// =============================================================================
// Mirrors
// =============================================================================

impl PipelineService {
    /// Persist the center mirror of a pipeline an edge created from `req`,
    /// returning the summary under the mirror's ID
    pub(crate) async fn record_edge_pipeline(
        &self,
        req: &CreatePipelineRequestV2,
        edge: PipelineSummary,
    ) -> Result<PipelineSummary> {
        let mut p = mirror_of(req, &edge);
        p.ensure_gc(&self.gc_defaults);

        let mut conn = self.pool.acquire().await?;
        if let Err(e) = pipeline_repository::insert(&mut conn, &mut p).await {
            tracing::error!(
                "[alert] failed to mirror pipeline {} of edge cluster {}: {}",
                edge.id,
                edge.cluster_name,
                e
            );
            return Err(e.into());
        }

        tracing::info!(
            "Pipeline {} mirrors pipeline {} of edge cluster {}",
            p.id(),
            edge.id,
            edge.cluster_name
        );
        Ok(PipelineSummary::from(&p))
    }

    /// Record a status the edge accepted on the mirror
    pub(crate) async fn set_mirror_status(
        &self,
        p: &mut Pipeline,
        status: PipelineStatus,
    ) -> Result<()> {
        pipeline_repository::update_status(&self.pool, p.id(), status).await?;
        p.base.status = status;
        Ok(())
    }
}

/// Unsaved center row standing for an edge pipeline
fn mirror_of(req: &CreatePipelineRequestV2, edge: &PipelineSummary) -> Pipeline {
    let mut p = Pipeline::default();
    p.base.source = edge.source.clone();
    p.base.yml_name = edge.yml_name.clone();
    p.base.cluster_name = edge.cluster_name.clone();
    p.base.status = edge.status;
    p.base.pipeline_type = edge.pipeline_type;
    p.base.trigger_mode = edge.trigger_mode;
    p.base.is_snippet = edge.is_snippet;
    p.base.is_edge = true;
    p.base.progress = edge.progress;
    p.base.time_begin = edge.time_begin;
    p.base.time_end = edge.time_end;
    p.base.created_at = edge.created_at;
    p.base.updated_at = Utc::now();

    p.extra.edge_pipeline_id = Some(edge.id);
    p.extra.pipeline_yml = req.pipeline_yml.clone();
    p.extra.labels = edge.labels.clone();
    p.extra.normal_labels = req.normal_labels.clone();
    p.extra.submit_user = req
        .identity
        .user_id
        .as_deref()
        .filter(|u| !u.is_empty())
        .map(UserIdentity::new);
    p.extra.internal_client = req.identity.internal_client.clone();
    p.extra.gc = req.gc.clone().unwrap_or_default();
    p
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Edge double recording every forwarded call as `verb:id`
    #[derive(Default)]
    pub(crate) struct RecordingEdge {
        pub calls: Mutex<Vec<String>>,
        pub next_id: i64,
    }

    impl RecordingEdge {
        pub(crate) fn new(next_id: i64) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                next_id,
            })
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn summary(&self, source: &str, cluster_name: &str) -> PipelineSummary {
            let mut p = Pipeline::default();
            p.base.id = self.next_id;
            p.base.source = source.to_string();
            p.base.cluster_name = cluster_name.to_string();
            PipelineSummary::from(&p)
        }
    }

    #[async_trait]
    impl EdgeClient for RecordingEdge {
        async fn create(
            &self,
            req: &CreatePipelineRequestV2,
        ) -> erda_client::Result<PipelineSummary> {
            self.record(format!("create:{}", req.pipeline_source));
            Ok(self.summary(&req.pipeline_source, &req.cluster_name))
        }

        async fn run(&self, pipeline_id: i64, _: &RunPipelineRequest) -> erda_client::Result<()> {
            self.record(format!("run:{pipeline_id}"));
            Ok(())
        }

        async fn cancel(
            &self,
            pipeline_id: i64,
            _: &CancelPipelineRequest,
        ) -> erda_client::Result<()> {
            self.record(format!("cancel:{pipeline_id}"));
            Ok(())
        }

        async fn rerun(
            &self,
            pipeline_id: i64,
            _: &RerunPipelineRequest,
        ) -> erda_client::Result<PipelineSummary> {
            self.record(format!("rerun:{pipeline_id}"));
            Ok(self.summary("edge-app", "edge-1"))
        }

        async fn rerun_failed(
            &self,
            pipeline_id: i64,
            _: &RerunPipelineRequest,
        ) -> erda_client::Result<PipelineSummary> {
            self.record(format!("rerun-failed:{pipeline_id}"));
            Ok(self.summary("edge-app", "edge-1"))
        }
    }

    pub(crate) fn center_proxy(edge: Arc<RecordingEdge>) -> EdgeProxy {
        let client: Arc<dyn EdgeClient> = edge;
        EdgeProxy::new(
            NodeRole::Center,
            HashSet::from(["edge-app".to_string()]),
            HashMap::from([("edge-1".to_string(), client)]),
        )
    }

    fn config(role: NodeRole) -> Config {
        let mut config = Config::default();
        config.role = role;
        config
            .edge_clusters
            .insert("edge-1".into(), "http://edge-1:3081".into());
        config.edge_sources.insert("edge-app".into());
        config
    }

    fn mirror(center_id: i64, edge_id: i64, cluster_name: &str) -> Pipeline {
        let mut p = Pipeline::default();
        p.base.id = center_id;
        p.base.source = "edge-app".into();
        p.base.cluster_name = cluster_name.into();
        p.base.is_edge = true;
        p.extra.edge_pipeline_id = Some(edge_id);
        p
    }

    #[test]
    fn test_center_proxies_registered_edges_only() {
        let proxy = EdgeProxy::from_config(&config(NodeRole::Center)).unwrap();
        assert!(proxy.can_proxy_to_edge("edge-app", "edge-1"));
        assert!(!proxy.can_proxy_to_edge("dice", "edge-1"));
        assert!(!proxy.can_proxy_to_edge("edge-app", "terminus-dev"));
    }

    #[test]
    fn test_non_center_never_proxies() {
        for role in [NodeRole::Edge, NodeRole::Standalone] {
            let proxy = EdgeProxy::from_config(&config(role)).unwrap();
            assert!(!proxy.can_proxy_to_edge("edge-app", "edge-1"));
        }
        assert!(EdgeProxy::from_config(&config(NodeRole::Edge)).unwrap().is_edge());
        assert!(!EdgeProxy::disabled().can_proxy_to_edge("edge-app", "edge-1"));
    }

    #[test]
    fn test_unknown_cluster_client() {
        let proxy = EdgeProxy::disabled();
        assert!(matches!(
            proxy.client("edge-1"),
            Err(ServiceError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_edge_id_of_mirrors_only() {
        let proxy = center_proxy(RecordingEdge::new(7));

        let mut local = Pipeline::default();
        local.base.source = "edge-app".into();
        local.base.cluster_name = "edge-1".into();
        assert_eq!(proxy.edge_id_of(&local).unwrap(), None);

        assert_eq!(proxy.edge_id_of(&mirror(3, 7, "edge-1")).unwrap(), Some(7));
        assert!(matches!(
            proxy.edge_id_of(&mirror(3, 7, "edge-gone")),
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_verbs_reach_the_edge_with_edge_id() {
        let edge = RecordingEdge::new(7);
        let proxy = center_proxy(Arc::clone(&edge));
        let p = mirror(3, 7, "edge-1");
        let edge_id = proxy.edge_id_of(&p).unwrap().unwrap();

        proxy
            .run(&p.base.cluster_name, edge_id, &RunPipelineRequest::default())
            .await
            .unwrap();
        proxy
            .cancel(&p.base.cluster_name, edge_id, &CancelPipelineRequest::default())
            .await
            .unwrap();

        assert_eq!(edge.calls(), vec!["run:7", "cancel:7"]);
    }

    #[test]
    fn test_mirror_of_edge_summary() {
        let req = CreatePipelineRequestV2 {
            pipeline_yml: "version: \"1.1\"\nstages: []\n".into(),
            pipeline_source: "edge-app".into(),
            cluster_name: "edge-1".into(),
            ..Default::default()
        };
        let edge = RecordingEdge::new(7).summary("edge-app", "edge-1");

        let p = mirror_of(&req, &edge);
        assert!(p.base.is_edge);
        assert_eq!(p.base.id, 0);
        assert_eq!(p.extra.edge_pipeline_id, Some(7));
        assert_eq!(p.base.cluster_name, "edge-1");
        assert_eq!(p.extra.pipeline_yml, req.pipeline_yml);
    }
}
