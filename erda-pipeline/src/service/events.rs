//! Pipeline events
//!
//! Events are delivered off the request path through the background pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use erda_core::domain::pipeline::Pipeline;
use erda_core::domain::status::PipelineStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    PipelineInstanceCreated {
        pipeline_id: i64,
        source: String,
        yml_name: String,
        cluster_name: String,
        labels: BTreeMap<String, String>,
        occurred_at: DateTime<Utc>,
    },
    PipelineStatusChanged {
        pipeline_id: i64,
        status: PipelineStatus,
        occurred_at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn instance_created(p: &Pipeline) -> Self {
        PipelineEvent::PipelineInstanceCreated {
            pipeline_id: p.id(),
            source: p.base.source.clone(),
            yml_name: p.base.yml_name.clone(),
            cluster_name: p.base.cluster_name.clone(),
            labels: p.merged_labels(),
            occurred_at: Utc::now(),
        }
    }

    pub fn status_changed(pipeline_id: i64, status: PipelineStatus) -> Self {
        PipelineEvent::PipelineStatusChanged {
            pipeline_id,
            status,
            occurred_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::PipelineInstanceCreated { .. } => "PipelineInstanceCreated",
            PipelineEvent::PipelineStatusChanged { .. } => "PipelineStatusChanged",
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &PipelineEvent) -> anyhow::Result<()>;
}

/// Writes events to the log
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn send(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        tracing::info!("pipeline event: {}", serde_json::to_string(event)?);
        Ok(())
    }
}

/// Posts events as JSON to a webhook
pub struct WebhookEventSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookEventSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EventSink for WebhookEventSink {
    async fn send(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Webhook sink when a URL is configured, log sink otherwise
pub fn sink_from_config(client: reqwest::Client, webhook_url: Option<&str>) -> Arc<dyn EventSink> {
    match webhook_url.filter(|u| !u.is_empty()) {
        Some(url) => Arc::new(WebhookEventSink::new(client, url)),
        None => Arc::new(LogEventSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_shape() {
        let mut p = Pipeline::default();
        p.base.id = 5;
        p.base.source = "dice".into();
        p.extra.labels.insert("branch".into(), "master".into());

        let json = serde_json::to_value(PipelineEvent::instance_created(&p)).unwrap();
        assert_eq!(json["event"], "pipeline_instance_created");
        assert_eq!(json["pipeline_id"], 5);
        assert_eq!(json["labels"]["branch"], "master");
    }

    #[tokio::test]
    async fn test_log_sink_accepts_events() {
        let sink = sink_from_config(reqwest::Client::new(), None);
        let event = PipelineEvent::status_changed(1, PipelineStatus::Born);
        assert_eq!(event.name(), "PipelineStatusChanged");
        sink.send(&event).await.unwrap();
    }
}
