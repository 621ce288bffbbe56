//! Pipeline command handlers
//!
//! Handles all pipeline-related CLI commands including creation, listing,
//! viewing, deletion, and the run/cancel/rerun lifecycle.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use erda_core::domain::pipeline::RunParam;
use erda_core::domain::status::PipelineStatus;
use erda_core::dto::pipeline::{
    CancelPipelineRequest, CreatePipelineRequestV2, PagingRequest, PipelineDetail,
    PipelineSummary, QuerySnippetRequest, RerunPipelineRequest, RunPipelineRequest,
    StatisticRequest, TaskDetail,
};
use serde_json::Value as JsonValue;

use crate::commands::parse_key_val;
use crate::config::Config;
use erda_client::PipelineClient;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create a pipeline from a pipeline yml file
    Create {
        /// Path to the pipeline yml
        #[arg(short, long)]
        file: String,

        /// Pipeline source (e.g. dice, ops)
        #[arg(short, long)]
        source: String,

        /// Cluster the pipeline runs in
        #[arg(short, long)]
        cluster: String,

        /// Pipeline yml name, defaults to the file name
        #[arg(short, long)]
        name: Option<String>,

        /// Labels as key=value pairs
        #[arg(short, long, value_parser = parse_key_val)]
        label: Vec<(String, String)>,

        /// Environment variables as key=value pairs
        #[arg(short, long, value_parser = parse_key_val)]
        env: Vec<(String, String)>,

        /// Config namespaces to read secrets from (comma-separated)
        #[arg(long, value_delimiter = ',')]
        config_ns: Vec<String>,

        /// Run the pipeline right after creation
        #[arg(long)]
        run: bool,

        /// Cancel running pipelines of the same yml before running
        #[arg(long)]
        force: bool,
    },
    /// List pipelines
    List {
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        yml_name: Option<String>,

        #[arg(long)]
        cluster: Option<String>,

        /// Statuses to include (comma-separated)
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "1")]
        page: i64,

        #[arg(long, default_value = "20")]
        page_size: i64,
    },
    /// Get pipeline details
    Get {
        /// Pipeline ID
        id: i64,
    },
    /// Get the details of one task
    Task {
        /// Pipeline ID
        id: i64,

        /// Task ID
        task_id: i64,
    },
    /// Delete a pipeline
    Delete {
        /// Pipeline ID
        id: i64,
    },
    /// Run an analyzed pipeline
    Run {
        /// Pipeline ID
        id: i64,

        /// Run params as key=value pairs; values are parsed as JSON when possible
        #[arg(short, long, value_parser = parse_key_val)]
        param: Vec<(String, String)>,

        /// Cancel running pipelines of the same yml first
        #[arg(long)]
        force: bool,
    },
    /// Cancel a running pipeline
    Cancel {
        /// Pipeline ID
        id: i64,
    },
    /// Rerun a finished pipeline from scratch
    Rerun {
        /// Pipeline ID
        id: i64,

        /// Run the new pipeline immediately
        #[arg(long)]
        run: bool,
    },
    /// Rerun a failed pipeline, skipping tasks that already succeeded
    RerunFailed {
        /// Pipeline ID
        id: i64,

        /// Run the new pipeline immediately
        #[arg(long)]
        run: bool,
    },
    /// Count pipelines by outcome
    Statistic {
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        cluster: Option<String>,
    },
    /// Show the params and outputs a pipeline yml declares
    Snippet {
        /// Path to the pipeline yml
        #[arg(short, long)]
        file: String,
    },
}

/// Handle pipeline commands
///
/// Routes pipeline subcommands to their respective handlers.
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = PipelineClient::new(&config.pipeline_url);

    match command {
        PipelineCommands::Create {
            file,
            source,
            cluster,
            name,
            label,
            env,
            config_ns,
            run,
            force,
        } => {
            let pipeline_yml = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read pipeline yml: {}", file))?;
            let req = CreatePipelineRequestV2 {
                pipeline_yml,
                pipeline_yml_name: name.unwrap_or_else(|| yml_name_of(&file)),
                pipeline_source: source,
                cluster_name: cluster,
                labels: label.into_iter().collect(),
                envs: env.into_iter().collect(),
                config_manage_namespaces: config_ns,
                auto_run_at_once: run,
                force_run: force,
                identity: config.identity(),
                ..Default::default()
            };
            create_pipeline(&client, &req).await
        }
        PipelineCommands::List {
            source,
            yml_name,
            cluster,
            status,
            page,
            page_size,
        } => {
            let req = PagingRequest {
                source,
                yml_name,
                cluster_name: cluster,
                statuses: status,
                page_no: Some(page),
                page_size: Some(page_size),
            };
            list_pipelines(&client, &req).await
        }
        PipelineCommands::Get { id } => get_pipeline(&client, id).await,
        PipelineCommands::Task { id, task_id } => get_task(&client, id, task_id).await,
        PipelineCommands::Delete { id } => delete_pipeline(&client, id).await,
        PipelineCommands::Run { id, param, force } => {
            let req = RunPipelineRequest {
                force_run: force,
                run_params: param
                    .into_iter()
                    .map(|(name, value)| RunParam {
                        name,
                        value: parse_param_value(&value),
                    })
                    .collect(),
                identity: config.identity(),
                ..Default::default()
            };
            run_pipeline(&client, id, &req).await
        }
        PipelineCommands::Cancel { id } => {
            let req = CancelPipelineRequest {
                identity: config.identity(),
            };
            client.cancel_pipeline(id, &req).await?;
            println!(
                "{}",
                format!("✓ Pipeline {} cancelled", id).green().bold()
            );
            Ok(())
        }
        PipelineCommands::Rerun { id, run } => {
            let req = RerunPipelineRequest {
                auto_run_at_once: run,
                identity: config.identity(),
            };
            let p = client.rerun_pipeline(id, &req).await?;
            println!(
                "{}",
                format!("✓ Pipeline {} rerun as {}", id, p.id).green().bold()
            );
            print_pipeline_summary(&p);
            Ok(())
        }
        PipelineCommands::RerunFailed { id, run } => {
            let req = RerunPipelineRequest {
                auto_run_at_once: run,
                identity: config.identity(),
            };
            let p = client.rerun_failed_pipeline(id, &req).await?;
            println!(
                "{}",
                format!("✓ Failed tasks of pipeline {} rerun as {}", id, p.id)
                    .green()
                    .bold()
            );
            print_pipeline_summary(&p);
            Ok(())
        }
        PipelineCommands::Statistic { source, cluster } => {
            let req = StatisticRequest {
                source,
                cluster_name: cluster,
            };
            let stat = client.statistic(&req).await?;
            println!("{}", "Pipeline Statistics:".bold());
            println!("  Success:    {}", stat.success.to_string().green());
            println!("  Processing: {}", stat.processing.to_string().cyan());
            println!("  Failed:     {}", stat.failed.to_string().red());
            println!("  Completed:  {}", stat.completed);
            Ok(())
        }
        PipelineCommands::Snippet { file } => {
            let pipeline_yml = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read pipeline yml: {}", file))?;
            let resp = client
                .query_snippet_yml(&QuerySnippetRequest { pipeline_yml })
                .await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
            Ok(())
        }
    }
}

/// Create a pipeline and print its summary
async fn create_pipeline(client: &PipelineClient, req: &CreatePipelineRequestV2) -> Result<()> {
    let p = client.create_pipeline_v2(req).await?;

    println!("{}", "✓ Pipeline created successfully!".green().bold());
    print_pipeline_summary(&p);

    Ok(())
}

async fn list_pipelines(client: &PipelineClient, req: &PagingRequest) -> Result<()> {
    let page = client.list_pipelines(req).await?;

    if page.pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!(
                "Showing {} of {} pipeline(s) (page {}):",
                page.pipelines.len(),
                page.total,
                page.page_no
            )
            .bold()
        );
        println!();
        for pipeline in &page.pipelines {
            print_pipeline_summary(pipeline);
        }
    }

    Ok(())
}

async fn get_pipeline(client: &PipelineClient, id: i64) -> Result<()> {
    let detail = client.get_pipeline(id).await?;

    print_pipeline_details(&detail);

    Ok(())
}

async fn get_task(client: &PipelineClient, id: i64, task_id: i64) -> Result<()> {
    let task = client.get_task(id, task_id).await?;

    print_task_details(&task);

    Ok(())
}

async fn delete_pipeline(client: &PipelineClient, id: i64) -> Result<()> {
    client.delete_pipeline(id).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} deleted successfully!", id)
            .green()
            .bold()
    );

    Ok(())
}

async fn run_pipeline(client: &PipelineClient, id: i64, req: &RunPipelineRequest) -> Result<()> {
    client.run_pipeline(id, req).await?;

    println!("{}", format!("✓ Pipeline {} started", id).green().bold());
    if !req.run_params.is_empty() {
        println!("  Params:");
        for param in &req.run_params {
            println!("    - {}: {}", param.name.cyan(), param.value);
        }
    }

    Ok(())
}

/// Default yml name: the file name of the given path
fn yml_name_of(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("pipeline.yml")
        .to_string()
}

/// Run param values are JSON when they parse, plain strings otherwise
fn parse_param_value(raw: &str) -> JsonValue {
    serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()))
}

fn print_pipeline_summary(pipeline: &PipelineSummary) {
    println!("  {} {}", "▸".cyan(), pipeline.yml_name.bold());
    println!("    ID:      {}", pipeline.id.to_string().cyan());
    println!("    Status:  {}", colorize_status(pipeline.status));
    println!(
        "    Source:  {} @ {}",
        pipeline.source.dimmed(),
        pipeline.cluster_name.dimmed()
    );
    println!(
        "    Created: {}",
        pipeline
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(cost) = pipeline.cost_time_sec {
        println!("    Cost:    {}s", cost.to_string().dimmed());
    }
    println!();
}

fn print_pipeline_details(detail: &PipelineDetail) {
    let p = &detail.summary;
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:           {}", p.id.to_string().cyan());
    println!("  Yml:          {}", p.yml_name.bold());
    println!("  Status:       {}", colorize_status(p.status));
    println!("  Source:       {}", p.source);
    println!("  Cluster:      {}", p.cluster_name);
    println!("  Namespace:    {}", detail.namespace);
    println!(
        "  Type:         {} ({})",
        p.pipeline_type.as_str(),
        p.trigger_mode.as_str()
    );
    println!("  Created:      {}", p.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(begin) = p.time_begin {
        println!("  Started:      {}", begin.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(end) = p.time_end {
        println!("  Ended:        {}", end.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(cron) = &detail.cron {
        println!(
            "  Cron:         {} ({})",
            cron.cron_expr,
            if cron.enable { "enabled" } else { "disabled" }
        );
    }
    if detail.need_approval {
        println!("  {}", "Requires manual review".yellow());
    }
    if let Some(msg) = &detail.show_message {
        println!("  Message:      {}", msg.yellow());
    }

    if !detail.run_params.is_empty() {
        println!("\n{}", "Run Params:".bold());
        for param in &detail.run_params {
            let required = if param.required { "*" } else { "" };
            let value = param
                .value
                .as_ref()
                .or(param.default.as_ref())
                .map(|v| v.to_string())
                .unwrap_or_default();
            println!("  - {}{}: {}", param.name.cyan(), required.red(), value);
        }
    }

    println!("\n{}", "Stages:".bold());
    println!("{}", "─".repeat(80).dimmed());
    for stage in &detail.stages {
        println!(
            "  {} {} {}",
            "▸".cyan(),
            format!("stage {}", stage.stage.stage_order).bold(),
            colorize_status(stage.stage.status)
        );
        for task in &stage.tasks {
            let snippet = if task.task.is_snippet { " (snippet)" } else { "" };
            println!(
                "    - {} [{}]{} {}",
                task.task.name,
                task.task.task_type.dimmed(),
                snippet.dimmed(),
                colorize_status(task.task.status)
            );
        }
    }
    println!("{}", "─".repeat(80).dimmed());

    let b = &detail.buttons;
    let actions: Vec<&str> = [
        (b.can_manual_run, "run"),
        (b.can_cancel, "cancel"),
        (b.can_rerun, "rerun"),
        (b.can_rerun_failed, "rerun-failed"),
        (b.can_delete, "delete"),
    ]
    .into_iter()
    .filter_map(|(enabled, name)| enabled.then_some(name))
    .collect();
    if !actions.is_empty() {
        println!("  Available: {}", actions.join(", ").dimmed());
    }
}

fn print_task_details(task: &TaskDetail) {
    let t = &task.task;
    println!("{}", "Task Details:".bold());
    println!("  ID:       {}", t.id.to_string().cyan());
    println!("  Name:     {}", t.name.bold());
    println!("  Type:     {}", t.task_type);
    println!("  Status:   {}", colorize_status(t.status));
    if let Some(cost) = t.cost_time_sec {
        println!("  Cost:     {}s", cost);
    }
    if !task.containers.is_empty() {
        let names: Vec<&str> = task.containers.iter().map(|c| c.task_name.as_str()).collect();
        println!("  Containers: {}", names.join(", ").dimmed());
    }
    if !task.merged_result.metadata.is_empty() {
        println!("\n{}", "Metadata:".bold());
        for field in &task.merged_result.metadata {
            println!("  {}: {}", field.name.cyan(), field.value);
        }
    }
    if !task.merged_result.errors.is_empty() {
        println!("\n{}", "Errors:".bold().red());
        for err in &task.merged_result.errors {
            println!("  - {}", err.msg.red());
        }
    }
}

fn colorize_status(status: PipelineStatus) -> colored::ColoredString {
    let status_str = status.as_str();
    if status.is_success() {
        status_str.green()
    } else if status.is_failed() {
        status_str.red()
    } else if status.is_end() {
        status_str.dimmed()
    } else if status.is_reconciler_running() {
        status_str.cyan()
    } else {
        status_str.yellow()
    }
}
