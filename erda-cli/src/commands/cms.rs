//! Config management command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use erda_core::domain::cms::ConfigType;
use erda_core::dto::cms::{
    CmsConfigInput, DeleteConfigsRequest, GetConfigsRequest, UpdateConfigsRequest,
};

use crate::commands::parse_key_val;
use crate::config::Config;
use erda_client::PipelineClient;

/// Config subcommands
#[derive(Subcommand)]
pub enum CmsCommands {
    /// Create or update configs of a namespace
    Set {
        /// Config namespace
        ns: String,

        /// Pipeline source owning the namespace
        #[arg(short, long)]
        source: String,

        /// Configs as key=value pairs
        #[arg(value_parser = parse_key_val, required = true)]
        configs: Vec<(String, String)>,

        /// Store the values encrypted
        #[arg(long)]
        encrypt: bool,
    },
    /// Show configs of a namespace
    Get {
        /// Config namespace
        ns: String,

        /// Keys to show (comma-separated), all when omitted
        #[arg(short, long)]
        keys: Option<String>,

        /// Show encrypted values in plain text
        #[arg(long)]
        decrypt: bool,
    },
    /// Delete configs of a namespace
    Delete {
        /// Config namespace
        ns: String,

        /// Keys to delete (comma-separated)
        #[arg(short, long)]
        keys: String,
    },
}

/// Handle config commands
pub async fn handle_cms_command(command: CmsCommands, config: &Config) -> Result<()> {
    let client = PipelineClient::new(&config.pipeline_url);

    match command {
        CmsCommands::Set {
            ns,
            source,
            configs,
            encrypt,
        } => {
            let req = UpdateConfigsRequest {
                pipeline_source: source,
                configs: configs
                    .into_iter()
                    .map(|(key, value)| CmsConfigInput {
                        key,
                        value,
                        encrypt,
                        config_type: ConfigType::Kv,
                        comment: None,
                    })
                    .collect(),
            };
            let count = req.configs.len();
            client.update_configs(&ns, &req).await?;
            println!(
                "{}",
                format!("✓ {} config(s) of {} updated", count, ns)
                    .green()
                    .bold()
            );
            Ok(())
        }
        CmsCommands::Get { ns, keys, decrypt } => {
            let resp = client
                .get_configs(&ns, &GetConfigsRequest { keys, decrypt })
                .await?;
            if resp.configs.is_empty() {
                println!("{}", format!("No configs in {}.", resp.ns).yellow());
                return Ok(());
            }
            println!("{}", format!("Configs of {}:", resp.ns).bold());
            for config in &resp.configs {
                let lock = if config.encrypt { " 🔒" } else { "" };
                println!(
                    "  {}{} = {} {}",
                    config.key.cyan(),
                    lock,
                    config.value,
                    format!("[{}]", config.config_type.as_str()).dimmed()
                );
            }
            Ok(())
        }
        CmsCommands::Delete { ns, keys } => {
            client
                .delete_configs(&ns, &DeleteConfigsRequest { keys: Some(keys) })
                .await?;
            println!(
                "{}",
                format!("✓ Configs of {} deleted", ns).green().bold()
            );
            Ok(())
        }
    }
}
