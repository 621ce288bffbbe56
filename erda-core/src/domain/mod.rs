//! Core domain types
//!
//! This module contains the domain structures shared by the pipeline service
//! (for persistence), the client and the CLI.

pub mod action;
pub mod cms;
pub mod cron;
pub mod pipeline;
pub mod stage;
pub mod status;
pub mod task;

pub use pipeline::Pipeline;
pub use stage::PipelineStage;
pub use status::PipelineStatus;
pub use task::PipelineTask;
