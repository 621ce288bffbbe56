//! Service Module
//!
//! Business logic layer of the pipeline service.
//! Services orchestrate between repositories and contain domain logic.

pub mod action_registry;
pub mod background;
pub mod cache;
pub mod cipher;
pub mod cms;
pub mod edge;
pub mod engine;
pub mod error;
pub mod events;
pub mod gc;
pub mod pipeline;
pub mod secret;

mod callback;
mod cancel;
mod create;
mod detail;
mod graph;
mod query;
mod rerun;
mod run;

#[cfg(all(test, feature = "db-tests"))]
mod testing;

pub use cms::CmsService;
pub use pipeline::{PipelineService, ServiceParts};
