//! Erda Core
//!
//! Core types and pure logic for the erda pipeline service.
//!
//! This crate contains:
//! - Domain types: pipelines, stages, tasks, statuses and action definitions
//! - Pipeline YAML parsing
//! - Resource calculation and the task merge engine
//! - DTOs: request/response types shared by the service, client and CLI

pub mod domain;
pub mod dto;
pub mod labels;
pub mod merge;
pub mod resource;
pub mod view;
pub mod yml;
