//! Autopilot: sequential item pipeline orchestration.

pub mod catalog;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod scripted;
pub mod store;
pub mod worker;
