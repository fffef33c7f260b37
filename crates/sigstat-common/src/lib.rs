//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the publisher runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the signal status publisher workspace.
//! This crate exposes configuration loading, tracing initialisation, and the
//! run lifecycle events consumed across the workspace.

pub mod config;
pub mod events;
pub mod logging;

pub use config::{AppConfig, KitsConfig, LoggingConfig, PipelineConfig, SocrataConfig};
pub use events::{log_run_event, RunContext, RunOutcome};
pub use logging::{init_tracing, LogFormat};
