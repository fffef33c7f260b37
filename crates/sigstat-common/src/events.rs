//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured run lifecycle events."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use tracing::{error, info};

/// Structured context attached to run lifecycle events.
#[derive(Debug, Default, Clone)]
pub struct RunContext<'a> {
    /// Identifier generated for one publisher invocation.
    pub run_id: Option<&'a str>,
    /// Published dataset the run writes to.
    pub dataset: Option<&'a str>,
    /// Whether the write step is skipped.
    pub dry_run: bool,
}

impl<'a> RunContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_id(mut self, run_id: &'a str) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_dataset(mut self, dataset: &'a str) -> Self {
        self.dataset = Some(dataset);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Fault,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized run event with a success/fault outcome.
pub fn log_run_event(context: Option<&RunContext>, event: &str, message: &str, outcome: RunOutcome) {
    let default = RunContext::default();
    let ctx = context.unwrap_or(&default);
    let run_id = ctx.run_id.unwrap_or("");
    let dataset = ctx.dataset.unwrap_or("");
    match outcome {
        RunOutcome::Success => info!(
            event,
            outcome = outcome.as_str(),
            run_id,
            dataset,
            dry_run = ctx.dry_run,
            message = %message
        ),
        RunOutcome::Fault => error!(
            event,
            outcome = outcome.as_str(),
            run_id,
            dataset,
            dry_run = ctx.dry_run,
            message = %message
        ),
    }
}
