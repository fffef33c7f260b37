//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Test harness collaborators and shared exports."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Collaborators for exercising the publisher without KITS or the portal.
//!
//! [`StaticSource`] and [`InMemoryDataset`] stand in for the two external
//! systems in unit-level orchestration tests. [`MockPortal`] serves the SODA
//! read and upsert endpoints over HTTP so the real client can be driven
//! end to end.

pub mod fakes;
pub mod portal;

pub use fakes::{flagged_record, InMemoryDataset, StaticSource};
pub use portal::{MockPortal, MockPortalBuilder, RecordedRequest};
