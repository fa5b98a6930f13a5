//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers supporting engine sessions."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Cooperative scheduling helpers for the R-MDASH runtime.

pub mod scheduling;

pub use scheduling::{RateLimiter, TaskGroup};
