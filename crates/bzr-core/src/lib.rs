//! # bzr-core
//!
//! Core types for bzreport, the Bugzilla report compiler.
//!
//! This crate defines the pieces shared by the parser, connector and query
//! crates:
//! - [`ParameterSpec`]: parameter names, types, defaults and lookup tables
//! - [`ParameterStore`]: explicit / implicit / default value resolution
//! - [`Field`] and [`RequiredFieldSet`]: SQL-backed fields a query fetches
//! - [`Diagnostics`]: non-fatal warnings collected per request
//! - [`ConfigFile`] / [`ReportConfig`]: `bzr.toml` settings
//! - Error type ([`ReportError`])

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod field;
pub mod params;
pub mod schema;

pub use config::{ConfigFile, ReportConfig};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{ReportError, Result};
pub use field::{Field, RequiredFieldSet};
pub use params::{is_present, ParameterStore, SortOrder};
pub use schema::{ParamType, ParameterSpec};
