//! # bzr-query
//!
//! Report engine for bzreport. Compiles report parameters into one
//! parameterized SQL statement plus a matching `buglist.cgi` search URL,
//! runs it through a connector and renders the rows.
//!
//! Includes:
//! - Filter-expression compiler (WHERE fragments and search-URL rows)
//! - Column resolution with implicit add/remove rules
//! - SQL assembler for the required-field set
//! - Value formatter (dates, radar, ids, numbers, names, links)
//! - Renderer, report executor and Table/Markdown/JSON output

pub mod columns;
pub mod compiler;
pub mod executor;
pub mod filter;
pub mod formatter;
pub mod render;
pub mod search_url;
pub mod value_format;

pub use compiler::{inline_params, CompiledQuery, QueryCompiler};
pub use executor::{Report, ReportBody, ReportOutput};
pub use formatter::{format_results, OutputFormat};
pub use render::{BarEntry, RenderedRow, RenderedTable, Renderer};
pub use value_format::ValueFormatter;
