//! # Command-Line Interface
//!
//! User-facing CLI commands and output formatting.
//!
//! ## Commands
//!
//! | Group | Purpose | Examples |
//! |-------|---------|----------|
//! | Contexts | Entry lifecycle | `add`, `read`, `update`, `remove` |
//! | Query | Finding entries | `list`, `list --details`, `search --fuzzy` |
//! | Maintenance | Store health | `status`, `rebuild-index` |
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Verbose Mode
//!
//! Use `--verbose` (or `-v`) for debug output; it also raises the log
//! filter to `debug` unless `RUST_LOG` says otherwise:
//! ```bash
//! loccon --verbose search --fuzzy roadmap
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod contexts;
mod maintenance;
mod output;

pub use app::{run, Cli, Commands};
pub use contexts::parse_categories;
pub use output::{Output, OutputFormat};
