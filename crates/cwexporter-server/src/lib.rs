pub mod cli;
pub mod commands;
pub mod handlers;
pub mod logging;
pub mod router;

pub use cli::{Cli, Command, GetArgs, LogFormat, MetricsCommand, OutputFormat};
pub use router::{AppState, exporter_router};
