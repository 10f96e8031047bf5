//! CLI command implementations

mod config;
mod context;
mod run;

pub use config::{config_file, config_init, config_show, load_session_config};
pub use context::{context_command, context_json};
pub use run::{load_inventory, run_batch, run_command, shell_command, RunOptions};
