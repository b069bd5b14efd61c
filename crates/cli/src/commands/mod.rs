pub mod call;
pub mod config;
pub mod nodes;
pub mod utils;

pub use call::{run_batch, run_call, CallArgs};
pub use config::{handle_config_command, ConfigCommands};
pub use nodes::list_nodes;
