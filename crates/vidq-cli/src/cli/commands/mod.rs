//! CLI command handlers, one per file.

mod add;
mod remove;
mod run;
mod status;

pub use add::run_add;
pub use remove::run_remove;
pub use run::run_daemon;
pub use status::run_status;
