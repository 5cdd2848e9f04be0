//! Terminal output for each subcommand

pub mod history;
pub mod holdings;
pub mod run;
pub mod setup;
pub mod sources;
pub mod ui;
pub mod validate;
