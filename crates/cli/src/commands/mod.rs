//! CLI subcommands

pub mod check;
pub mod history;
pub mod places;
pub mod status;
