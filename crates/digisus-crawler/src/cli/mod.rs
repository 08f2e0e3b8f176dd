//! CLI subcommand implementations for the `digisus-crawler` binary.

pub mod crawl_cmd;
pub mod doctor;
pub mod output;
