pub mod api;
pub mod config;
pub mod engines;
pub mod humanize;
pub mod jobs;
pub mod ledger;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod worker;
