pub mod config;
pub mod definition;
pub mod errors;
pub mod generate;
pub mod git;
pub mod github;
pub mod queue;
pub mod webhook;
pub mod workflow;
