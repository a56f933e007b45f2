pub mod cluster;
pub mod config;
pub mod context;
pub mod exec;
pub mod hooks;
pub mod module;
pub mod orchestrator;
pub mod registry;
pub mod release;
pub mod values;
