//! IE Assistant: a conversational front-end over the manufacturing reporting
//! store.
//!
//! A user turn flows through four layers:
//! - `intent`: code extraction, phrasing signals and task classification
//! - `tasks`: the task catalogue, precondition validation and the orchestrator
//! - `upstream`: refresh jobs that copy upstream transaction views into the store
//! - `store`: the data store backends and the async access facade
//!
//! `engine` ties them into [`Assistant::handle_turn`]; `bootstrap` builds an
//! assistant from `config`.

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod intent;
pub mod logging;
pub mod store;
pub mod tasks;
pub mod upstream;

pub use engine::Assistant;
