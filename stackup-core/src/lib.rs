//! Validation, staged startup and PID-exact shutdown for local service stacks.

pub mod backend;
pub mod config;
pub mod deps;
pub mod env;
pub mod errors;
pub mod health;
pub mod orchestrator;
pub mod plan;
pub mod ports;
pub mod process;
pub mod registry;
pub mod retry;
pub mod shutdown;
pub mod stack;
pub mod state;
pub mod validator;

pub use stack::{LaunchError, RecordStatus, Stack, UpOptions, UpReport};
