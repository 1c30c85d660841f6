//! Test utilities for the stackup workspace
//!
//! This crate provides builders for stack files, a scripted backend that stands
//! in for real services, a harness tying them to a temporary state directory,
//! and wait helpers for real processes and ports.

pub mod helpers;

pub use helpers::fake_backend::{Behavior, ScriptedBackend};
pub use helpers::harness::TestStackHarness;
pub use helpers::marker_files::MarkerFileHelper;
pub use helpers::ports::{free_port, occupy_port};
pub use helpers::stack_builder::{TestRuleBuilder, TestServiceBuilder, TestStackBuilder};
pub use helpers::wait_utils::{wait_for_exit, wait_for_port_free, wait_until};
