pub mod fake_backend;
pub mod harness;
pub mod marker_files;
pub mod ports;
pub mod stack_builder;
pub mod wait_utils;
