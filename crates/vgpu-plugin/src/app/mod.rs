//! Application module
//!
//! Wires the plugin, its stream consumers and the HTTP API into one daemon
//! lifecycle.

pub mod builder;
pub mod core;
pub mod services;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use core::Application;
pub use services::ApplicationServices;
