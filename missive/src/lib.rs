//! The missive daemon: configuration, wiring and the control socket handler.

pub mod config;
pub mod control_handler;
pub mod controller;
pub mod seed;

pub use controller::Missive;
