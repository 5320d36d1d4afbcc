//! TabGuard: password-protected private tabs.
//!
//! Tracks which browser tabs are private, locks them behind a master
//! password, and auto-locks them after inactivity. The browser side talks to
//! this crate through the traits in [`adapters`] and the request router in
//! [`rpc_handler`].

pub mod adapters;
pub mod app;
pub mod config;
pub mod database;
pub mod managers;
pub mod platform;
pub mod rpc_handler;
pub mod services;
pub mod types;
