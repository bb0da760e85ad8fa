//! Island server library.
//!
//! This module exposes the server components for use in tests and binaries.

pub mod accounts;
pub mod config;
pub mod error;
pub mod game_loop;
pub mod persistence;
pub mod profiles;
pub mod server;
pub mod session;
pub mod state;
pub mod ws;

pub use server::IslandServer;
