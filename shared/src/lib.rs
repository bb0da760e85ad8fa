//! Types shared between the island server and its browser client.

pub mod appearance;
pub mod config;
pub mod protocol;
pub mod world;
