//! Realtime message gateway: bridges authenticated WebSocket sessions to a
//! binary-framed TCP engine, translating between the end-user's JSON wire
//! format and the [`protocol`] crate's frame codec.

pub mod auth;
pub mod config;
pub mod engine;
pub mod logging;
pub mod session;
pub mod upstream;
pub mod ws_handler;
