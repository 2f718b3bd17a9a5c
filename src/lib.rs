//! Trail arena server: authoritative light-trail arena simulation with a
//! WebSocket transport

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
