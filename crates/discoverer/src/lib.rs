//! Discoverer process wiring: configuration and the HTTP surface

pub mod api;
pub mod config;
