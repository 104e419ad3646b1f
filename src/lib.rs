//! Dust-attack trap monitor.
//!
//! Watches a dust-detection trap contract two ways at once (live event
//! subscription and periodic status polls), reconciles both into a single
//! attack/ok state, and raises one alert per incident.

pub mod alert;
pub mod config;
pub mod onchain;
pub mod poller;
pub mod service;
pub mod state;
