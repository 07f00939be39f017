//! cherenkov-rs: output pipeline for Monte Carlo optical-photon transport
//!
//! This crate stages photon-exit and energy-deposit records per worker
//! thread, merges them into one stream per record kind and writes fixed-size
//! binary files plus a run manifest.

pub mod common;
pub mod config;
pub mod event;
pub mod recorder;
