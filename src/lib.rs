//! Report review pipeline with AI confidence gating.
//!
//! A submitted report is scored by an analysis provider, gated against a
//! confidence threshold, handed to human reviewers, and every step is
//! announced by mail to the people it concerns.

pub mod analysis;
pub mod bus;
pub mod config;
pub mod errors;
pub mod gate;
pub mod logging;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod service;
pub mod store;
