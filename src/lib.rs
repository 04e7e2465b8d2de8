//! # Gatebot - Personal AI Assistant Gateway
//!
//! Gatebot is the gateway daemon of a personal AI assistant. It keeps exactly
//! one gateway instance alive per profile and runs the assistant's scheduled
//! work inside it.
//!
//! ## Features
//!
//! - **Process Supervision**: exclusive run lock, stop/restart signals, and a
//!   start/stop loop that survives in-process restarts without dropping the lock
//! - **Cron Scheduling**: one-shot, fixed-interval, and timezone-aware cron
//!   jobs with at-most-one concurrent execution per job
//! - **Heartbeat Cycle**: periodic session wake-ups for deferred job effects
//! - **Message Bus Seam**: a narrow contract to the agent pipeline and channels
//!
//! ## Modules
//!
//! - [`supervisor`] - Gateway lifecycle state machine and signal handling
//! - [`lock`] - Exclusive per-profile run lock
//! - [`gateway`] - The supervised gateway service
//! - [`cron`] - Schedule evaluation, job store, and the scheduler loop
//! - [`heartbeat`] - Periodic wake cycle for deferred session wakes
//! - [`bus`] - Inbound message seam to the agent pipeline
//! - [`config`] - Configuration management
//!
//! ## Configuration
//!
//! Configuration is a JSON file at `~/.gatebot/config.json` (override the
//! directory with `GATEBOT_CONFIG_DIR`). See the `config` module for the
//! available sections.

pub mod bus;
pub mod cli;
pub mod config;
pub mod cron;
pub mod gateway;
pub mod heartbeat;
pub mod lock;
pub mod logging;
pub mod supervisor;
