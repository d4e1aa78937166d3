//! Tooth patterns, phase clock, edge scheduler, and tick engine for the
//! cranksim crank/cam signal generator.
//!
//! The engine turns a target engine speed and a pair of toothed-wheel
//! descriptions into a phase-correct stream of digital edges, one per
//! sector boundary, with the cam locked at half crank speed. Each tick
//! counts boundary crossings in closed form, so coarse ticks at high RPM
//! never miss or duplicate an edge.
//!
//! # Modules
//!
//! - [`pattern`] -- [`ToothPattern`] geometry and its construction errors.
//! - [`sensor`] -- [`SensorConfig`] (crank + cam) and the stored wheel
//!   shapes it is parsed from.
//! - [`clock`] -- [`PhaseClock`], integer micro-degree shaft tracking.
//! - [`scheduler`] -- [`EdgeScheduler`], boundary crossings for one tick.
//! - [`sink`] -- [`OutputSink`] and its adapters.
//! - [`engine`] -- [`SimulationEngine`], the Idle/Running state machine.
//! - [`control`] -- [`EngineControl`], the cross-task control handle.
//! - [`runner`] -- [`run_engine`], the periodic async tick loop.
//! - [`config`] -- Settings loading from `cranksim.yaml`.
//!
//! [`ToothPattern`]: pattern::ToothPattern
//! [`SensorConfig`]: sensor::SensorConfig
//! [`PhaseClock`]: clock::PhaseClock
//! [`EdgeScheduler`]: scheduler::EdgeScheduler
//! [`OutputSink`]: sink::OutputSink
//! [`SimulationEngine`]: engine::SimulationEngine
//! [`EngineControl`]: control::EngineControl
//! [`run_engine`]: runner::run_engine

pub mod clock;
pub mod config;
pub mod control;
pub mod engine;
pub mod pattern;
pub mod runner;
pub mod scheduler;
pub mod sensor;
pub mod sink;
