//! Integration test suite for phasegate.
//!
//! These tests drive projects through the orchestrator against a temporary
//! workspace, using the built-in placeholder workers so no reasoning
//! backend is needed.
//!
//! # Test Categories
//!
//! - `lifecycle_e2e`: Full walk from planning to maintenance, QA approval and rework
//! - `guard_enforcement`: Safety guard blocking through the executor and the coding phase
//! - `routing`: Worker routing and custom workers plugged into the orchestrator
//! - `concurrency`: Single writer per project, independent projects in parallel

mod fixtures;

mod concurrency;
mod guard_enforcement;
mod lifecycle_e2e;
mod routing;
