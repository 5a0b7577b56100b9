//! Strata CLI - Command-line interface for Strata migrations.
//!
//! This crate provides the `strata` tool for applying, inspecting,
//! validating, baselining and repairing database migrations.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
