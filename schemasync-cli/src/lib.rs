//! schemasync CLI - migration runner and environment schema sync.
//!
//! This crate provides the `schemasync` binary: applying numbered SQL
//! migrations to a chosen environment, and generating the SQL that brings
//! production in line with development.

pub mod cli;
pub mod commands;
pub mod config;
pub mod environment;
pub mod error;
pub mod logging;
pub mod output;
