//! Common utilities and types shared across session controller components.

#![warn(clippy::pedantic)]

/// Module for common data types (identifiers, media tags)
pub mod types;

/// Module for common configuration
pub mod config;
