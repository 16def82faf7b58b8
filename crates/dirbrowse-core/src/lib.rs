//! # dirbrowse-core
//!
//! Core types for browsing and editing directory-information trees.
//!
//! This crate holds the parts that do no I/O: the error taxonomy shared by every layer,
//! connection configuration with its persisted record form, entry snapshots, and the diff
//! engine that turns an edited snapshot into attribute-level change operations.
//!
//! ## Modules
//!
//! - [`error`] - Error kinds and directory result code names
//! - [`config`] - Connection configuration and record conversion
//! - [`entry`] - Entry and attribute snapshot types
//! - [`diff`] - Attribute change sets and the diff engine

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod diff;
pub mod entry;
pub mod error;

// Re-export commonly used types
pub use config::{ConnectionConfig, ConnectionRecord};
pub use diff::{diff, AttributeChange, AttributeChangeSet};
pub use entry::{attributes, Attributes, DirectoryEntry};
pub use error::{Error, Result};
