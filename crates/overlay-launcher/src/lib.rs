//! Launcher library for GrapplingOverlay.
//!
//! Bootstraps the bundled application into the version store, starts the
//! current version as a child process and serves its update requests.

#![warn(missing_docs)]

pub mod config;
pub mod launch;
pub mod launcher;
pub mod logging;
pub mod request;
pub mod selftest;

pub use config::LauncherConfig;
pub use launch::{ChildExit, UPDATE_EXIT_CODE};
pub use launcher::Launcher;
pub use request::UpdateRequest;
