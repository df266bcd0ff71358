//! Individual steps of the update process.
//!
//! Each step is a plain function called by the orchestrator or the version
//! store.

pub mod download;
pub mod extract;
pub mod verify;
