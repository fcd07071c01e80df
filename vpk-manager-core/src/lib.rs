//! Core engine for managing Left 4 Dead 2 VPK addons: archive reading,
//! cross-archive conflict detection, library scanning, workshop lookups and
//! the background download task manager.

pub mod core;
pub mod error;
pub mod fs_paths;
pub mod models;

pub use error::ManagerError;
