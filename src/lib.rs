//! Upload a local directory tree to Google Drive, skipping files whose
//! content already matches a remote copy.

pub mod auth;
pub mod cli;
pub mod drive;
pub mod report;
pub mod sync;
