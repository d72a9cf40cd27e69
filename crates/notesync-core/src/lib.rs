pub mod config;
pub mod error;
pub mod io;
pub mod manifest;
pub mod notes;
pub mod paths;
pub mod status;
pub mod store;
pub mod sync;

pub use error::{NotesyncError, Result};
