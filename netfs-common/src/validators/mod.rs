//! Input validation functions
//!
//! Reusable validators shared between client, server, and proxy. Clients can
//! use them for pre-validation, the server uses them for enforcement.

mod file_path;

pub use file_path::{FilePathError, MAX_FILE_PATH_LENGTH, validate_file_path};
