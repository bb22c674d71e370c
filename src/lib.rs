//! Client for the Jimeng image-generation web API
//!
//! Uploads a reference image through a signed two-step handshake, submits a
//! generation draft, and polls the resulting job until it finishes, mapping
//! the service's status and fail codes onto a typed error taxonomy.

pub mod error;
pub mod jimeng;
pub mod models;

pub use error::{ApiError, Error, ErrorKind, Result};
