//! Shared types for mrcert crates: wire error codes, the standard error
//! body, and small helpers used by both the CA core and the binary.

pub mod api;
pub mod encoding;
pub mod error;
pub mod http;
pub mod id;
pub mod paths;
