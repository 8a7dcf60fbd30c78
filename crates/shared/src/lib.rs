//! Payloads exchanged between the host application and an orthogonal viewer mount.

pub mod domain;
pub mod error;
pub mod protocol;
