//! Shared wire types for the parley server and client.

pub mod protocol;

pub use protocol::*;
