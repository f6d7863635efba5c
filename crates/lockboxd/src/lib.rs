//! lockboxd: gRPC front end for the lockbox vault
//!
//! The binary in `main.rs` only parses flags and sets up logging; everything
//! else lives here so it can be driven from integration tests.

pub mod daemon;
pub mod grpc;
