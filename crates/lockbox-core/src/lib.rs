pub mod bridge;
pub mod config;
pub mod error;

pub use error::{LockboxError, LockboxResult};

/// Metadata key carrying the bearer token on StorageService calls
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Generated gRPC types and service traits (from lockbox.proto)
pub mod proto {
    tonic::include_proto!("lockbox");
}
