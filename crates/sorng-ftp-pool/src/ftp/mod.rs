//! # sorng-ftp-pool: pooled FTP transfers
//!
//! Architecture:
//! - `types`: configuration, pool stats, replies, listing entries
//! - `error`: FTP-specific error type
//! - `protocol`: low-level command/response codec
//! - `connection`: TCP transport and greeting
//! - `transfer`: data channel management (PASV/EPSV/PORT/EPRT)
//! - `parser`: Unix/Windows LIST response parsing
//! - `session`: the `FtpSession` capability the pool hands out
//! - `client`: TCP-backed `FtpSession` (login, CWD, STOR, RETR, ...)
//! - `factory`: create / validate / destroy for the pool
//! - `pool`: generic bounded pool with eviction
//! - `path_codec`: path normalisation and charset relabelling
//! - `directory`: recursive remote directory ensure
//! - `service`: borrow → use → release transfer operations
//! - `simulated`: in-memory server and sessions

pub mod types;
pub mod error;
pub mod protocol;
pub mod connection;
pub mod transfer;
pub mod parser;
pub mod session;
pub mod client;
pub mod factory;
pub mod pool;
pub mod path_codec;
pub mod directory;
pub mod service;
pub mod simulated;

// Re-exports for lib.rs consumers
pub use types::*;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use session::FtpSession;
pub use client::FtpConnection;
pub use factory::{ConnectionFactory, FtpConnectionFactory};
pub use pool::{Pool, Pooled};
pub use path_codec::{normalize_path, PathCodec, RemotePath};
pub use directory::ensure_directory;
pub use service::{FtpServiceState, FtpTransferService};
pub use simulated::{MemoryConnectionFactory, MemoryFtpServer, MemorySession};
