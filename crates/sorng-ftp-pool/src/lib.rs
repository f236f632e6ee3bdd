//! # SortOfRemote NG – Pooled FTP
//!
//! Shared FTP connections for services that move files on behalf of many
//! concurrent callers:
//!
//! - **Connection Pool** – bounded borrow/return with validation on borrow,
//!   return and idle, hard/soft idle eviction, and pre-warming
//! - **Wire Client** – async RFC 959 control channel with PASV/EPSV/PORT/EPRT
//!   data channels and Unix/Windows `LIST` parsing
//! - **Path Codec** – renders path segments in the server's charset and
//!   relabels the bytes for a Latin-1 control channel
//! - **Directory Ensure** – creates and enters remote hierarchies segment by
//!   segment
//! - **Transfer Service** – upload, download, delete, list and read-lines,
//!   each a single borrow/release cycle with bounded acquisition retries

pub mod ftp;
