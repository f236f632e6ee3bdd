//! The FTP session capability used by the pool, the directory ensurer and
//! the transfer operations.
//!
//! Path and file-name arguments are *wire* strings: already transcoded by
//! the path codec. Implementations must not re-encode them beyond the
//! control-channel encoding.

use crate::ftp::error::FtpResult;
use crate::ftp::types::{FileMetadata, TransferType};
use tokio::io::{AsyncRead, AsyncWrite};

/// One stateful control connection to an FTP server.
///
/// Navigation and creation commands report a rejected reply as `Ok(false)`
/// so callers can continue best-effort; transport failures are `Err`.
#[async_trait::async_trait]
pub trait FtpSession: Send {
    /// `NOOP`.
    async fn noop(&mut self) -> FtpResult<()>;

    /// `CWD`; `Ok(false)` when the server rejects the directory.
    async fn change_dir(&mut self, path: &str) -> FtpResult<bool>;

    /// `PWD`.
    async fn current_dir(&mut self) -> FtpResult<String>;

    /// `MKD`; `Ok(false)` when the server refuses.
    async fn make_dir(&mut self, path: &str) -> FtpResult<bool>;

    /// `DELE`; `Ok(false)` when the server refuses.
    async fn delete(&mut self, path: &str) -> FtpResult<bool>;

    /// `LIST` of `path` (or the working directory).
    async fn list(&mut self, path: Option<&str>) -> FtpResult<Vec<FileMetadata>>;

    /// `TYPE`.
    async fn set_transfer_type(&mut self, transfer_type: TransferType) -> FtpResult<()>;

    /// `STOR`: copy `source` to the server until EOF, then wait for the
    /// completion reply. Returns bytes sent.
    async fn store(
        &mut self,
        path: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> FtpResult<u64>;

    /// `RETR`: drain the data channel into `sink` and read the completion
    /// reply. Any failure after the data channel opened is reported as
    /// `StreamIncomplete`. Returns bytes received.
    async fn retrieve(
        &mut self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> FtpResult<u64>;

    /// `QUIT`.
    async fn logout(&mut self) -> FtpResult<()>;

    /// Close the socket. Must succeed even if the session is broken.
    async fn disconnect(&mut self);

    /// Whether the session still believes it is connected.
    fn is_connected(&self) -> bool;
}
