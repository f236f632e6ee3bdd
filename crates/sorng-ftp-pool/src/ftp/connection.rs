//! TCP transport: establishes the FTP control connection.
//!
//! Applies the connect timeout from `FtpConnectionConfig` and checks the
//! server greeting before anything else is sent.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::types::{FtpConnectionConfig, FtpResponse};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Open the control connection and return a ready-to-use codec **plus**
/// the server welcome banner.
///
/// A greeting that is not a positive completion (e.g. `421 Too many users`)
/// closes the socket and fails with `ConnectionFailed`.
pub async fn connect(config: &FtpConnectionConfig) -> FtpResult<(FtpCodec, FtpResponse)> {
    let addr = format!("{}:{}", config.host, config.port);

    let tcp = timeout(config.connect_timeout(), TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpError::connection_failed(format!("TCP connect to {} timed out", addr)))?
        .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;

    tcp.set_nodelay(true).ok();

    let mut codec = FtpCodec::new(tcp, config.control_encoding, config.io_timeout());
    let banner = match codec.read_response().await {
        Ok(b) => b,
        Err(e) => {
            codec.shutdown().await;
            return Err(FtpError::connection_failed(format!("No greeting from {}", addr))
                .caused_by(e));
        }
    };

    if !banner.is_completion() {
        codec.shutdown().await;
        log::warn!("FTP server {} refused connection, reply code {}", addr, banner.code);
        return Err(FtpError::connection_failed(format!(
            "Server refused connection: {}",
            banner.text()
        ))
        .with_code(banner.code));
    }

    Ok((codec, banner))
}
