//! Stateful FTP client: owns the control connection and issues commands.
//!
//! Lifecycle: `open()` → greeting → `USER`/`PASS` → `TYPE` → `CWD /` → ready.
//! The struct implements [`FtpSession`], which is all the pool and the
//! transfer service ever see of it.

use crate::ftp::connection;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser;
use crate::ftp::protocol::FtpCodec;
use crate::ftp::session::FtpSession;
use crate::ftp::transfer::{self, PendingData};
use crate::ftp::types::*;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use uuid::Uuid;

/// Book-keeping about a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub server_banner: Option<String>,
    pub transfer_type: TransferType,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

impl ConnectionInfo {
    /// One-line description for logs.
    pub fn summary(&self) -> String {
        format!(
            "up {}s, {} B sent, {} B received, banner {:?}",
            (self.last_activity - self.connected_at).num_seconds(),
            self.bytes_uploaded,
            self.bytes_downloaded,
            self.server_banner.as_deref().unwrap_or("")
        )
    }
}

/// A connected, authenticated FTP control session.
pub struct FtpConnection {
    pub id: String,
    codec: FtpCodec,
    config: Arc<FtpConnectionConfig>,
    pub info: ConnectionInfo,
}

impl FtpConnection {
    /// Dial, authenticate and apply the post-connect configuration.
    ///
    /// Every failure after the socket opened shuts it down before the
    /// error is returned.
    pub async fn open(config: Arc<FtpConnectionConfig>) -> FtpResult<Self> {
        config.validate()?;

        let (mut codec, banner) = connection::connect(&config).await?;

        if let Err(e) = Self::login(&mut codec, &config).await {
            codec.shutdown().await;
            return Err(e);
        }

        if let Err(e) = codec.expect_ok(config.transfer_type.command()).await {
            codec.shutdown().await;
            return Err(e);
        }

        // Reused connections are reset to `/` on release; fresh ones start there too.
        match codec.execute("CWD /").await {
            Ok(resp) if resp.is_completion() => {}
            Ok(resp) => {
                codec.shutdown().await;
                return Err(FtpError::protocol_error(format!(
                    "Cannot enter the root directory: {}",
                    resp.text()
                ))
                .with_code(resp.code));
            }
            Err(e) => {
                codec.shutdown().await;
                return Err(e);
            }
        }

        let now = Utc::now();
        let info = ConnectionInfo {
            connected: true,
            server_banner: Some(banner.text()),
            transfer_type: config.transfer_type,
            connected_at: now,
            last_activity: now,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
        };

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            codec,
            config,
            info,
        })
    }

    async fn login(codec: &mut FtpCodec, config: &FtpConnectionConfig) -> FtpResult<()> {
        let user_resp = codec.execute(&format!("USER {}", config.username)).await?;
        if user_resp.code == 331 || user_resp.code == 332 {
            let pass_resp = codec.execute(&format!("PASS {}", config.password)).await?;
            if !pass_resp.is_completion() {
                log::warn!(
                    "FTP login failed for user '{}' on {}:{}",
                    config.username,
                    config.host,
                    config.port
                );
                return Err(FtpError::auth_failed(format!("Login failed: {}", pass_resp.text()))
                    .with_code(pass_resp.code));
            }
        } else if !user_resp.is_completion() {
            return Err(FtpError::auth_failed(format!("USER rejected: {}", user_resp.text()))
                .with_code(user_resp.code));
        }
        Ok(())
    }

    pub fn config(&self) -> &FtpConnectionConfig {
        &self.config
    }

    fn touch(&mut self) {
        self.info.last_activity = Utc::now();
    }

    fn io_timeout(&self) -> Duration {
        self.config.io_timeout()
    }

    async fn open_data_channel(&mut self) -> FtpResult<PendingData> {
        let io_timeout = self.io_timeout();
        transfer::open_data_channel(
            &mut self.codec,
            self.config.data_channel_mode,
            &self.config.host,
            io_timeout,
            self.config.active_bind_address.as_deref(),
        )
        .await
    }

    /// Prepare the data channel and issue a transfer command. Returns the
    /// connected data stream and whether the server still owes a
    /// completion reply.
    async fn begin_transfer(&mut self, cmd: &str) -> FtpResult<(TcpStream, bool)> {
        let pending = self.open_data_channel().await?;
        let resp = self.codec.execute(cmd).await?;
        if !resp.is_preliminary() && !resp.is_completion() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        let data = pending.into_stream(self.io_timeout()).await?;
        Ok((data, resp.is_preliminary()))
    }

    async fn finish_transfer(&mut self, awaiting_reply: bool) -> FtpResult<()> {
        if awaiting_reply {
            let done = self.codec.read_response().await?;
            if !done.is_completion() {
                return Err(FtpError::from_reply(done.code, &done.text()));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FtpSession for FtpConnection {
    async fn noop(&mut self) -> FtpResult<()> {
        self.codec.expect_ok("NOOP").await?;
        self.touch();
        Ok(())
    }

    async fn change_dir(&mut self, path: &str) -> FtpResult<bool> {
        let resp = self.codec.execute(&format!("CWD {}", path)).await?;
        self.touch();
        Ok(resp.is_completion())
    }

    async fn current_dir(&mut self) -> FtpResult<String> {
        let resp = self.codec.expect_ok("PWD").await?;
        self.touch();
        parse_pwd(&resp.text())
    }

    async fn make_dir(&mut self, path: &str) -> FtpResult<bool> {
        let resp = self.codec.execute(&format!("MKD {}", path)).await?;
        self.touch();
        Ok(resp.is_completion())
    }

    async fn delete(&mut self, path: &str) -> FtpResult<bool> {
        let resp = self.codec.execute(&format!("DELE {}", path)).await?;
        self.touch();
        Ok(resp.is_completion())
    }

    async fn list(&mut self, path: Option<&str>) -> FtpResult<Vec<FileMetadata>> {
        let cmd = match path {
            Some(p) => format!("LIST {}", p),
            None => "LIST".to_string(),
        };
        let (mut data, awaiting) = self.begin_transfer(&cmd).await?;

        let mut raw = Vec::new();
        timeout(self.io_timeout(), data.read_to_end(&mut raw))
            .await
            .map_err(|_| FtpError::stream_incomplete("LIST data timed out"))?
            .map_err(|e| FtpError::stream_incomplete(format!("LIST data: {}", e)))?;
        drop(data);

        self.finish_transfer(awaiting).await?;
        self.touch();
        Ok(parser::parse_listing(&self.codec.encoding().decode(&raw)))
    }

    async fn set_transfer_type(&mut self, transfer_type: TransferType) -> FtpResult<()> {
        if self.info.transfer_type != transfer_type {
            self.codec.expect_ok(transfer_type.command()).await?;
            self.info.transfer_type = transfer_type;
        }
        Ok(())
    }

    async fn store(
        &mut self,
        path: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> FtpResult<u64> {
        let (mut data, awaiting) = self.begin_transfer(&format!("STOR {}", path)).await?;

        let sent = pump(source, &mut data, self.config.buffer_size, self.io_timeout())
            .await
            .map_err(|e| FtpError::stream_incomplete(format!("STOR {}: {}", path, e)))?;
        timeout(self.io_timeout(), data.shutdown())
            .await
            .map_err(|_| FtpError::stream_incomplete("Closing STOR data channel timed out"))?
            .map_err(|e| FtpError::stream_incomplete(format!("Closing STOR data channel: {}", e)))?;
        drop(data);

        self.finish_transfer(awaiting).await?;
        self.info.bytes_uploaded += sent;
        self.touch();
        Ok(sent)
    }

    async fn retrieve(
        &mut self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> FtpResult<u64> {
        let (mut data, awaiting) = self.begin_transfer(&format!("RETR {}", path)).await?;

        let received = pump(&mut data, sink, self.config.buffer_size, self.io_timeout())
            .await
            .map_err(|e| FtpError::stream_incomplete(format!("RETR {}: {}", path, e)))?;
        drop(data);

        self.finish_transfer(awaiting).await?;
        self.info.bytes_downloaded += received;
        self.touch();
        Ok(received)
    }

    async fn logout(&mut self) -> FtpResult<()> {
        let result = self.codec.expect_ok("QUIT").await.map(|_| ());
        self.info.connected = false;
        result
    }

    async fn disconnect(&mut self) {
        self.codec.shutdown().await;
        self.info.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.info.connected
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

/// Copy `reader` into `writer` in `chunk`-sized pieces, each read and
/// write bounded by `io_timeout`. Flushes the writer at EOF.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    chunk: usize,
    io_timeout: Duration,
) -> Result<u64, String>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk.max(1)];
    let mut total = 0u64;
    loop {
        let n = timeout(io_timeout, reader.read(&mut buf))
            .await
            .map_err(|_| "read timed out".to_string())?
            .map_err(|e| format!("read failed: {}", e))?;
        if n == 0 {
            break;
        }
        timeout(io_timeout, writer.write_all(&buf[..n]))
            .await
            .map_err(|_| "write timed out".to_string())?
            .map_err(|e| format!("write failed: {}", e))?;
        total += n as u64;
    }
    timeout(io_timeout, writer.flush())
        .await
        .map_err(|_| "flush timed out".to_string())?
        .map_err(|e| format!("flush failed: {}", e))?;
    Ok(total)
}

/// Parse `257 "/some/path"` into the path string. Embedded quotes are
/// doubled per RFC 959.
fn parse_pwd(text: &str) -> FtpResult<String> {
    let start = text
        .find('"')
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PWD: {}", text)))?;
    let mut out = String::new();
    let mut chars = text[start + 1..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                out.push('"');
            } else {
                return Ok(out);
            }
        } else {
            out.push(c);
        }
    }
    Err(FtpError::protocol_error(format!("Cannot parse PWD: {}", text)))
}
