//! Low-level FTP command/response codec (RFC 959 §4).
//!
//! Handles:
//! - Rendering command text through the configured control encoding
//! - Reading single-line and multi-line replies, each line bounded by the
//!   configured I/O timeout
//! - Parsing the 3-digit reply code

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::{ControlEncoding, FtpResponse};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// The FTP command/response codec operating on split halves.
pub struct FtpCodec {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    encoding: ControlEncoding,
    io_timeout: Duration,
}

impl FtpCodec {
    pub fn new(stream: TcpStream, encoding: ControlEncoding, io_timeout: Duration) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: BufReader::new(rd),
            writer: wr,
            encoding,
            io_timeout,
        }
    }

    pub fn encoding(&self) -> ControlEncoding {
        self.encoding
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Send a raw FTP command (without trailing CRLF, which is appended here).
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let mut line = self.encoding.encode(cmd)?;
        line.extend_from_slice(b"\r\n");
        timeout(self.io_timeout, self.writer.write_all(&line))
            .await
            .map_err(|_| FtpError::timeout("Timed out writing command"))??;
        if cmd.starts_with("PASS ") {
            log::trace!(">>> PASS ****");
        } else {
            log::trace!(">>> {}", cmd);
        }
        Ok(())
    }

    /// Read a single line from the control channel, CRLF stripped.
    async fn read_line(&mut self) -> FtpResult<String> {
        let mut buf = Vec::new();
        let n = timeout(self.io_timeout, self.reader.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| FtpError::timeout("Timed out waiting for server reply"))??;
        if n == 0 {
            return Err(FtpError::disconnected("Server closed connection"));
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(self.encoding.decode(&buf))
    }

    /// Read a complete FTP response (possibly multi-line).
    ///
    /// Multi-line responses look like:
    /// ```text
    /// 220-Welcome to my FTP server
    /// 220-This is line 2
    /// 220 End of greeting
    /// ```
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;

        let is_multi = first.as_bytes().get(3) == Some(&b'-');
        let mut lines = vec![first];
        if is_multi {
            let terminator = format!("{} ", code);
            loop {
                let next = self.read_line().await?;
                let done = next.starts_with(&terminator) || next == code.to_string();
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let resp = FtpResponse { code, lines };
        log::trace!("<<< {}", resp.lines.last().map(String::as_str).unwrap_or(""));
        Ok(resp)
    }

    /// Send a command and return the response.
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Send a command, expect a specific response-code class.
    pub async fn expect(&mut self, cmd: &str, expected_first_digit: u16) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        if resp.code / 100 != expected_first_digit {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(resp)
    }

    /// Expect a 2xx reply.
    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.expect(cmd, 2).await
    }

    /// Close the write side; the socket is released when the codec drops.
    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Parse the 3-digit reply code from the start of a line.
fn parse_code(line: &str) -> FtpResult<u16> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| FtpError::protocol_error(format!("Invalid reply line: '{}'", line)))?;
    digits
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error(format!("Invalid reply code in: '{}'", line)))
}
