//! Data-channel management for FTP transfers.
//!
//! Supports four modes (RFC 959 + RFC 2428):
//! - **PASV**: server opens a port, client connects
//! - **EPSV**: extended passive (IPv6-ready)
//! - **PORT**: client opens a port, tells server
//! - **EPRT**: extended active (IPv6-ready)
//!
//! Active modes hand back a `PendingData::Listening` because the server
//! only connects after the transfer command has been sent.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::types::DataChannelMode;
use lazy_static::lazy_static;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

lazy_static! {
    static ref PASV_RE: Regex =
        Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").expect("valid PASV regex");
    static ref EPSV_RE: Regex = Regex::new(r"\|\|\|(\d+)\|").expect("valid EPSV regex");
}

/// A data channel that is either already connected (passive) or waiting
/// for the server to connect (active).
pub enum PendingData {
    Connected(TcpStream),
    Listening(TcpListener),
}

impl PendingData {
    /// Resolve into a connected stream. Call after the transfer command
    /// has been accepted by the server.
    pub async fn into_stream(self, data_timeout: Duration) -> FtpResult<TcpStream> {
        match self {
            PendingData::Connected(tcp) => Ok(tcp),
            PendingData::Listening(listener) => {
                let (tcp, _) = timeout(data_timeout, listener.accept())
                    .await
                    .map_err(|_| FtpError::data_channel("Active-mode accept timed out"))?
                    .map_err(|e| FtpError::data_channel(format!("Active-mode accept: {}", e)))?;
                Ok(tcp)
            }
        }
    }
}

/// Prepare a data channel according to the configured mode.
pub async fn open_data_channel(
    codec: &mut FtpCodec,
    mode: DataChannelMode,
    host: &str,
    data_timeout: Duration,
    active_bind: Option<&str>,
) -> FtpResult<PendingData> {
    match mode {
        DataChannelMode::Passive => open_pasv(codec, data_timeout).await.map(PendingData::Connected),
        DataChannelMode::ExtendedPassive => open_epsv(codec, host, data_timeout)
            .await
            .map(PendingData::Connected),
        DataChannelMode::Active => open_port(codec, active_bind).await.map(PendingData::Listening),
        DataChannelMode::ExtendedActive => {
            open_eprt(codec, active_bind).await.map(PendingData::Listening)
        }
    }
}

// ─── PASV ────────────────────────────────────────────────────────────

/// Issue `PASV`, parse the response, connect to the returned address.
///
/// Response format: `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
async fn open_pasv(codec: &mut FtpCodec, data_timeout: Duration) -> FtpResult<TcpStream> {
    let resp = codec.expect_ok("PASV").await?;
    let addr = parse_pasv_response(&resp.text())?;
    connect_data(addr.to_string(), data_timeout, "PASV").await
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 response.
pub(crate) fn parse_pasv_response(text: &str) -> FtpResult<SocketAddr> {
    let caps = PASV_RE
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV: {}", text)))?;

    let nums = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::protocol_error("PASV number out of range"))
        })
        .collect::<FtpResult<Vec<u8>>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok(SocketAddr::new(ip, port))
}

// ─── EPSV ────────────────────────────────────────────────────────────

/// Issue `EPSV`, parse port, connect to the *same host* on that port.
///
/// Response format: `229 Entering Extended Passive Mode (|||port|)`
async fn open_epsv(codec: &mut FtpCodec, host: &str, data_timeout: Duration) -> FtpResult<TcpStream> {
    let resp = codec.expect_ok("EPSV").await?;
    let port = parse_epsv_response(&resp.text())?;
    connect_data(format!("{}:{}", host, port), data_timeout, "EPSV").await
}

pub(crate) fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    let caps = EPSV_RE
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse EPSV: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error("EPSV port out of range"))
}

async fn connect_data(addr: String, data_timeout: Duration, mode: &str) -> FtpResult<TcpStream> {
    timeout(data_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpError::data_channel(format!("{} data connect timed out", mode)))?
        .map_err(|e| FtpError::data_channel(format!("{} data connect to {}: {}", mode, addr, e)))
}

// ─── PORT / EPRT ─────────────────────────────────────────────────────

async fn bind_listener(bind_addr: Option<&str>) -> FtpResult<(TcpListener, SocketAddr)> {
    let bind = bind_addr.unwrap_or("0.0.0.0");
    let listener = TcpListener::bind(format!("{}:0", bind))
        .await
        .map_err(|e| FtpError::data_channel(format!("Data listener bind: {}", e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| FtpError::data_channel(format!("Data listener address: {}", e)))?;
    Ok((listener, local))
}

/// Bind a local TCP listener and announce it via `PORT h1,h2,h3,h4,p1,p2`.
async fn open_port(codec: &mut FtpCodec, bind_addr: Option<&str>) -> FtpResult<TcpListener> {
    let (listener, local) = bind_listener(bind_addr).await?;
    let octets = match local.ip() {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(_) => return Err(FtpError::data_channel("PORT requires IPv4")),
    };
    let port = local.port();
    let cmd = format!(
        "PORT {},{},{},{},{},{}",
        octets[0],
        octets[1],
        octets[2],
        octets[3],
        port / 256,
        port % 256
    );
    codec.expect_ok(&cmd).await?;
    Ok(listener)
}

/// Bind a local listener and announce it via `EPRT |af|ip|port|`.
async fn open_eprt(codec: &mut FtpCodec, bind_addr: Option<&str>) -> FtpResult<TcpListener> {
    let (listener, local) = bind_listener(bind_addr).await?;
    let af = match local.ip() {
        IpAddr::V4(_) => 1,
        IpAddr::V6(_) => 2,
    };
    codec
        .expect_ok(&format!("EPRT |{}|{}|{}|", af, local.ip(), local.port()))
        .await?;
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pasv() {
        let addr = parse_pasv_response("227 Entering Passive Mode (192,168,1,10,195,80)").unwrap();
        assert_eq!(addr, "192.168.1.10:50000".parse().unwrap());
        assert!(parse_pasv_response("227 nonsense").is_err());
        assert!(parse_pasv_response("227 (300,1,1,1,1,1)").is_err());
    }

    #[test]
    fn test_parse_epsv() {
        assert_eq!(
            parse_epsv_response("229 Entering Extended Passive Mode (|||6446|)").unwrap(),
            6446
        );
        assert!(parse_epsv_response("229 ()").is_err());
    }
}
