//! Shared types for the FTP pool crate.

use crate::ftp::error::{FtpError, FtpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ─── Connection ──────────────────────────────────────────────────────

/// Transfer type (RFC 959 TYPE command).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferType {
    Ascii,
    Binary,
}

impl Default for TransferType {
    fn default() -> Self {
        Self::Binary
    }
}

impl TransferType {
    pub fn command(self) -> &'static str {
        match self {
            TransferType::Ascii => "TYPE A",
            TransferType::Binary => "TYPE I",
        }
    }
}

/// How the data channel is opened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DataChannelMode {
    Passive,
    ExtendedPassive,
    Active,
    ExtendedActive,
}

impl Default for DataChannelMode {
    fn default() -> Self {
        Self::Passive
    }
}

/// Text encoding of the control channel.
///
/// FTP's native command encoding is a single-byte Latin-1 family charset;
/// `Latin1` maps every char ≤ U+00FF to exactly one byte.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ControlEncoding {
    Latin1,
    Utf8,
}

impl Default for ControlEncoding {
    fn default() -> Self {
        Self::Latin1
    }
}

impl ControlEncoding {
    /// Render command text into wire bytes.
    pub fn encode(self, text: &str) -> FtpResult<Vec<u8>> {
        match self {
            ControlEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            ControlEncoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        FtpError::encoding(format!(
                            "'{}' (U+{:04X}) is outside the Latin-1 control charset",
                            c,
                            u32::from(c)
                        ))
                    })
                })
                .collect(),
        }
    }

    /// Decode wire bytes (replies, listings) into text. Never fails.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            ControlEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            ControlEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// Connection settings consumed by the connection factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub transfer_type: TransferType,
    #[serde(default)]
    pub data_channel_mode: DataChannelMode,
    /// Encoding used for command text and replies.
    #[serde(default)]
    pub control_encoding: ControlEncoding,
    /// WHATWG label of the charset path names are rendered in before
    /// being relabelled as Latin-1 (e.g. "UTF-8", "GBK").
    #[serde(default = "default_source_charset")]
    pub source_charset: String,
    /// Chunk size for data-channel copies, in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,
    /// Read/write timeout on control and data channels, in seconds.
    #[serde(default = "default_data_timeout")]
    pub data_timeout_sec: u64,
    /// Local address to bind for active-mode data connections.
    #[serde(default)]
    pub active_bind_address: Option<String>,
}

fn default_port() -> u16 {
    21
}
fn default_username() -> String {
    "anonymous".into()
}
fn default_source_charset() -> String {
    "UTF-8".into()
}
fn default_buffer_size() -> usize {
    1024
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_data_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for FtpConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: default_username(),
            password: "anonymous@".into(),
            transfer_type: TransferType::Binary,
            data_channel_mode: DataChannelMode::Passive,
            control_encoding: ControlEncoding::Latin1,
            source_charset: default_source_charset(),
            buffer_size: default_buffer_size(),
            connect_timeout_sec: default_connect_timeout(),
            data_timeout_sec: default_data_timeout(),
            active_bind_address: None,
        }
    }
}

impl FtpConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.data_timeout_sec)
    }

    pub fn validate(&self) -> FtpResult<()> {
        if self.host.trim().is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }
        if self.port == 0 {
            return Err(FtpError::invalid_config("Port must not be 0"));
        }
        if self.buffer_size == 0 {
            return Err(FtpError::invalid_config("Buffer size must be positive"));
        }
        Ok(())
    }
}

// ─── Pool ────────────────────────────────────────────────────────────

/// Sizing, eviction and validation policy of the connection pool.
/// Immutable once the pool is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Connections created synchronously when the service starts.
    #[serde(default)]
    pub initial_size: usize,
    /// Idle floor kept warm by the evictor.
    #[serde(default)]
    pub min_idle: usize,
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    /// Upper bound on live connections (idle + checked out).
    #[serde(default = "default_max_total")]
    pub max_total: usize,
    /// Hard idle timeout: idle connections older than this are always evicted.
    #[serde(default = "default_min_evictable_idle")]
    pub min_evictable_idle_ms: u64,
    /// Soft idle timeout: evicts only while idle count exceeds `min_idle`.
    #[serde(default = "default_soft_min_evictable_idle")]
    pub soft_min_evictable_idle_ms: u64,
    /// Eviction interval (0 disables the evictor).
    #[serde(default = "default_eviction_interval")]
    pub time_between_eviction_runs_ms: u64,
    #[serde(default = "default_true")]
    pub test_on_borrow: bool,
    #[serde(default = "default_true")]
    pub test_on_return: bool,
    #[serde(default = "default_true")]
    pub test_while_idle: bool,
    /// How long `borrow()` waits for capacity before `PoolExhausted`.
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,
    /// Reuse the most recently returned connection first.
    #[serde(default = "default_true")]
    pub lifo: bool,
}

fn default_max_idle() -> usize {
    8
}
fn default_max_total() -> usize {
    8
}
fn default_min_evictable_idle() -> u64 {
    60_000
}
fn default_soft_min_evictable_idle() -> u64 {
    50_000
}
fn default_eviction_interval() -> u64 {
    30_000
}
fn default_max_wait() -> u64 {
    10_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 0,
            min_idle: 0,
            max_idle: default_max_idle(),
            max_total: default_max_total(),
            min_evictable_idle_ms: default_min_evictable_idle(),
            soft_min_evictable_idle_ms: default_soft_min_evictable_idle(),
            time_between_eviction_runs_ms: default_eviction_interval(),
            test_on_borrow: true,
            test_on_return: true,
            test_while_idle: true,
            max_wait_ms: default_max_wait(),
            lifo: true,
        }
    }
}

impl PoolConfig {
    pub fn min_evictable_idle(&self) -> Duration {
        Duration::from_millis(self.min_evictable_idle_ms)
    }

    pub fn soft_min_evictable_idle(&self) -> Duration {
        Duration::from_millis(self.soft_min_evictable_idle_ms)
    }

    pub fn eviction_interval(&self) -> Option<Duration> {
        (self.time_between_eviction_runs_ms > 0)
            .then(|| Duration::from_millis(self.time_between_eviction_runs_ms))
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn validate(&self) -> FtpResult<()> {
        if self.max_total == 0 {
            return Err(FtpError::invalid_config("maxTotal must be at least 1"));
        }
        if self.max_idle > self.max_total {
            return Err(FtpError::invalid_config(format!(
                "maxIdle ({}) exceeds maxTotal ({})",
                self.max_idle, self.max_total
            )));
        }
        if self.min_idle > self.max_idle {
            return Err(FtpError::invalid_config(format!(
                "minIdle ({}) exceeds maxIdle ({})",
                self.min_idle, self.max_idle
            )));
        }
        Ok(())
    }
}

/// Statistics about the connection pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub idle: usize,
    pub checked_out: usize,
    /// Live connections, including ones currently being created.
    pub total: usize,
    pub max_total: usize,
    pub created: u64,
    pub destroyed: u64,
    pub borrowed: u64,
    pub closed: bool,
}

// ─── Service ─────────────────────────────────────────────────────────

/// Everything the transfer service needs, as handed over by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpServiceConfig {
    /// When false every operation fails with `PoolUnavailable`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub connection: FtpConnectionConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// `borrow()` attempts made by `acquire()` before giving up.
    #[serde(default = "default_borrow_attempts")]
    pub borrow_attempts: u32,
    /// Pause between acquisition attempts.
    #[serde(default = "default_borrow_backoff")]
    pub borrow_backoff_ms: u64,
}

fn default_borrow_attempts() -> u32 {
    3
}
fn default_borrow_backoff() -> u64 {
    200
}

impl FtpServiceConfig {
    pub fn new(connection: FtpConnectionConfig) -> Self {
        Self {
            enabled: true,
            connection,
            pool: PoolConfig::default(),
            borrow_attempts: default_borrow_attempts(),
            borrow_backoff_ms: default_borrow_backoff(),
        }
    }

    /// Parse the JSON shape produced by the host's settings layer.
    pub fn from_json(raw: &str) -> FtpResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| FtpError::invalid_config(format!("Invalid FTP settings: {}", e)))
    }

    pub fn validate(&self) -> FtpResult<()> {
        self.connection.validate()?;
        self.pool.validate()?;
        if self.borrow_attempts == 0 {
            return Err(FtpError::invalid_config("borrowAttempts must be at least 1"));
        }
        Ok(())
    }
}

// ─── FTP Response ────────────────────────────────────────────────────

/// A single FTP response (may be multi-line).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    /// Full response text (all lines joined).
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

// ─── Directory Listing ───────────────────────────────────────────────

/// Type of a remote filesystem entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// One parsed entry of a remote directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub link_target: Option<String>,
    /// Raw line from the server.
    pub raw: Option<String>,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, kind: FileKind, size: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            size,
            modified: None,
            permissions: None,
            owner: None,
            group: None,
            link_target: None,
            raw: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

// ─── Directory ensure ────────────────────────────────────────────────

/// What `ensure_directory` did, segment by segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureOutcome {
    /// The full target was navigable straight away.
    pub already_present: bool,
    /// Accumulated paths created by this call.
    pub created: Vec<String>,
    /// Accumulated paths found to exist already.
    pub existing: Vec<String>,
    /// Accumulated paths whose creation failed but were navigated anyway.
    pub failed: Vec<String>,
}

impl EnsureOutcome {
    /// True when no segment needed best-effort continuation.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
