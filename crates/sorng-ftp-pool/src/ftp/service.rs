//! High-level transfer operations over the pool.
//!
//! Every operation is one borrow → use → release cycle. Release resets the
//! working directory to `/` before the connection goes back to the pool;
//! if that fails, or the operation hit a session-fatal error, the
//! connection is invalidated instead.

use crate::ftp::directory::ensure_directory;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::factory::{ConnectionFactory, FtpConnectionFactory};
use crate::ftp::path_codec::{normalize_path, PathCodec, RemotePath};
use crate::ftp::pool::{Pool, Pooled};
use crate::ftp::session::FtpSession;
use crate::ftp::types::*;
use bytes::Bytes;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Shared handle for hosts running the TCP-backed service.
pub type FtpServiceState = Arc<FtpTransferService<FtpConnectionFactory>>;

pub struct FtpTransferService<F: ConnectionFactory> {
    config: FtpServiceConfig,
    codec: PathCodec,
    pool: Option<Pool<F>>,
}

impl FtpTransferService<FtpConnectionFactory> {
    /// Build the TCP-backed service from host configuration.
    pub async fn connect(config: FtpServiceConfig) -> FtpResult<Self> {
        let factory = FtpConnectionFactory::new(config.connection.clone());
        Self::start(factory, config).await
    }
}

impl<F> FtpTransferService<F>
where
    F: ConnectionFactory,
    F::Connection: FtpSession,
{
    /// Validate configuration, build the pool, pre-warm `initial_size`
    /// connections and start the evictor. A disabled configuration yields
    /// a service that refuses every operation.
    pub async fn start(factory: F, config: FtpServiceConfig) -> FtpResult<Self> {
        config.validate()?;
        let codec = PathCodec::for_connection(&config.connection)?;

        if !config.enabled {
            info!("FTP service disabled by configuration");
            return Ok(Self {
                config,
                codec,
                pool: None,
            });
        }

        let pool = Pool::new(factory, config.pool.clone())?;
        pool.pre_warm(config.pool.initial_size).await;
        pool.start_evictor();
        info!(
            "FTP service ready for {}:{} (charset {})",
            config.connection.host,
            config.connection.port,
            codec.charset_name()
        );

        Ok(Self {
            config,
            codec,
            pool: Some(pool),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    pub fn config(&self) -> &FtpServiceConfig {
        &self.config
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    pub fn pool(&self) -> Option<&Pool<F>> {
        self.pool.as_ref()
    }

    pub fn stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(Pool::stats)
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }

    fn pool_or_unavailable(&self) -> FtpResult<&Pool<F>> {
        self.pool
            .as_ref()
            .ok_or_else(|| FtpError::pool_unavailable("FTP service is disabled"))
    }

    // ─── Connection envelope ─────────────────────────────────────

    /// Borrow with bounded retries. Transient failures are retried after
    /// `borrow_backoff_ms`; anything left over becomes `PoolUnavailable`.
    pub async fn acquire(&self) -> FtpResult<Pooled<F>> {
        let pool = self.pool_or_unavailable()?;
        let attempts = self.config.borrow_attempts.max(1);
        let backoff = Duration::from_millis(self.config.borrow_backoff_ms);

        let mut last = None;
        for attempt in 1..=attempts {
            match pool.borrow().await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    log::warn!("FTP borrow attempt {}/{} failed: {}", attempt, attempts, e);
                    let retry = e.is_transient() && attempt < attempts;
                    last = Some(e);
                    if !retry {
                        break;
                    }
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        let err = FtpError::pool_unavailable("Could not get an FTP connection from the pool");
        Err(match last {
            Some(cause) => err.caused_by(cause),
            None => err,
        })
    }

    /// Reset to `/` and return, or invalidate if the reset fails.
    pub async fn release(&self, mut conn: Pooled<F>) {
        let Some(pool) = &self.pool else { return };
        match conn.change_dir("/").await {
            Ok(true) => pool.release(conn).await,
            Ok(false) => {
                log::warn!("Could not reset FTP working directory; destroying connection");
                pool.invalidate(conn).await;
            }
            Err(e) => {
                log::warn!("Resetting FTP working directory failed: {}; destroying connection", e);
                pool.invalidate(conn).await;
            }
        }
    }

    /// Route the connection according to the operation's outcome. The
    /// outcome itself is passed through unchanged.
    async fn finish<T>(&self, conn: Pooled<F>, result: FtpResult<T>) -> FtpResult<T> {
        match &result {
            Err(e) if e.is_session_fatal() => {
                log::warn!("FTP session unusable after error ({}); invalidating", e);
                if let Some(pool) = &self.pool {
                    pool.invalidate(conn).await;
                }
            }
            _ => self.release(conn).await,
        }
        result
    }

    fn wire_path(&self, path: &RemotePath) -> FtpResult<String> {
        self.codec.encode_path(path)
    }

    // ─── Upload ──────────────────────────────────────────────────

    /// Upload a local file as `dir/name`, creating `dir` as needed.
    pub async fn upload_file(
        &self,
        dir: &str,
        name: &str,
        local: impl AsRef<Path>,
    ) -> FtpResult<u64> {
        let local = local.as_ref();
        let file = tokio::fs::File::open(local).await.map_err(|e| {
            FtpError::io_error(format!("Cannot open local file {}: {}", local.display(), e))
        })?;
        self.upload_stream(dir, name, file).await
    }

    /// Upload everything `reader` yields as `dir/name`. The reader is
    /// consumed and dropped on every outcome.
    ///
    /// A relative `dir` resolves against `/`: every connection handed out
    /// by the pool starts there.
    pub async fn upload_stream<R>(&self, dir: &str, name: &str, mut reader: R) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.pool_or_unavailable()?;
        let wire_name = self.codec.encode_segment(name)?;
        info!("FTP upload of '{}' into '{}' started", name, dir);

        let mut conn = self.acquire().await?;
        let result = upload_on(&mut *conn, &self.codec, dir, &wire_name, &mut reader).await;
        let result = self.finish(conn, result).await;
        drop(reader);

        match &result {
            Ok(n) => info!("FTP upload of '{}' finished ({} bytes)", name, n),
            Err(e) => log::error!("FTP upload of '{}' failed: {}", name, e),
        }
        result
    }

    // ─── Download ────────────────────────────────────────────────

    /// Find `name` in `dir` (case-insensitively) and store it as
    /// `local_dir/<remote name>`. `Ok(false)` when no entry matches.
    pub async fn download_file(
        &self,
        dir: &str,
        name: &str,
        local_dir: impl AsRef<Path>,
    ) -> FtpResult<bool> {
        self.pool_or_unavailable()?;
        let wire_dir = self.wire_path(&normalize_path(dir))?;
        let local_dir = local_dir.as_ref();
        info!("FTP download of '{}' from '{}' started", name, dir);

        let mut conn = self.acquire().await?;
        let result = self
            .download_file_on(&mut *conn, &wire_dir, name, local_dir)
            .await;
        self.finish(conn, result).await
    }

    async fn download_file_on(
        &self,
        session: &mut F::Connection,
        wire_dir: &str,
        name: &str,
        local_dir: &Path,
    ) -> FtpResult<bool> {
        if !wire_dir.is_empty() && !session.change_dir(wire_dir).await? {
            return Err(FtpError::not_found(format!("Remote directory '{}' not found", wire_dir)));
        }
        let wanted = name.to_lowercase();
        let entry = session
            .list(None)
            .await?
            .into_iter()
            .find(|e| !e.is_dir() && self.codec.decode_segment(&e.name).to_lowercase() == wanted);
        let Some(entry) = entry else {
            info!("FTP download: no entry named '{}'", name);
            return Ok(false);
        };

        let target: PathBuf = local_dir.join(self.codec.decode_segment(&entry.name));
        let mut file = tokio::fs::File::create(&target).await.map_err(|e| {
            FtpError::io_error(format!("Cannot create local file {}: {}", target.display(), e))
        })?;
        match session.retrieve(&entry.name, &mut file).await {
            Ok(n) => {
                info!("FTP download stored {} ({} bytes)", target.display(), n);
                Ok(true)
            }
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&target).await;
                Err(e)
            }
        }
    }

    /// Fully buffered download of `dir/name`.
    pub async fn download_stream(&self, dir: &str, name: &str) -> FtpResult<Bytes> {
        let mut buf = Vec::new();
        self.download_to_writer(dir, name, &mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Copy `dir/name` into a caller-owned sink. The data channel is
    /// drained and the completion reply read before the connection goes
    /// back; otherwise it is invalidated.
    pub async fn download_to_writer<W>(&self, dir: &str, name: &str, sink: &mut W) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.pool_or_unavailable()?;
        let wire = self.wire_path(&normalize_path(dir).join(name))?;

        let mut conn = self.acquire().await?;
        let result = conn.retrieve(&wire, sink).await;
        let result = self.finish(conn, result).await;
        if let Err(e) = &result {
            log::error!("FTP download of '{}' failed: {}", name, e);
        }
        result
    }

    /// Read a remote UTF-8 text file as trimmed, non-empty lines.
    pub async fn read_lines(&self, path: &str) -> FtpResult<Vec<String>> {
        self.pool_or_unavailable()?;
        let wire = self.wire_path(&normalize_path(path))?;

        let mut buf = Vec::new();
        let mut conn = self.acquire().await?;
        let result = conn.retrieve(&wire, &mut buf).await;
        self.finish(conn, result).await?;

        Ok(String::from_utf8_lossy(&buf)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    // ─── Delete ──────────────────────────────────────────────────

    /// Delete the file at `path`: enter its directory, then `DELE` the
    /// name. `Ok(false)` when the directory or file is refused.
    pub async fn delete_file(&self, path: &str) -> FtpResult<bool> {
        self.pool_or_unavailable()?;
        let remote = normalize_path(path.trim());
        let (dir, name) = remote
            .split_last()
            .ok_or_else(|| FtpError::not_found(format!("'{}' does not name a file", path)))?;
        let wire_dir = self.wire_path(&dir)?;
        let wire_name = self.codec.encode_segment(name)?;

        let mut conn = self.acquire().await?;
        let result = delete_on(&mut *conn, &wire_dir, &wire_name).await;
        let result = self.finish(conn, result).await;
        match &result {
            Ok(true) => info!("FTP deleted '{}'", path),
            Ok(false) => info!("FTP delete of '{}' refused", path),
            Err(e) => log::error!("FTP delete of '{}' failed: {}", path, e),
        }
        result
    }

    // ─── Listing ─────────────────────────────────────────────────

    /// Non-empty files (size > 0) under `path`, names decoded.
    pub async fn list_files(&self, path: &str) -> FtpResult<Vec<FileMetadata>> {
        self.pool_or_unavailable()?;
        let wire = self.wire_path(&normalize_path(path))?;

        let mut conn = self.acquire().await?;
        let target = (!wire.is_empty()).then_some(wire.as_str());
        let result = conn.list(target).await;
        let entries = self.finish(conn, result).await?;

        Ok(entries
            .into_iter()
            .filter(|e| e.size > 0)
            .map(|mut e| {
                e.name = self.codec.decode_segment(&e.name);
                e
            })
            .collect())
    }

    pub async fn list_file_names(&self, path: &str) -> FtpResult<Vec<String>> {
        Ok(self
            .list_files(path)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    /// `list_files` filtered by a glob such as `*.csv`.
    pub async fn list_files_matching(&self, path: &str, pattern: &str) -> FtpResult<Vec<FileMetadata>> {
        let glob = glob::Pattern::new(pattern).map_err(|e| {
            FtpError::new(FtpErrorKind::InvalidConfig, format!("Bad pattern '{}': {}", pattern, e))
        })?;
        Ok(self
            .list_files(path)
            .await?
            .into_iter()
            .filter(|e| glob.matches(&e.name))
            .collect())
    }
}

async fn upload_on<S>(
    session: &mut S,
    codec: &PathCodec,
    dir: &str,
    wire_name: &str,
    reader: &mut (dyn AsyncRead + Unpin + Send),
) -> FtpResult<u64>
where
    S: FtpSession + ?Sized,
{
    session.set_transfer_type(TransferType::Binary).await?;
    let outcome = ensure_directory(session, codec, dir).await?;
    if !outcome.is_clean() {
        log::warn!("Upload directory '{}' ensured with failures: {:?}", dir, outcome.failed);
    }
    session.store(wire_name, reader).await
}

async fn delete_on<S>(session: &mut S, wire_dir: &str, wire_name: &str) -> FtpResult<bool>
where
    S: FtpSession + ?Sized,
{
    if !wire_dir.is_empty() && !session.change_dir(wire_dir).await? {
        return Ok(false);
    }
    session.delete(wire_name).await
}
