//! In-memory FTP server and sessions, for tests and offline use.
//!
//! `MemoryFtpServer` holds a directory tree keyed by absolute wire path.
//! Every `MemorySession` shares it, keeps its own working directory, and
//! logs the commands it would have sent. `Faults` injects the failures a
//! real server or network produces.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::factory::{destroy_session, validate_session, ConnectionFactory};
use crate::ftp::session::FtpSession;
use crate::ftp::types::{FileKind, FileMetadata, TransferType};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

/// Failure switches shared by every session of one server.
#[derive(Default)]
pub struct Faults {
    noop: AtomicBool,
    noop_delay: Mutex<Option<Duration>>,
    logout: AtomicBool,
    cwd_root: AtomicBool,
    list: AtomicBool,
    reject_store: AtomicBool,
    retrieve_cut: Mutex<Option<usize>>,
    rejected_mkdirs: Mutex<HashSet<String>>,
}

impl Faults {
    /// `NOOP` answers `421`.
    pub fn fail_noop(&self, on: bool) {
        self.noop.store(on, Ordering::SeqCst);
    }

    /// `NOOP` takes `delay` before answering.
    pub fn slow_noop(&self, delay: Option<Duration>) {
        *lock(&self.noop_delay) = delay;
    }

    /// `QUIT` fails with a dropped connection.
    pub fn fail_logout(&self, on: bool) {
        self.logout.store(on, Ordering::SeqCst);
    }

    /// `CWD /` fails with a dropped connection.
    pub fn fail_cwd_root(&self, on: bool) {
        self.cwd_root.store(on, Ordering::SeqCst);
    }

    /// `LIST` answers `550 Permission denied`.
    pub fn fail_list(&self, on: bool) {
        self.list.store(on, Ordering::SeqCst);
    }

    /// `STOR` answers `553`.
    pub fn reject_store(&self, on: bool) {
        self.reject_store.store(on, Ordering::SeqCst);
    }

    /// `RETR` breaks off after `bytes` have been written to the sink.
    pub fn cut_retrieve_after(&self, bytes: Option<usize>) {
        *lock(&self.retrieve_cut) = bytes;
    }

    /// `MKD` of this absolute path answers `550`.
    pub fn reject_mkdir(&self, path: impl Into<String>) {
        lock(&self.rejected_mkdirs).insert(path.into());
    }
}

struct ServerInner {
    nodes: Mutex<BTreeMap<String, Node>>,
    commands: Mutex<Vec<String>>,
    faults: Faults,
    open_sessions: AtomicUsize,
    next_session: AtomicU64,
}

/// Shared in-memory directory tree.
#[derive(Clone)]
pub struct MemoryFtpServer {
    inner: Arc<ServerInner>,
}

impl Default for MemoryFtpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFtpServer {
    /// An empty server containing only `/`.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            inner: Arc::new(ServerInner {
                nodes: Mutex::new(nodes),
                commands: Mutex::new(Vec::new()),
                faults: Faults::default(),
                open_sessions: AtomicUsize::new(0),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Open a new logged-in session rooted at `/`.
    pub fn session(&self) -> MemorySession {
        self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
        MemorySession {
            id: self.inner.next_session.fetch_add(1, Ordering::SeqCst),
            server: self.clone(),
            cwd: "/".to_string(),
            connected: true,
            socket_open: true,
            transfer_type: TransferType::Binary,
        }
    }

    pub fn faults(&self) -> &Faults {
        &self.inner.faults
    }

    /// Create `path` and any missing parents.
    pub fn mkdirs(&self, path: &str) {
        let mut nodes = lock(&self.inner.nodes);
        let mut acc = String::new();
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            acc.push('/');
            acc.push_str(seg);
            nodes.entry(acc.clone()).or_insert(Node::Dir);
        }
    }

    /// Store a file, creating parent directories.
    pub fn put_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let abs = resolve("/", path);
        self.mkdirs(parent_of(&abs));
        lock(&self.inner.nodes).insert(abs, Node::File(data.into()));
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match lock(&self.inner.nodes).get(&resolve("/", path)) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(lock(&self.inner.nodes).get(&resolve("/", path)), Some(Node::Dir))
    }

    /// Every command issued so far, e.g. `"MKD a"`.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.inner.commands).clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.inner.commands).clear();
    }

    /// Sessions whose socket has not been closed.
    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    fn record(&self, cmd: String) {
        lock(&self.inner.commands).push(cmd);
    }

    fn node(&self, abs: &str) -> Option<Node> {
        lock(&self.inner.nodes).get(abs).cloned()
    }
}

/// Join `arg` onto `cwd`, resolving `.` and `..`.
fn resolve(cwd: &str, arg: &str) -> String {
    let base = if arg.starts_with('/') { "" } else { cwd };
    let mut segs: Vec<&str> = Vec::new();
    for seg in base.split('/').chain(arg.split('/')) {
        match seg {
            "" | "." => {}
            ".." => {
                segs.pop();
            }
            s => segs.push(s),
        }
    }
    format!("/{}", segs.join("/"))
}

fn parent_of(abs: &str) -> &str {
    match abs.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &abs[..i],
    }
}

/// One simulated control connection.
pub struct MemorySession {
    pub id: u64,
    server: MemoryFtpServer,
    cwd: String,
    connected: bool,
    socket_open: bool,
    transfer_type: TransferType,
}

impl MemorySession {
    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    fn ensure_connected(&self) -> FtpResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(FtpError::disconnected("Session is closed"))
        }
    }

    fn close_socket(&mut self) {
        if self.socket_open {
            self.socket_open = false;
            self.server.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close_socket();
    }
}

#[async_trait::async_trait]
impl FtpSession for MemorySession {
    async fn noop(&mut self) -> FtpResult<()> {
        self.ensure_connected()?;
        self.server.record("NOOP".into());
        let delay = *lock(&self.server.faults().noop_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.server.faults().noop.load(Ordering::SeqCst) {
            return Err(FtpError::from_reply(421, "Service not available"));
        }
        Ok(())
    }

    async fn change_dir(&mut self, path: &str) -> FtpResult<bool> {
        self.ensure_connected()?;
        self.server.record(format!("CWD {}", path));
        let abs = resolve(&self.cwd, path);
        if abs == "/" && self.server.faults().cwd_root.load(Ordering::SeqCst) {
            self.connected = false;
            return Err(FtpError::disconnected("Connection reset during CWD"));
        }
        match self.server.node(&abs) {
            Some(Node::Dir) => {
                self.cwd = abs;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current_dir(&mut self) -> FtpResult<String> {
        self.ensure_connected()?;
        self.server.record("PWD".into());
        Ok(self.cwd.clone())
    }

    async fn make_dir(&mut self, path: &str) -> FtpResult<bool> {
        self.ensure_connected()?;
        self.server.record(format!("MKD {}", path));
        let abs = resolve(&self.cwd, path);
        if lock(&self.server.faults().rejected_mkdirs).contains(&abs) {
            return Ok(false);
        }
        let mut nodes = lock(&self.server.inner.nodes);
        if nodes.contains_key(&abs) || !matches!(nodes.get(parent_of(&abs)), Some(Node::Dir)) {
            return Ok(false);
        }
        nodes.insert(abs, Node::Dir);
        Ok(true)
    }

    async fn delete(&mut self, path: &str) -> FtpResult<bool> {
        self.ensure_connected()?;
        self.server.record(format!("DELE {}", path));
        let abs = resolve(&self.cwd, path);
        let mut nodes = lock(&self.server.inner.nodes);
        if matches!(nodes.get(&abs), Some(Node::File(_))) {
            nodes.remove(&abs);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn list(&mut self, path: Option<&str>) -> FtpResult<Vec<FileMetadata>> {
        self.ensure_connected()?;
        self.server.record(match path {
            Some(p) => format!("LIST {}", p),
            None => "LIST".into(),
        });
        if self.server.faults().list.load(Ordering::SeqCst) {
            return Err(FtpError::from_reply(550, "Permission denied"));
        }
        let dir = resolve(&self.cwd, path.unwrap_or("."));
        let nodes = lock(&self.server.inner.nodes);
        if !matches!(nodes.get(&dir), Some(Node::Dir)) {
            return Err(FtpError::from_reply(550, "No such directory"));
        }
        Ok(nodes
            .iter()
            .filter(|(k, _)| k.as_str() != "/" && parent_of(k) == dir)
            .map(|(k, node)| {
                let name = &k[k.rfind('/').map_or(0, |i| i + 1)..];
                match node {
                    Node::Dir => FileMetadata::new(name, FileKind::Directory, 0),
                    Node::File(data) => FileMetadata::new(name, FileKind::File, data.len() as u64),
                }
            })
            .collect())
    }

    async fn set_transfer_type(&mut self, transfer_type: TransferType) -> FtpResult<()> {
        self.ensure_connected()?;
        self.server.record(transfer_type.command().into());
        self.transfer_type = transfer_type;
        Ok(())
    }

    async fn store(
        &mut self,
        path: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> FtpResult<u64> {
        self.ensure_connected()?;
        self.server.record(format!("STOR {}", path));
        let abs = resolve(&self.cwd, path);
        if self.server.faults().reject_store.load(Ordering::SeqCst)
            || !self.server.is_dir(parent_of(&abs))
        {
            return Err(FtpError::from_reply(553, "Could not create file"));
        }
        let mut data = Vec::new();
        source
            .read_to_end(&mut data)
            .await
            .map_err(|e| FtpError::stream_incomplete(format!("STOR {}: {}", path, e)))?;
        let len = data.len() as u64;
        lock(&self.server.inner.nodes).insert(abs, Node::File(data));
        Ok(len)
    }

    async fn retrieve(
        &mut self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> FtpResult<u64> {
        self.ensure_connected()?;
        self.server.record(format!("RETR {}", path));
        let data = match self.server.node(&resolve(&self.cwd, path)) {
            Some(Node::File(data)) => data,
            _ => return Err(FtpError::from_reply(550, "No such file")),
        };
        let cut = *lock(&self.server.faults().retrieve_cut);
        if let Some(limit) = cut {
            let n = limit.min(data.len());
            let _ = sink.write_all(&data[..n]).await;
            return Err(FtpError::stream_incomplete(format!(
                "RETR {}: data connection reset after {} bytes",
                path, n
            )));
        }
        sink.write_all(&data)
            .await
            .map_err(|e| FtpError::stream_incomplete(format!("RETR {}: {}", path, e)))?;
        sink.flush()
            .await
            .map_err(|e| FtpError::stream_incomplete(format!("RETR {}: {}", path, e)))?;
        Ok(data.len() as u64)
    }

    async fn logout(&mut self) -> FtpResult<()> {
        self.ensure_connected()?;
        self.server.record("QUIT".into());
        self.connected = false;
        if self.server.faults().logout.load(Ordering::SeqCst) {
            return Err(FtpError::disconnected("Connection reset during QUIT"));
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.close_socket();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ─── Factory ─────────────────────────────────────────────────────────

/// Factory handing out [`MemorySession`]s, with counters and injectable
/// creation failures.
pub struct MemoryConnectionFactory {
    server: MemoryFtpServer,
    created: AtomicU64,
    destroyed: AtomicU64,
    failing_creates: AtomicUsize,
    always_fail: AtomicBool,
}

impl MemoryConnectionFactory {
    pub fn new(server: MemoryFtpServer) -> Self {
        Self {
            server,
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            failing_creates: AtomicUsize::new(0),
            always_fail: AtomicBool::new(false),
        }
    }

    pub fn server(&self) -> &MemoryFtpServer {
        &self.server
    }

    /// Make the next `n` calls to `create` fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    pub fn fail_all_creates(&self, on: bool) {
        self.always_fail.store(on, Ordering::SeqCst);
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    type Connection = MemorySession;

    async fn create(&self) -> FtpResult<MemorySession> {
        let scheduled = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scheduled || self.always_fail.load(Ordering::SeqCst) {
            return Err(FtpError::connection_failed("Simulated connect failure"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.server.session())
    }

    async fn validate(&self, conn: &mut MemorySession) -> bool {
        validate_session(conn).await
    }

    async fn destroy(&self, mut conn: MemorySession) {
        destroy_session(&mut conn).await;
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}
