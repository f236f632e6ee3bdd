use sorng_ftp_pool::ftp::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct Tree {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
}

type Fs = Arc<Mutex<Tree>>;

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

#[test]
fn test_server_resolves_relative_arguments() {
    assert_eq!(resolve("/inbox/2026", "."), "/inbox/2026");
    assert_eq!(resolve("/inbox/2026", ".."), "/inbox");
    assert_eq!(resolve("/inbox", "2026/./a.txt"), "/inbox/2026/a.txt");
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn latin1(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u8).collect()
}

async fn reply(wr: &mut OwnedWriteHalf, text: &str) {
    let mut bytes = latin1(text);
    bytes.extend_from_slice(b"\r\n");
    wr.write_all(&bytes).await.unwrap();
}

/// Minimal passive-mode FTP server over an in-memory tree. Sessions log in
/// to `/home/alice`. Command arguments are treated as raw Latin-1 bytes,
/// like a non-UTF-8 server.
async fn start_server(password: &'static str) -> (u16, Fs) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let fs: Fs = Arc::new(Mutex::new(Tree::default()));
    {
        let mut tree = fs.lock().unwrap();
        for dir in ["/", "/home", "/home/alice"] {
            tree.dirs.insert(dir.to_string());
        }
    }

    let shared = Arc::clone(&fs);
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(serve(stream, Arc::clone(&shared), password));
        }
    });
    (port, fs)
}

async fn serve(stream: TcpStream, fs: Fs, password: &'static str) {
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    let mut cwd = "/home/alice".to_string();
    let mut pasv: Option<TcpListener> = None;
    reply(&mut wr, "220 test server ready").await;

    loop {
        let mut buf = Vec::new();
        if rd.read_until(b'\n', &mut buf).await.unwrap_or(0) == 0 {
            break;
        }
        let line: String = buf.iter().map(|&b| char::from(b)).collect();
        let line = line.trim_end_matches(['\r', '\n']);
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));

        match cmd {
            "USER" => reply(&mut wr, "331 Password required").await,
            "PASS" if arg == password => reply(&mut wr, "230 Logged in").await,
            "PASS" => reply(&mut wr, "530 Login incorrect").await,
            "TYPE" | "NOOP" => reply(&mut wr, "200 OK").await,
            "PWD" => reply(&mut wr, &format!("257 \"{}\" is current directory", cwd)).await,
            "CWD" => {
                let target = resolve(&cwd, arg);
                if fs.lock().unwrap().dirs.contains(&target) {
                    cwd = target;
                    reply(&mut wr, "250 Directory changed").await;
                } else {
                    reply(&mut wr, "550 No such directory").await;
                }
            }
            "MKD" => {
                let target = resolve(&cwd, arg);
                let created = {
                    let mut tree = fs.lock().unwrap();
                    let ok = tree.dirs.contains(&parent_of(&target))
                        && !tree.dirs.contains(&target)
                        && !tree.files.contains_key(&target);
                    if ok {
                        tree.dirs.insert(target.clone());
                    }
                    ok
                };
                if created {
                    reply(&mut wr, &format!("257 \"{}\" created", target)).await;
                } else {
                    reply(&mut wr, "550 Create directory operation failed").await;
                }
            }
            "DELE" => {
                let removed = fs.lock().unwrap().files.remove(&resolve(&cwd, arg)).is_some();
                if removed {
                    reply(&mut wr, "250 Delete operation successful").await;
                } else {
                    reply(&mut wr, "550 No such file").await;
                }
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let p = listener.local_addr().unwrap().port();
                pasv = Some(listener);
                reply(
                    &mut wr,
                    &format!("227 Entering Passive Mode (127,0,0,1,{},{})", p / 256, p % 256),
                )
                .await;
            }
            "LIST" => {
                let dir = resolve(&cwd, if arg.is_empty() { "." } else { arg });
                let body = {
                    let tree = fs.lock().unwrap();
                    let mut body = Vec::new();
                    for d in tree.dirs.iter().filter(|d| *d != "/" && parent_of(d) == dir) {
                        let name = &d[d.rfind('/').unwrap() + 1..];
                        body.extend(latin1(&format!(
                            "drwxr-xr-x   2 ftp ftp     4096 Jan  1 12:00 {}\r\n",
                            name
                        )));
                    }
                    for (f, data) in tree.files.iter().filter(|(f, _)| parent_of(f) == dir) {
                        let name = &f[f.rfind('/').unwrap() + 1..];
                        body.extend(latin1(&format!(
                            "-rw-r--r--   1 ftp ftp {:>8} Jan  1 12:00 {}\r\n",
                            data.len(),
                            name
                        )));
                    }
                    body
                };
                let Some(listener) = pasv.take() else {
                    reply(&mut wr, "425 Use PASV first").await;
                    continue;
                };
                reply(&mut wr, "150 Here comes the directory listing").await;
                let (mut data, _) = listener.accept().await.unwrap();
                data.write_all(&body).await.unwrap();
                drop(data);
                reply(&mut wr, "226 Directory send OK").await;
            }
            "STOR" => {
                let target = resolve(&cwd, arg);
                let Some(listener) = pasv.take() else {
                    reply(&mut wr, "425 Use PASV first").await;
                    continue;
                };
                if !fs.lock().unwrap().dirs.contains(&parent_of(&target)) {
                    reply(&mut wr, "553 Could not create file").await;
                    continue;
                }
                reply(&mut wr, "150 Ok to send data").await;
                let (mut data, _) = listener.accept().await.unwrap();
                let mut content = Vec::new();
                data.read_to_end(&mut content).await.unwrap();
                fs.lock().unwrap().files.insert(target, content);
                reply(&mut wr, "226 Transfer complete").await;
            }
            "RETR" => {
                let content = fs.lock().unwrap().files.get(&resolve(&cwd, arg)).cloned();
                let listener = pasv.take();
                match (content, listener) {
                    (Some(content), Some(listener)) => {
                        reply(&mut wr, "150 Opening BINARY mode data connection").await;
                        let (mut data, _) = listener.accept().await.unwrap();
                        data.write_all(&content).await.unwrap();
                        drop(data);
                        reply(&mut wr, "226 Transfer complete").await;
                    }
                    (None, _) => reply(&mut wr, "550 No such file").await,
                    (_, None) => reply(&mut wr, "425 Use PASV first").await,
                }
            }
            "QUIT" => {
                reply(&mut wr, "221 Goodbye").await;
                break;
            }
            _ => reply(&mut wr, "502 Command not implemented").await,
        }
    }
}

fn service_config(port: u16, password: &str) -> FtpServiceConfig {
    let mut cfg = FtpServiceConfig::new(FtpConnectionConfig {
        host: "127.0.0.1".into(),
        port,
        username: "alice".into(),
        password: password.into(),
        connect_timeout_sec: 5,
        data_timeout_sec: 5,
        ..Default::default()
    });
    cfg.pool.max_total = 2;
    cfg.pool.max_idle = 2;
    cfg.pool.initial_size = 1;
    cfg.pool.time_between_eviction_runs_ms = 0;
    cfg.borrow_backoff_ms = 10;
    cfg
}

#[tokio::test]
async fn test_full_transfer_flow_over_tcp() {
    let (port, fs) = start_server("secret").await;
    let svc = FtpTransferService::connect(service_config(port, "secret"))
        .await
        .unwrap();
    assert_eq!(svc.stats().unwrap().idle, 1);

    let body = "line one\n\n  line two  \n".as_bytes();
    let sent = svc
        .upload_stream("/inbox/2026", "报告.txt", body)
        .await
        .unwrap();
    assert_eq!(sent, body.len() as u64);

    // Stored under the relabelled UTF-8 bytes of the names.
    let wire = "/inbox/2026/\u{e6}\u{8a}\u{a5}\u{e5}\u{91}\u{8a}.txt";
    assert_eq!(fs.lock().unwrap().files.get(wire).unwrap(), body);

    assert_eq!(
        svc.list_file_names("/inbox/2026").await.unwrap(),
        vec!["报告.txt"]
    );
    let bytes = svc.download_stream("/inbox/2026", "报告.txt").await.unwrap();
    assert_eq!(&bytes[..], body);
    assert_eq!(
        svc.read_lines("/inbox/2026/报告.txt").await.unwrap(),
        vec!["line one", "line two"]
    );

    let dir = tempfile::tempdir().unwrap();
    assert!(svc.download_file("/inbox/2026", "报告.TXT", dir.path()).await.unwrap());
    assert_eq!(std::fs::read(dir.path().join("报告.txt")).unwrap(), body);

    let missing = svc.download_stream("/inbox", "nope.bin").await.unwrap_err();
    assert_eq!(missing.kind, FtpErrorKind::NotFound);

    assert!(svc.delete_file("/inbox/2026/报告.txt").await.unwrap());
    assert!(fs.lock().unwrap().files.is_empty());

    let stats = svc.stats().unwrap();
    assert_eq!(stats.checked_out, 0);
    assert!(stats.total <= 2);
    assert_eq!(stats.destroyed, 0);

    svc.close().await;
    assert_eq!(svc.stats().unwrap().total, 0);
}

#[tokio::test]
async fn test_wrong_password_exhausts_acquire_budget() {
    let (port, _fs) = start_server("secret").await;
    let mut cfg = service_config(port, "wrong");
    cfg.pool.initial_size = 0;
    let svc = FtpTransferService::connect(cfg).await.unwrap();

    let err = svc.list_files("/").await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::PoolUnavailable);
    let factory_err = err.source.as_deref().unwrap();
    assert_eq!(factory_err.kind, FtpErrorKind::FactoryFailed);
    assert_eq!(
        factory_err.source.as_deref().map(|e| e.kind),
        Some(FtpErrorKind::AuthFailed)
    );
    assert_eq!(svc.stats().unwrap().total, 0);
}

#[tokio::test]
async fn test_service_config_from_host_json() {
    let (port, _fs) = start_server("secret").await;
    let raw = format!(
        r#"{{
            "connection": {{ "host": "127.0.0.1", "port": {}, "username": "alice", "password": "secret" }},
            "pool": {{ "initialSize": 2, "maxTotal": 4, "maxIdle": 4, "timeBetweenEvictionRunsMs": 0 }}
        }}"#,
        port
    );
    let svc = FtpTransferService::connect(FtpServiceConfig::from_json(&raw).unwrap())
        .await
        .unwrap();
    assert_eq!(svc.stats().unwrap().idle, 2);
    assert!(svc.list_files("/home/alice").await.unwrap().is_empty());
    svc.close().await;
}

#[tokio::test]
async fn test_relative_targets_resolve_from_root_on_every_connection() {
    let (port, fs) = start_server("secret").await;
    let mut cfg = service_config(port, "secret");
    cfg.pool.initial_size = 0;
    let svc = FtpTransferService::connect(cfg).await.unwrap();

    // First upload runs on a fresh connection, the second on the reused one.
    svc.upload_stream("reports", "a.txt", &b"one"[..]).await.unwrap();
    svc.upload_stream("reports", "b.txt", &b"two"[..]).await.unwrap();
    assert_eq!(svc.stats().unwrap().created, 1);

    {
        let tree = fs.lock().unwrap();
        assert_eq!(tree.files.get("/reports/a.txt").unwrap(), b"one");
        assert_eq!(tree.files.get("/reports/b.txt").unwrap(), b"two");
        assert!(!tree.dirs.contains("/home/alice/reports"));
    }
    svc.close().await;
}
