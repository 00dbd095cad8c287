//! Shared test utilities: a recording touch sink, an in-process peer stub,
//! and filesystem seeding helpers.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use depot_cache::layout;
use depot_cache::{FileRecord, TouchSink};
use depot_core::FileHash;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Touch sink that remembers every notified hash.
#[derive(Default)]
pub struct RecordingTouchSink {
    touched: Mutex<Vec<FileHash>>,
}

impl RecordingTouchSink {
    pub fn touched(&self) -> Vec<String> {
        self.touched
            .lock()
            .unwrap()
            .iter()
            .map(|h| h.as_str().to_string())
            .collect()
    }
}

impl TouchSink for RecordingTouchSink {
    fn record_touch(&self, hash: &FileHash) {
        self.touched.lock().unwrap().push(hash.clone());
    }
}

/// How the peer stub answers pull requests.
#[derive(Clone)]
pub enum PeerBehavior {
    /// Respond with the given body after a delay.
    Serve { body: Vec<u8>, delay: Duration },
    /// Respond with the given status and no body.
    Fail(u16),
    /// Accept the request and never respond.
    Hang,
}

#[derive(Clone)]
struct StubState {
    behavior: PeerBehavior,
    hits: Arc<AtomicUsize>,
}

/// A distribution peer bound to an ephemeral local port.
pub struct PeerStub {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    _server: JoinHandle<()>,
}

impl PeerStub {
    pub async fn spawn(behavior: PeerBehavior) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = StubState {
            behavior,
            hits: hits.clone(),
        };
        let app = Router::new()
            .route("/dist/files/{hash}", get(serve_file))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            hits,
            _server: server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of pull requests received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve_file(State(state): State<StubState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    match state.behavior {
        PeerBehavior::Serve { body, delay } => {
            tokio::time::sleep(delay).await;
            Body::from(body).into_response()
        }
        PeerBehavior::Fail(status) => StatusCode::from_u16(status).unwrap().into_response(),
        PeerBehavior::Hang => {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }
}

/// Write `body` at the tier position for `hash`, creating shard directories.
pub fn seed_file(root: &Path, hash: &FileHash, body: &[u8]) -> PathBuf {
    let path = layout::path_for(root, hash);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, body).unwrap();
    path
}

/// Backdate a file's access and write times.
pub fn age_file(path: &Path, accessed_ago: time::Duration, modified_ago: time::Duration) {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let atime = filetime::FileTime::from_unix_time(now - accessed_ago.whole_seconds(), 0);
    let mtime = filetime::FileTime::from_unix_time(now - modified_ago.whole_seconds(), 0);
    filetime::set_file_times(path, atime, mtime).unwrap();
}

/// A registry record created `age` ago.
pub fn record(hash: &str, uploaded: bool, size: u64, age: time::Duration) -> FileRecord {
    FileRecord {
        hash: FileHash::new(hash).unwrap(),
        uploaded,
        upload_date: OffsetDateTime::now_utc() - age,
        size,
    }
}

/// Read a served file to completion.
pub async fn read_all(served: depot_cache::ServedFile) -> Vec<u8> {
    use tokio::io::AsyncReadExt;
    let mut file = served.into_inner();
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.unwrap();
    buf
}
