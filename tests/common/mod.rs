//! Local stand-ins for the blob service and the dataset mirror.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array1, Array3};

use mnist_uploader::dataset::{idx, MNIST_FILES};

pub const TEST_TOKEN: &str = "test-token";
pub const ACCOUNT: &str = "acct1";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

#[derive(Default)]
pub struct FakeBlobState {
    pub containers: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    pub requests: Vec<RecordedRequest>,
}

pub type SharedBlobState = Arc<Mutex<FakeBlobState>>;

fn error_reply(status: StatusCode, code: &'static str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>{code}</Code><Message>{code} from fake</Message></Error>"
    );
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert("x-ms-error-code", HeaderValue::from_static(code));
    response
}

async fn blob_handler(
    State(state): State<SharedBlobState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    state.requests.push(RecordedRequest {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers.clone(),
    });

    let expected_auth = format!("Bearer {TEST_TOKEN}");
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(expected_auth.as_str()) {
        return error_reply(StatusCode::FORBIDDEN, "AuthenticationFailed");
    }
    if headers.get("x-ms-version").is_none() || headers.get("x-ms-date").is_none() {
        return error_reply(StatusCode::BAD_REQUEST, "MissingRequiredHeader");
    }

    // Path layout: /{account}/{container}[/{blob...}]
    let path = uri.path().trim_start_matches('/');
    let mut parts = path.splitn(3, '/');
    let _account = parts.next();
    let container = parts.next().unwrap_or_default().to_string();
    let blob = parts.next().map(str::to_string);

    let is_container = uri.query() == Some("restype=container");
    match blob {
        None if is_container && method == Method::GET => {
            if state.containers.contains_key(&container) {
                StatusCode::OK.into_response()
            } else {
                error_reply(StatusCode::NOT_FOUND, "ContainerNotFound")
            }
        }
        None if is_container && method == Method::PUT => {
            if state.containers.contains_key(&container) {
                error_reply(StatusCode::CONFLICT, "ContainerAlreadyExists")
            } else {
                state.containers.insert(container, BTreeMap::new());
                StatusCode::CREATED.into_response()
            }
        }
        Some(blob) if !is_container && method == Method::PUT => {
            if headers.get("x-ms-blob-type").and_then(|v| v.to_str().ok()) != Some("BlockBlob") {
                return error_reply(StatusCode::BAD_REQUEST, "MissingRequiredHeader");
            }
            match state.containers.get_mut(&container) {
                Some(blobs) => {
                    blobs.insert(blob, body.to_vec());
                    StatusCode::CREATED.into_response()
                }
                None => error_reply(StatusCode::NOT_FOUND, "ContainerNotFound"),
            }
        }
        _ => error_reply(StatusCode::BAD_REQUEST, "UnsupportedHttpVerb"),
    }
}

/// Starts a fake blob endpoint. Returns its account URL and shared state.
pub async fn spawn_blob_service() -> (String, SharedBlobState) {
    let state = SharedBlobState::default();
    let app = Router::new()
        .fallback(blob_handler)
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/{ACCOUNT}"), state)
}

#[derive(Clone)]
struct MirrorState {
    files: Arc<BTreeMap<String, Vec<u8>>>,
    hits: Arc<AtomicUsize>,
}

async fn mirror_handler(State(state): State<MirrorState>, uri: Uri) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let file = uri.path().rsplit('/').next().unwrap_or_default();
    match state.files.get(file) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Starts a fake dataset mirror serving `archives`. Returns its base URL and a hit counter.
pub async fn spawn_mirror(archives: [Vec<u8>; 4]) -> (String, Arc<AtomicUsize>) {
    let files: BTreeMap<String, Vec<u8>> = MNIST_FILES
        .iter()
        .map(|f| f.to_string())
        .zip(archives)
        .collect();
    let hits = Arc::new(AtomicUsize::new(0));
    let state = MirrorState {
        files: Arc::new(files),
        hits: hits.clone(),
    };
    let app = Router::new().fallback(mirror_handler).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/mnist"), hits)
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Small MNIST-shaped archives, in `MNIST_FILES` order.
pub fn fixture_archives(train: usize, test: usize) -> [Vec<u8>; 4] {
    let x_train = Array3::from_shape_fn((train, 28, 28), |(i, r, c)| ((i * 7 + r + c) % 256) as u8);
    let y_train = Array1::from_shape_fn(train, |i| (i % 10) as u8);
    let x_test = Array3::from_shape_fn((test, 28, 28), |(i, r, c)| ((i + r * c) % 256) as u8);
    let y_test = Array1::from_shape_fn(test, |i| (9 - i % 10) as u8);
    [
        gzip(&idx::encode_images(&x_train)),
        gzip(&idx::encode_labels(&y_train)),
        gzip(&idx::encode_images(&x_test)),
        gzip(&idx::encode_labels(&y_test)),
    ]
}

/// Writes fixture archives into `dir` as a pre-populated cache.
pub fn seed_cache(dir: &std::path::Path, train: usize, test: usize) {
    for (file, bytes) in MNIST_FILES.iter().zip(fixture_archives(train, test)) {
        std::fs::write(dir.join(file), bytes).unwrap();
    }
}
