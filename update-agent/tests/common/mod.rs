//! Shared fixtures: mock mirrors served by axum and feed signing.

#![allow(dead_code)]

use async_compression::tokio::bufread::GzipEncoder;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::Digest;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use update_agent::FeedVerifier;

pub const CHANNEL: &str = "release";

const SIGNING_KEY_PEM: &str = include_str!("../fixtures/test_signing_key.pem");
const VERIFYING_KEY_PEM: &str = include_str!("../fixtures/test_verifying_key.pem");

pub fn verifier() -> FeedVerifier {
    FeedVerifier::from_public_key_pem(VERIFYING_KEY_PEM).unwrap()
}

pub fn sign(payload: &[u8]) -> Vec<u8> {
    let key = RsaPrivateKey::from_pkcs8_pem(SIGNING_KEY_PEM).unwrap();
    SigningKey::<Sha256>::new(key).sign(payload).to_vec()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha2::Sha256::digest(bytes))
}

pub async fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzipEncoder::new(bytes).read_to_end(&mut out).await.unwrap();
    out
}

pub fn main_feed(min_revision: Option<i64>) -> String {
    match min_revision {
        Some(rev) => format!("<main_feed><min_revision>{rev}</min_revision></main_feed>"),
        None => "<main_feed/>".to_string(),
    }
}

/// `(name, sha256, size)` per file.
pub fn update_feed(files: &[(&str, &str, Option<i64>)]) -> String {
    let mut xml = String::from("<update_feed>");
    for (name, sha, size) in files {
        xml.push_str(&format!("<file name=\"{name}\" sha256=\"{sha}\""));
        if let Some(size) = size {
            xml.push_str(&format!(" size=\"{size}\""));
        }
        xml.push_str("/>");
    }
    xml.push_str("</update_feed>");
    xml
}

#[derive(Clone)]
enum Reply {
    Body(Vec<u8>),
    Encoded(Vec<u8>, &'static str),
    Status(StatusCode),
    /// Send the prefix, then hold the connection open without sending more.
    Stall(Vec<u8>),
}

#[derive(Default)]
struct MirrorState {
    routes: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<String>>,
}

/// An HTTP mirror on an ephemeral local port. Unknown paths are 404.
pub struct MockMirror {
    origin: String,
    state: Arc<MirrorState>,
}

impl MockMirror {
    pub async fn start() -> Self {
        let state = Arc::new(MirrorState::default());
        let app = Router::new().fallback(serve).with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            origin: format!("http://{addr}"),
            state,
        }
    }

    pub fn origin(&self) -> String {
        self.origin.clone()
    }

    fn route(&self, path: String, reply: Reply) {
        self.state.routes.lock().unwrap().insert(path, reply);
    }

    /// Publish both feeds with signatures made by the fixture key.
    pub fn publish_feeds(&self, main: &str, update: &str) {
        self.publish_feeds_signed(main, &sign(main.as_bytes()), update, &sign(update.as_bytes()));
    }

    pub fn publish_feeds_signed(&self, main: &str, main_sig: &[u8], update: &str, update_sig: &[u8]) {
        let base = format!("/{CHANNEL}/current/feeds");
        self.route(format!("{base}/main_feed.txt"), Reply::Body(main.as_bytes().to_vec()));
        self.route(format!("{base}/main_feed.sig256"), Reply::Body(main_sig.to_vec()));
        self.route(format!("{base}/update_feed.txt"), Reply::Body(update.as_bytes().to_vec()));
        self.route(format!("{base}/update_feed.sig256"), Reply::Body(update_sig.to_vec()));
    }

    pub fn publish_file(&self, relative_path: &str, body: &[u8]) {
        self.route(file_path(relative_path), Reply::Body(body.to_vec()));
    }

    pub fn publish_encoded_file(&self, relative_path: &str, body: Vec<u8>, encoding: &'static str) {
        self.route(file_path(relative_path), Reply::Encoded(body, encoding));
    }

    pub fn fail_file(&self, relative_path: &str, status: StatusCode) {
        self.route(file_path(relative_path), Reply::Status(status));
    }

    pub fn stall_file(&self, relative_path: &str, prefix: &[u8]) {
        self.route(file_path(relative_path), Reply::Stall(prefix.to_vec()));
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }
}

fn file_path(relative_path: &str) -> String {
    format!("/{CHANNEL}/current/client/{relative_path}")
}

async fn serve(State(state): State<Arc<MirrorState>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    state.requests.lock().unwrap().push(uri.to_string());

    let reply = state.routes.lock().unwrap().get(&path).cloned();
    match reply {
        Some(Reply::Body(body)) => body.into_response(),
        Some(Reply::Encoded(body, encoding)) => {
            ([(header::CONTENT_ENCODING, encoding)], body).into_response()
        }
        Some(Reply::Status(status)) => status.into_response(),
        Some(Reply::Stall(prefix)) => {
            let body = stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(prefix)) })
                .chain(stream::pending());
            Body::from_stream(body).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
