use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;

use crate::error::Error;
use crate::transport::Transport;

/// A request as the stub saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Answers every request with a canned response and keeps what it saw.
#[derive(Default)]
pub struct StubTransport {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<SeenRequest>>,
    pub status: u16,
    pub headers: Vec<(&'static str, &'static str)>,
    pub body: &'static str,
}

impl StubTransport {
    pub fn ok(body: &'static str) -> Arc<Self> {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            status,
            body,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait::async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(SeenRequest {
            method: request.method().clone(),
            url: request.url().to_string(),
            headers: request.headers().clone(),
            body: request
                .body()
                .and_then(reqwest::Body::as_bytes)
                .map(Bytes::copy_from_slice),
        });

        let mut builder = http::Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(*name, *value);
        }
        let response = builder
            .body(self.body)
            .map_err(|e| Error::Config(format!("stub response: {e}")))?;
        Ok(reqwest::Response::from(response))
    }
}
