#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use apigw_client::{Error, Transport};
use parking_lot::Mutex;

/// Echoes the request body back with status 200 and records the request URLs.
#[derive(Default)]
pub struct EchoTransport {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl EchoTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait::async_trait]
impl Transport for EchoTransport {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(request.url().to_string());

        let body = request
            .body()
            .and_then(reqwest::Body::as_bytes)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        let mut builder = http::Response::builder().status(200);
        if let Some(content_type) = request.headers().get(http::header::CONTENT_TYPE) {
            builder = builder.header(http::header::CONTENT_TYPE, content_type);
        }
        let response = builder
            .body(body)
            .map_err(|e| Error::Config(format!("echo response: {e}")))?;
        Ok(reqwest::Response::from(response))
    }
}
