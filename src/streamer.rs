use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde_json::Value;

use crate::error::AppError;

/// A boxed, owned byte-chunk sequence. Boxed (rather than `impl Stream`)
/// so the Engine can move it into and out of a spawned "next chunk" task
/// across attempts without naming its concrete type.
pub type BoxByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Opens one streaming POST per attempt and hands back a lazy byte-chunk
/// sequence. Holds no state across attempts; a fresh upstream connection
/// backs every call to `open`.
pub struct Streamer {
    client: Client,
}

impl Streamer {
    pub fn new(connect_timeout_seconds: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_seconds))
            .build()?;
        Ok(Self { client })
    }

    /// Opens the upstream stream. Read timeout is intentionally left
    /// unset: a long-running streaming body must not be cut off by a
    /// per-request deadline, only by the Engine's idle-timeout logic.
    pub async fn open(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
    ) -> Result<BoxByteStream, AppError> {
        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamStatus { status, message });
        }

        Ok(Box::pin(response.bytes_stream()))
    }

    /// Forwards a request upstream untouched and hands back the raw
    /// response for the caller to relay status/headers/body as-is. Used
    /// for requests the Edge Adapter did not activate the Engine for —
    /// streaming or not, the bytes pass through unexamined.
    pub async fn passthrough(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
    ) -> Result<reqwest::Response, AppError> {
        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_open_surfaces_status_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).body("rate limited");
        });

        let streamer = Streamer::new(5).unwrap();
        let result = streamer
            .open(
                &server.url("/v1/chat/completions"),
                HeaderMap::new(),
                &serde_json::json!({}),
            )
            .await;

        mock.assert();
        match result {
            Err(AppError::UpstreamStatus { status, message }) => {
                assert_eq!(status.as_u16(), 429);
                assert_eq!(message, "rate limited");
            }
            other => panic!("expected UpstreamStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_yields_body_chunks() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).body("data: hello\n\n");
        });

        let streamer = Streamer::new(5).unwrap();
        let stream = streamer
            .open(
                &server.url("/v1/chat/completions"),
                HeaderMap::new(),
                &serde_json::json!({}),
            )
            .await
            .unwrap();

        let mut stream = stream;
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"data: hello\n\n");
    }
}
