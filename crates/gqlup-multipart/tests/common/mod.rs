//! Multipart body builder shared by the integration tests.

#![allow(dead_code)]

use std::io;

use bytes::Bytes;
use futures_util::Stream;

pub const BOUNDARY: &str = "gqlup-test-boundary";

/// Builds a `multipart/form-data` body part by part.
#[derive(Default)]
pub struct Form {
    body: Vec<u8>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, content: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(content);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// The body with its closing boundary.
    pub fn finish(mut self) -> Vec<u8> {
        self.body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }

    /// The body so far, without a closing boundary.
    pub fn unfinished(self) -> Vec<u8> {
        self.body
    }
}

/// Stream `body` in small chunks so parts straddle chunk boundaries.
pub fn chunked(body: Vec<u8>) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
    let chunks: Vec<Result<Bytes, io::Error>> = body
        .chunks(7)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures_util::stream::iter(chunks)
}

/// Stream `body`, then fail as a dropped connection would.
pub fn then_reset(body: Vec<u8>) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
    let items = vec![
        Ok(Bytes::from(body)),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer")),
    ];
    futures_util::stream::iter(items)
}

pub const SINGLE_FILE_OPERATIONS: &str =
    r#"{"query":"mutation($file: Upload!) { upload(file: $file) }","variables":{"file":null}}"#;
