//! HTTP transport for model downloads.

use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;

const CHUNK_SIZE: usize = 64 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte progress: `(downloaded, total)`, total when the server reports it.
pub type ByteProgress<'a> = &'a mut dyn FnMut(u64, Option<u64>);

/// Streams the body of a GET request into `dest`.
pub trait Fetcher {
    /// Returns the number of bytes written.
    fn fetch(&self, url: &str, dest: &mut dyn Write, progress: ByteProgress<'_>) -> Result<u64, FetchError>;
}

/// Fetcher over a blocking `reqwest` client.
///
/// Must not be called from inside an async runtime thread; wrap calls in
/// `spawn_blocking` there.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("reenact/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            // Model files are hundreds of MB; no overall deadline.
            .timeout(None)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write, progress: ByteProgress<'_>) -> Result<u64, FetchError> {
        tracing::debug!(url, "GET");
        let mut response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let total = response.content_length();
        let mut downloaded = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];
        progress(0, total);

        loop {
            let n = response.read(&mut buf)?;
            if n == 0 {
                break;
            }
            dest.write_all(&buf[..n])?;
            downloaded += n as u64;
            progress(downloaded, total);
        }

        Ok(downloaded)
    }
}
