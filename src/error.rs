use thiserror::Error;

/// Reasons a stream attempt ends. All of them are recoverable by reconnecting.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("camera answered HTTP {0}")]
    Status(u16),

    #[error("read failed: {0}")]
    Read(#[source] reqwest::Error),

    #[error("no data for {0} ms")]
    ReadTimeout(u64),

    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),
}

/// Per-frame decode failures. The frame is skipped.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("bad JPEG data: {0}")]
    Image(#[from] image::ImageError),

    #[error("degenerate image {width}x{height}")]
    Degenerate { width: u32, height: u32 },
}
