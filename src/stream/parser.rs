//! Incremental MJPEG splitter.
//!
//! Bytes from the socket are fed in as they arrive and complete JPEG frames
//! are pulled out with [`MjpegParser::next_frame`]. Two framings are handled:
//!
//! - `multipart/x-mixed-replace`: boundary lines, per-part headers, and
//!   either a declared `Content-Length` or an EOI scan when no length is sent.
//! - raw concatenated JPEGs delimited only by SOI (`FF D8`) / EOI (`FF D9`).
//!
//! Every scan is bounded by `max_frame_bytes`; a frame that overflows is
//! counted, dropped, and the parser resynchronizes on the next boundary or
//! start marker.
//!
//! [`MjpegParser::drain_to`] bounds latency: between frames, a backlog above
//! the threshold is skipped up to the newest frame start. A frame already in
//! progress is never cut.

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use tracing::{debug, trace};

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Boundary used by the helmet camera when the header does not name one.
pub const DEFAULT_BOUNDARY: &str = "frame";

/// Header lines longer than this are treated as garbage.
const MAX_LINE_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFormat {
    Multipart { boundary: String },
    RawJpeg,
}

impl StreamFormat {
    /// Pick the framing from the response `Content-Type`.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.trim_start().to_ascii_lowercase().starts_with("multipart/") => {
                let boundary = parse_boundary(ct).unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
                StreamFormat::Multipart { boundary }
            }
            _ => StreamFormat::RawJpeg,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFormat::Multipart { boundary } => write!(f, "multipart (boundary={})", boundary),
            StreamFormat::RawJpeg => write!(f, "raw jpeg"),
        }
    }
}

/// `multipart/x-mixed-replace; boundary=frame` -> `frame`
pub fn parse_boundary(content_type: &str) -> Option<String> {
    const KEY: &str = "boundary=";
    let lower = content_type.to_ascii_lowercase();
    let start = lower.find(KEY)? + KEY.len();
    let value = content_type[start..].split(';').next()?.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);

    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub frames: u64,
    /// Bodies that did not look like a JPEG
    pub malformed: u64,
    /// Scans that ran past `max_frame_bytes`
    pub oversized: u64,
    /// Multipart parts with a non-JPEG content type
    pub skipped_parts: u64,
    /// Bytes thrown away by [`MjpegParser::reset`]
    pub discarded_bytes: u64,
    /// Backlog bytes skipped by [`MjpegParser::drain_to`]
    pub drained_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekBoundary,
    Headers {
        content_length: Option<usize>,
        is_jpeg: bool,
    },
    Body {
        len: usize,
    },
    ScanBody {
        scanned: usize,
    },
    SeekSoi,
    ScanRaw {
        scanned: usize,
    },
    Finished,
}

pub struct MjpegParser {
    format: StreamFormat,
    delimiter: Vec<u8>,
    close_delimiter: Vec<u8>,
    max_frame_bytes: usize,
    buf: BytesMut,
    state: State,
    stats: ParserStats,
}

impl MjpegParser {
    pub fn new(format: StreamFormat, max_frame_bytes: usize) -> Self {
        let (delimiter, close_delimiter) = match &format {
            StreamFormat::Multipart { boundary } => {
                let delimiter = if boundary.starts_with("--") {
                    boundary.clone()
                } else {
                    format!("--{}", boundary)
                };
                let close = format!("{}--", delimiter);
                (delimiter.into_bytes(), close.into_bytes())
            }
            StreamFormat::RawJpeg => (Vec::new(), Vec::new()),
        };

        let state = Self::resync_state(&format);
        Self {
            format,
            delimiter,
            close_delimiter,
            max_frame_bytes,
            buf: BytesMut::with_capacity(64 * 1024),
            state,
            stats: ParserStats::default(),
        }
    }

    fn resync_state(format: &StreamFormat) -> State {
        match format {
            StreamFormat::Multipart { .. } => State::SeekBoundary,
            StreamFormat::RawJpeg => State::SeekSoi,
        }
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if self.state != State::Finished {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// Bytes held but not yet emitted as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True once the closing multipart delimiter was seen.
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Drop everything buffered, including a partially received frame, and
    /// resynchronize on the next boundary or start marker.
    pub fn reset(&mut self) {
        self.stats.discarded_bytes += self.buf.len() as u64;
        self.buf.clear();
        if self.state != State::Finished {
            self.state = Self::resync_state(&self.format);
        }
    }

    /// Skip stale input when more than `limit` bytes wait between frames.
    ///
    /// Everything before the newest frame start (SOI, or a delimiter line in
    /// multipart mode) is dropped. Does nothing while a frame is being
    /// assembled, so the frame in progress always completes. Returns the
    /// number of bytes skipped.
    pub fn drain_to(&mut self, limit: usize) -> usize {
        if self.buf.len() <= limit {
            return 0;
        }
        let start = match self.state {
            State::SeekSoi => rfind_marker(&self.buf, &SOI),
            State::SeekBoundary => self.last_delimiter_line(),
            _ => None,
        };
        match start {
            Some(start) if start > 0 => {
                self.buf.advance(start);
                self.stats.drained_bytes += start as u64;
                trace!("drained {} stale bytes", start);
                start
            }
            _ => 0,
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Return the counters accumulated since the last call and zero them.
    pub fn take_stats(&mut self) -> ParserStats {
        std::mem::take(&mut self.stats)
    }

    /// Next complete frame, or `None` when more input is needed.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                State::Finished => return None,
                State::SeekBoundary => {
                    let line = self.read_line()?;
                    if line == self.close_delimiter.as_slice() {
                        debug!("closing multipart boundary received");
                        self.state = State::Finished;
                        self.buf.clear();
                        return None;
                    }
                    if self.is_delimiter(&line) {
                        self.state = State::Headers {
                            content_length: None,
                            is_jpeg: true,
                        };
                    }
                }
                State::Headers {
                    content_length,
                    is_jpeg,
                } => {
                    let line = self.read_line()?;
                    if line.is_empty() {
                        self.state = self.body_state(content_length, is_jpeg);
                        continue;
                    }
                    if line.len() > MAX_LINE_BYTES {
                        self.stats.malformed += 1;
                        self.state = State::SeekBoundary;
                        continue;
                    }
                    self.state = Self::apply_header(&line, content_length, is_jpeg);
                }
                State::Body { len } => {
                    if self.buf.len() < len {
                        return None;
                    }
                    let body = self.buf.split_to(len).freeze();
                    self.state = State::SeekBoundary;
                    if body.starts_with(&SOI) {
                        self.stats.frames += 1;
                        return Some(body);
                    }
                    self.stats.malformed += 1;
                    debug!("declared {} byte part does not start with SOI, skipping", len);
                }
                State::ScanBody { scanned } => {
                    let eoi = find_marker(&self.buf, &EOI, scanned.saturating_sub(1));
                    let next_part = self.find_delimiter_line(scanned.saturating_sub(self.delimiter.len() + 1));
                    if let Some(line) = next_part.filter(|&line| eoi.map_or(true, |pos| line < pos)) {
                        // The part ended without an EOI; keep the next one intact.
                        self.stats.malformed += 1;
                        debug!("part without length ended before EOI, skipping");
                        self.buf.advance(line);
                        self.state = State::SeekBoundary;
                        continue;
                    }
                    match eoi {
                        Some(pos) => {
                            let body = self.buf.split_to(pos + EOI.len()).freeze();
                            self.state = State::SeekBoundary;
                            if body.len() > self.max_frame_bytes {
                                self.stats.oversized += 1;
                                debug!("{} byte part exceeds limit, skipping", body.len());
                                continue;
                            }
                            match body.windows(2).position(|w| w == SOI.as_slice()) {
                                Some(start) => {
                                    self.stats.frames += 1;
                                    return Some(body.slice(start..));
                                }
                                None => {
                                    self.stats.malformed += 1;
                                    debug!("part without length has no SOI, skipping");
                                }
                            }
                        }
                        None => {
                            if self.buf.len() > self.max_frame_bytes {
                                self.stats.oversized += 1;
                                debug!("no EOI within {} bytes, resynchronizing", self.max_frame_bytes);
                                self.state = State::SeekBoundary;
                                continue;
                            }
                            self.state = State::ScanBody {
                                scanned: self.buf.len(),
                            };
                            return None;
                        }
                    }
                }
                State::SeekSoi => match find_marker(&self.buf, &SOI, 0) {
                    Some(pos) => {
                        self.buf.advance(pos);
                        self.state = State::ScanRaw { scanned: SOI.len() };
                    }
                    None => {
                        // A trailing 0xFF may be the first half of the marker.
                        let keep = usize::from(self.buf.last() == Some(&0xFF));
                        let drop = self.buf.len() - keep;
                        self.buf.advance(drop);
                        return None;
                    }
                },
                State::ScanRaw { scanned } => {
                    let from = scanned.saturating_sub(1).max(SOI.len());
                    match find_marker(&self.buf, &EOI, from) {
                        Some(pos) => {
                            let frame = self.buf.split_to(pos + EOI.len()).freeze();
                            self.state = State::SeekSoi;
                            if frame.len() > self.max_frame_bytes {
                                self.stats.oversized += 1;
                                debug!("{} byte frame exceeds limit, skipping", frame.len());
                                continue;
                            }
                            self.stats.frames += 1;
                            return Some(frame);
                        }
                        None => {
                            if self.buf.len() > self.max_frame_bytes {
                                self.stats.oversized += 1;
                                debug!("no EOI within {} bytes, rescanning for SOI", self.max_frame_bytes);
                                self.buf.advance(SOI.len());
                                self.state = State::SeekSoi;
                                continue;
                            }
                            self.state = State::ScanRaw {
                                scanned: self.buf.len(),
                            };
                            return None;
                        }
                    }
                }
            }
        }
    }

    fn is_delimiter(&self, line: &[u8]) -> bool {
        line == self.delimiter.as_slice()
            || (line.starts_with(&self.delimiter) && line.get(self.delimiter.len()) == Some(&b';'))
    }

    /// Offset of the first delimiter line at or after `from`, pointing at
    /// its leading dashes.
    fn find_delimiter_line(&self, from: usize) -> Option<usize> {
        if self.delimiter.is_empty() || self.buf.len() < from + self.delimiter.len() + 1 {
            return None;
        }
        self.buf[from..]
            .windows(self.delimiter.len() + 1)
            .position(|w| w[0] == b'\n' && &w[1..] == self.delimiter.as_slice())
            .map(|p| p + from + 1)
    }

    /// Offset of the last line in the buffer that starts with the delimiter.
    fn last_delimiter_line(&self) -> Option<usize> {
        if self.delimiter.is_empty() {
            return None;
        }
        if self.buf.len() > self.delimiter.len() {
            let found = self
                .buf
                .windows(self.delimiter.len() + 1)
                .rposition(|w| w[0] == b'\n' && &w[1..] == self.delimiter.as_slice());
            if let Some(p) = found {
                return Some(p + 1);
            }
        }
        self.buf.starts_with(&self.delimiter).then_some(0)
    }

    fn body_state(&mut self, content_length: Option<usize>, is_jpeg: bool) -> State {
        if !is_jpeg {
            self.stats.skipped_parts += 1;
            trace!("skipping non-JPEG part");
            return State::SeekBoundary;
        }
        match content_length {
            Some(len) if len > self.max_frame_bytes => {
                self.stats.oversized += 1;
                debug!("declared length {} exceeds limit, resynchronizing", len);
                State::SeekBoundary
            }
            Some(len) if len > 0 => State::Body { len },
            _ => State::ScanBody { scanned: 0 },
        }
    }

    fn apply_header(line: &[u8], content_length: Option<usize>, is_jpeg: bool) -> State {
        let text = String::from_utf8_lossy(line);
        let mut next_length = content_length;
        let mut next_jpeg = is_jpeg;

        if let Some((key, value)) = text.split_once(':') {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            match key.as_str() {
                "content-length" => next_length = value.parse::<usize>().ok(),
                "content-type" => {
                    let value = value.to_ascii_lowercase();
                    next_jpeg = value.starts_with("image/jpeg") || value.starts_with("image/jpg");
                }
                _ => {}
            }
        }

        State::Headers {
            content_length: next_length,
            is_jpeg: next_jpeg,
        }
    }

    /// Pop one line without its CR/LF.
    fn read_line(&mut self) -> Option<Vec<u8>> {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                Some(line.to_vec())
            }
            None => {
                if self.buf.len() > MAX_LINE_BYTES {
                    // Keep enough for a delimiter split across chunks.
                    let keep = self.close_delimiter.len() + 2;
                    let drop = self.buf.len().saturating_sub(keep);
                    self.buf.advance(drop);
                    if matches!(self.state, State::Headers { .. }) {
                        self.stats.malformed += 1;
                        self.state = State::SeekBoundary;
                    }
                }
                None
            }
        }
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + 2 {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == marker.as_slice())
        .map(|p| p + from)
}

fn rfind_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).rposition(|w| w == marker.as_slice())
}
