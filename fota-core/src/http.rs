/// Minimal HTTP/1.1 client pieces for the firmware fetch
///
/// The firmware download does not go through a generic HTTP client. The request
/// is built by hand, the response head is read line by line through
/// [`ResponseReader`] and fed to [`HeaderParser`], and the body is handed to the
/// flash writer as a plain `Read` source.
use std::io::{self, Read};

use crate::error::FotaError;
use crate::traits::{Clock, Transport};

/// The only body type accepted as a firmware image
pub const FIRMWARE_CONTENT_TYPE: &str = "application/octet-stream";

/// Longest header line kept; the rest of an oversized line is discarded
pub const MAX_LINE_LEN: usize = 1024;

const READ_CHUNK: usize = 512;

pub fn build_get_request(host: &str, path: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        path, host
    )
}

/// What the firmware fetch needs to know from the response head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseHead {
    pub status: Option<u16>,
    pub content_length: u64,
    pub content_type_valid: bool,
}

impl ResponseHead {
    /// Status 200 with a non-empty octet-stream body
    pub fn is_acceptable(&self) -> bool {
        self.status == Some(200) && self.content_length > 0 && self.content_type_valid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStep {
    /// Keep feeding lines
    Continue,
    /// Blank line seen, body follows
    Done,
    /// Status line was not `200`; nothing after it is captured
    Rejected,
}

/// Line-oriented state machine over the response head
#[derive(Debug, Default)]
pub struct HeaderParser {
    head: ResponseHead,
    seen_status_line: bool,
}

impl HeaderParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> ResponseHead {
        self.head
    }

    pub fn feed_line(&mut self, raw: &str) -> HeaderStep {
        let line = raw.trim();

        if !self.seen_status_line {
            self.seen_status_line = true;
            self.head.status = parse_status_line(line);
            return match self.head.status {
                Some(200) => HeaderStep::Continue,
                Some(code) => {
                    log::warn!("Got a non 200 status code ({}) from server", code);
                    HeaderStep::Rejected
                }
                None => {
                    log::warn!("Malformed status line: {:?}", line);
                    HeaderStep::Rejected
                }
            };
        }

        if line.is_empty() {
            return HeaderStep::Done;
        }

        let Some((name, value)) = line.split_once(':') else {
            log::debug!("Ignoring malformed header line: {:?}", line);
            return HeaderStep::Continue;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("Content-Length") {
            // Unparseable lengths count as zero and fail the gate check
            self.head.content_length = value.parse().unwrap_or(0);
            log::info!("Got {} bytes from server", self.head.content_length);
        } else if name.eq_ignore_ascii_case("Content-Type") {
            self.head.content_type_valid = value == FIRMWARE_CONTENT_TYPE;
            log::info!("Got {} payload", value);
        }

        HeaderStep::Continue
    }
}

/// `HTTP/1.x <code> <reason>` -> `<code>`
pub fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Buffered reader over a transport with poll-based timeouts
pub struct ResponseReader<'a, T: Transport, C: Clock> {
    transport: &'a mut T,
    clock: &'a C,
    buf: Vec<u8>,
    pos: usize,
}

impl<'a, T: Transport, C: Clock> ResponseReader<'a, T, C> {
    pub fn new(transport: &'a mut T, clock: &'a C) -> Self {
        Self {
            transport,
            clock,
            buf: Vec::with_capacity(READ_CHUNK),
            pos: 0,
        }
    }

    fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Busy-wait for the first response byte. A peer that closes without
    /// sending anything is no different from one that never answers.
    pub fn wait_for_first_byte(&mut self, timeout_ms: u64) -> Result<(), FotaError> {
        self.poll(timeout_ms, false)
    }

    /// Busy-wait until at least one byte can be read without blocking, or the
    /// peer has closed and the next read will report end of stream
    pub fn wait_for_data(&mut self, timeout_ms: u64) -> Result<(), FotaError> {
        self.poll(timeout_ms, true)
    }

    fn poll(&mut self, timeout_ms: u64, stop_on_close: bool) -> Result<(), FotaError> {
        let start = self.clock.now_ms();
        while self.buffered() == 0 && self.transport.available() == 0 {
            if stop_on_close && !self.transport.connected() {
                return Ok(());
            }
            let waited_ms = self.clock.now_ms().saturating_sub(start);
            if waited_ms > timeout_ms {
                return Err(FotaError::Timeout { waited_ms });
            }
            self.clock.idle();
        }
        Ok(())
    }

    /// Refill the internal buffer. Returns `false` once the peer has closed.
    fn fill(&mut self, timeout_ms: u64) -> Result<bool, FotaError> {
        if self.buffered() > 0 {
            return Ok(true);
        }
        self.wait_for_data(timeout_ms)?;

        self.buf.resize(READ_CHUNK, 0);
        self.pos = 0;
        match self.transport.read(&mut self.buf) {
            Ok(n) => {
                self.buf.truncate(n);
                Ok(n > 0)
            }
            Err(e) => {
                self.buf.clear();
                Err(FotaError::Connection {
                    target: "response".to_string(),
                    detail: format!("{:?}", e),
                })
            }
        }
    }

    /// Read one `\n`-terminated line. `Ok(None)` at end of stream with nothing read.
    pub fn read_line(&mut self, timeout_ms: u64) -> Result<Option<String>, FotaError> {
        let mut line = Vec::new();
        let mut saw_any = false;

        loop {
            if !self.fill(timeout_ms)? {
                break;
            }
            saw_any = true;

            let pending = &self.buf[self.pos..];
            match pending.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    take_bounded(&mut line, &pending[..idx]);
                    self.pos += idx + 1;
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                None => {
                    take_bounded(&mut line, pending);
                    self.pos = self.buf.len();
                }
            }
        }

        if saw_any {
            Ok(Some(String::from_utf8_lossy(&line).into_owned()))
        } else {
            Ok(None)
        }
    }

    /// Discard whatever the server already sent so the socket can be closed cleanly
    pub fn drain(&mut self) -> usize {
        let mut discarded = self.buffered();
        self.pos = self.buf.len();

        let mut scratch = [0u8; READ_CHUNK];
        while self.transport.available() > 0 {
            match self.transport.read(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(n) => discarded += n,
            }
        }
        discarded
    }
}

fn take_bounded(line: &mut Vec<u8>, bytes: &[u8]) {
    let room = MAX_LINE_LEN.saturating_sub(line.len());
    line.extend_from_slice(&bytes[..bytes.len().min(room)]);
}

impl<T: Transport, C: Clock> Read for ResponseReader<'_, T, C> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.buffered() > 0 {
            let n = self.buffered().min(out.len());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }

        // Body transfer blocks on the transport with no deadline of its own
        self.transport
            .read(out)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeClock, ScriptedTransport};
    use proptest::prelude::*;

    fn parse(lines: &[&str]) -> (ResponseHead, HeaderStep) {
        let mut parser = HeaderParser::new();
        let mut step = HeaderStep::Continue;
        for line in lines {
            step = parser.feed_line(line);
            if step != HeaderStep::Continue {
                break;
            }
        }
        (parser.head(), step)
    }

    #[test]
    fn test_request_format() {
        assert_eq!(
            build_get_request("fw.example.org", "/clock/v7.bin"),
            "GET /clock/v7.bin HTTP/1.1\r\nHost: fw.example.org\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn test_status_line_parsing() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK"), Some(200));
        assert_eq!(parse_status_line("HTTP/1.0 404 Not Found"), Some(404));
        assert_eq!(parse_status_line("ICY 200 OK"), None);
        assert_eq!(parse_status_line("HTTP/1.1"), None);
        assert_eq!(parse_status_line(""), None);
    }

    #[test]
    fn test_valid_head() {
        let (head, step) = parse(&[
            "HTTP/1.1 200 OK\r",
            "Content-Length: 1024\r",
            "Content-Type: application/octet-stream\r",
            "\r",
        ]);
        assert_eq!(step, HeaderStep::Done);
        assert_eq!(head.content_length, 1024);
        assert!(head.content_type_valid);
        assert!(head.is_acceptable());
    }

    #[test]
    fn test_header_names_ignore_case() {
        let (head, _) = parse(&[
            "HTTP/1.1 200 OK",
            "content-length:2048",
            "CONTENT-TYPE:   application/octet-stream  ",
            "",
        ]);
        assert_eq!(head.content_length, 2048);
        assert!(head.content_type_valid);
    }

    #[test]
    fn test_wrong_content_type() {
        let (head, _) = parse(&["HTTP/1.1 200 OK", "Content-Type: text/plain", "Content-Length: 10", ""]);
        assert!(!head.content_type_valid);
        assert!(!head.is_acceptable());

        // Parameters make the value differ from the exact octet-stream type
        let (head, _) = parse(&[
            "HTTP/1.1 200 OK",
            "Content-Type: application/octet-stream; charset=binary",
            "Content-Length: 10",
            "",
        ]);
        assert!(!head.content_type_valid);
    }

    #[test]
    fn test_non_200_stops_capture() {
        let (head, step) = parse(&[
            "HTTP/1.1 404 Not Found",
            "Content-Length: 1024",
            "Content-Type: application/octet-stream",
            "",
        ]);
        assert_eq!(step, HeaderStep::Rejected);
        assert_eq!(head.status, Some(404));
        assert_eq!(head.content_length, 0);
        assert!(!head.content_type_valid);
    }

    #[test]
    fn test_missing_length() {
        let (head, step) = parse(&["HTTP/1.1 200 OK", "Content-Type: application/octet-stream", ""]);
        assert_eq!(step, HeaderStep::Done);
        assert_eq!(head.content_length, 0);
        assert!(!head.is_acceptable());

        let (head, _) = parse(&["HTTP/1.1 200 OK", "Content-Length: lots", ""]);
        assert_eq!(head.content_length, 0);
    }

    #[test]
    fn test_reader_splits_lines_and_keeps_body() {
        let mut transport =
            ScriptedTransport::with_response(b"HTTP/1.1 200 OK\r\nX-A: 1\r\n\r\nBODY".to_vec());
        let clock = FakeClock::new(1);
        let mut reader = ResponseReader::new(&mut transport, &clock);

        assert_eq!(reader.read_line(100).unwrap().as_deref(), Some("HTTP/1.1 200 OK\r"));
        assert_eq!(reader.read_line(100).unwrap().as_deref(), Some("X-A: 1\r"));
        assert_eq!(reader.read_line(100).unwrap().as_deref(), Some("\r"));

        let mut body = Vec::new();
        reader.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"BODY");
    }

    #[test]
    fn test_reader_times_out_on_silence() {
        let mut transport = ScriptedTransport::silent();
        let clock = FakeClock::new(10);
        let mut reader = ResponseReader::new(&mut transport, &clock);

        let err = reader.wait_for_data(5_000).unwrap_err();
        assert!(matches!(err, FotaError::Timeout { waited_ms } if waited_ms > 5_000));
    }

    #[test]
    fn test_first_byte_wait_ignores_early_close() {
        let mut transport = ScriptedTransport::with_response(Vec::new());
        let clock = FakeClock::new(10);
        let mut reader = ResponseReader::new(&mut transport, &clock);

        // Later reads see the close as end of stream
        assert!(reader.wait_for_data(5_000).is_ok());

        let err = reader.wait_for_first_byte(5_000).unwrap_err();
        assert!(matches!(err, FotaError::Timeout { waited_ms } if waited_ms > 5_000));
    }

    #[test]
    fn test_reader_truncates_long_lines() {
        let mut data = vec![b'a'; MAX_LINE_LEN * 2];
        data.extend_from_slice(b"\nnext\n");
        let mut transport = ScriptedTransport::with_response(data);
        let clock = FakeClock::new(1);
        let mut reader = ResponseReader::new(&mut transport, &clock);

        assert_eq!(reader.read_line(100).unwrap().unwrap().len(), MAX_LINE_LEN);
        assert_eq!(reader.read_line(100).unwrap().as_deref(), Some("next"));
        assert_eq!(reader.read_line(100).unwrap(), None);
    }

    #[test]
    fn test_drain_discards_pending_data() {
        let mut transport = ScriptedTransport::with_response(b"line\nrest of the body".to_vec());
        let clock = FakeClock::new(1);
        let mut reader = ResponseReader::new(&mut transport, &clock);

        reader.read_line(100).unwrap();
        assert_eq!(reader.drain(), "rest of the body".len());
        drop(reader);
        assert_eq!(transport.available(), 0);
    }

    proptest! {
        #[test]
        fn prop_content_length_round_trips(len in 1u64..=16 * 1024 * 1024) {
            let length_line = format!("Content-Length: {}", len);
            let (head, _) = parse(&[
                "HTTP/1.1 200 OK",
                &length_line,
                "Content-Type: application/octet-stream",
                "",
            ]);
            prop_assert_eq!(head.content_length, len);
            prop_assert!(head.is_acceptable());
        }

        #[test]
        fn prop_parser_never_panics(lines in proptest::collection::vec(".*", 0..8)) {
            let mut parser = HeaderParser::new();
            for line in &lines {
                parser.feed_line(line);
            }
            let _ = parser.head();
        }
    }
}
