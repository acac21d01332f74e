//! Scripted stand-ins for the platform capabilities, for host tests

use std::cell::Cell;
use std::collections::VecDeque;
use std::io::Read;

use crate::identity::DeviceIdentity;
use crate::traits::{copy_stream, Clock, FlashWriter, HttpGet, HttpResponse, Reboot, Transport};

/// Clock that only moves when polled
#[derive(Debug)]
pub struct FakeClock {
    now: Cell<u64>,
    step_ms: u64,
}

impl FakeClock {
    /// Every idle poll advances time by `step_ms`
    pub fn new(step_ms: u64) -> Self {
        Self {
            now: Cell::new(0),
            step_ms,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.now.get()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn idle(&self) {
        self.now.set(self.now.get() + self.step_ms);
    }
}

/// Server side of one firmware fetch, replayed byte for byte
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    pub refuse_connect: bool,
    /// Empty polls before the response starts arriving
    pub polls_before_data: usize,
    /// Peer never closes; used with an empty script to simulate a stalled server
    pub keep_open: bool,
    /// Largest slice handed out per read
    pub max_read: usize,
    incoming: VecDeque<u8>,
    pub connected_to: Option<(String, u16)>,
    pub sent: Vec<u8>,
    pub closed: bool,
}

impl ScriptedTransport {
    pub fn with_response(response: Vec<u8>) -> Self {
        Self {
            incoming: response.into(),
            max_read: usize::MAX,
            ..Default::default()
        }
    }

    /// Accepts the connection and the request, then never answers
    pub fn silent() -> Self {
        Self {
            keep_open: true,
            max_read: usize::MAX,
            ..Default::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse_connect: true,
            ..Default::default()
        }
    }

    /// Response head followed by `body`
    pub fn firmware_response(status: &str, content_type: &str, declared_len: u64, body: &[u8]) -> Self {
        let mut response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
            status, declared_len, content_type
        )
        .into_bytes();
        response.extend_from_slice(body);
        Self::with_response(response)
    }

    pub fn sent_text(&self) -> String {
        String::from_utf8_lossy(&self.sent).into_owned()
    }

    pub fn remaining(&self) -> usize {
        self.incoming.len()
    }
}

impl Transport for ScriptedTransport {
    type Error = String;

    fn connect(&mut self, host: &str, port: u16) -> Result<(), Self::Error> {
        if self.refuse_connect {
            return Err(format!("connection refused by {}:{}", host, port));
        }
        self.connected_to = Some((host.to_string(), port));
        self.closed = false;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if self.closed {
            return Err("write after close".to_string());
        }
        self.sent.extend_from_slice(data);
        Ok(())
    }

    fn available(&mut self) -> usize {
        if self.polls_before_data > 0 {
            self.polls_before_data -= 1;
            return 0;
        }
        self.incoming.len().min(self.max_read)
    }

    fn connected(&mut self) -> bool {
        !self.closed && (self.keep_open || !self.incoming.is_empty())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = buf.len().min(self.incoming.len()).min(self.max_read);
        for (slot, byte) in buf.iter_mut().zip(self.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// In-memory update slot with knobs for every failure the engine handles
#[derive(Debug)]
pub struct FakeFlash {
    pub capacity: u64,
    pub commit_ok: bool,
    pub commit_error_code: i32,
    /// Fail writes once this many bytes have landed
    pub fail_writes_after: Option<u64>,
    pub image: Vec<u8>,
    pub expected: Option<u64>,
    pub committed: bool,
    pub begin_calls: usize,
    pub stream_calls: usize,
    pub end_calls: usize,
    error_code: i32,
}

impl FakeFlash {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            commit_ok: true,
            commit_error_code: 0,
            fail_writes_after: None,
            image: Vec::new(),
            expected: None,
            committed: false,
            begin_calls: 0,
            stream_calls: 0,
            end_calls: 0,
            error_code: 0,
        }
    }
}

impl FlashWriter for FakeFlash {
    type Error = String;

    fn begin(&mut self, size: u64) -> bool {
        self.begin_calls += 1;
        if size > self.capacity {
            return false;
        }
        self.expected = Some(size);
        self.image.clear();
        true
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        if let Some(limit) = self.fail_writes_after {
            if self.image.len() as u64 >= limit {
                return Err(format!("flash write error at {}", self.image.len()));
            }
        }
        self.image.extend_from_slice(chunk);
        Ok(())
    }

    fn write_stream(
        &mut self,
        source: &mut dyn Read,
        total: u64,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> u64 {
        self.stream_calls += 1;
        copy_stream(self, source, total, on_progress)
    }

    fn end(&mut self) -> bool {
        self.end_calls += 1;
        if !self.commit_ok {
            self.error_code = self.commit_error_code;
            return false;
        }
        self.committed = true;
        true
    }

    fn is_finished(&self) -> bool {
        self.committed && Some(self.image.len() as u64) == self.expected
    }

    fn error_code(&self) -> i32 {
        self.error_code
    }
}

#[derive(Debug, Default)]
pub struct FakeReboot {
    pub count: usize,
}

impl Reboot for FakeReboot {
    fn reboot(&mut self) {
        self.count += 1;
    }
}

/// Manifest server answering every GET the same way
#[derive(Debug, Clone)]
pub struct FakeHttp {
    pub connected: bool,
    pub response: Result<HttpResponse, String>,
    pub requests: Vec<String>,
}

impl FakeHttp {
    pub fn ok_json(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            connected: true,
            response: Ok(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            }),
            requests: Vec::new(),
        }
    }

    pub fn offline() -> Self {
        Self {
            connected: false,
            ..Self::status(200, "")
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            connected: true,
            response: Err(detail.to_string()),
            requests: Vec::new(),
        }
    }
}

impl HttpGet for FakeHttp {
    type Error = String;

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn get(&mut self, url: &str) -> Result<HttpResponse, Self::Error> {
        self.requests.push(url.to_string());
        self.response.clone()
    }
}

/// Fixed device id
#[derive(Debug, Clone)]
pub struct FixedDeviceId(pub u64);

impl DeviceIdentity for FixedDeviceId {
    fn device_id(&self) -> String {
        self.0.to_string()
    }
}
