/// Platform capabilities consumed by the update engine
use std::fmt;
use std::io::{ErrorKind, Read};

/// Flash writes happen in blocks of this size
pub const WRITE_CHUNK_SIZE: usize = 4096;

/// Encrypted byte stream to the firmware server
pub trait Transport {
    type Error: fmt::Debug;

    fn connect(&mut self, host: &str, port: u16) -> Result<(), Self::Error>;
    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error>;
    /// Bytes readable right now without blocking
    fn available(&mut self) -> usize;
    /// `true` while the peer is open or unread data remains
    fn connected(&mut self) -> bool;
    /// Blocking read. `Ok(0)` means the peer closed the connection.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
    fn close(&mut self);
}

/// Monotonic millisecond clock used for the busy-wait timeouts
pub trait Clock {
    fn now_ms(&self) -> u64;

    /// Called on every empty poll; platforms yield to other tasks here
    fn idle(&self) {}
}

/// Update partition writer
pub trait FlashWriter {
    type Error: fmt::Debug;

    /// Prepare the update slot for `size` bytes. `false` means not enough space.
    fn begin(&mut self, size: u64) -> bool;
    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error>;
    /// Commit the image. `false` leaves the slot unbootable.
    fn end(&mut self) -> bool;
    fn is_finished(&self) -> bool;
    fn error_code(&self) -> i32;

    /// Copy up to `total` bytes from `source` into the update slot and return
    /// how many landed. Stops early when the source is exhausted or a write fails.
    fn write_stream(
        &mut self,
        source: &mut dyn Read,
        total: u64,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> u64 {
        copy_stream(self, source, total, on_progress)
    }
}

/// Default streaming loop behind [`FlashWriter::write_stream`]
pub fn copy_stream<W: FlashWriter + ?Sized>(
    writer: &mut W,
    source: &mut dyn Read,
    total: u64,
    on_progress: &mut dyn FnMut(u64, u64),
) -> u64 {
    let mut buf = [0u8; WRITE_CHUNK_SIZE];
    let mut written = 0u64;

    while written < total {
        let want = (total - written).min(buf.len() as u64) as usize;
        let read = match source.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("Firmware stream read failed at {}/{}: {}", written, total, e);
                break;
            }
        };

        if let Err(e) = writer.write(&buf[..read]) {
            log::error!("Flash write failed at offset {}: {:?}", written, e);
            break;
        }

        written += read as u64;
        on_progress(written, total);
    }

    written
}

/// Result of a manifest GET. The body is only meaningful for status 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// HTTP(S) GET capability used by the manifest check
pub trait HttpGet {
    type Error: fmt::Debug;

    fn is_connected(&self) -> bool;
    fn get(&mut self, url: &str) -> Result<HttpResponse, Self::Error>;
}

/// Device reset. On hardware this never returns.
pub trait Reboot {
    fn reboot(&mut self);
}
