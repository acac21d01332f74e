/// Download-and-flash state machine
///
/// One call to [`UpdateExecutor::execute`] is one update attempt:
///
/// ```text
/// Connecting -> AwaitingResponse -> ParsingHeaders -> Streaming -> Finalizing -> Rebooting
///      \________________\__________________\______________\____________\----> Failed(reason)
/// ```
///
/// Every failure leaves the running firmware active. Only a successful commit
/// with a finished image reaches `Rebooting`, after which the device resets.
use crate::error::FotaError;
use crate::http::{build_get_request, HeaderParser, HeaderStep, ResponseReader};
use crate::manifest::UpdateManifest;
use crate::traits::{Clock, FlashWriter, Reboot, Transport};
use crate::{config::DEFAULT_FIRST_BYTE_TIMEOUT_MS, error::FailureReason};

pub type ProgressCallback = Box<dyn FnMut(u64, u64)>;
pub type CompleteCallback = Box<dyn FnMut()>;

/// Where to fetch the image from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl UpdateRequest {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
        }
    }
}

impl From<&UpdateManifest> for UpdateRequest {
    fn from(manifest: &UpdateManifest) -> Self {
        Self::new(manifest.host.clone(), manifest.port, manifest.path.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    AwaitingResponse,
    ParsingHeaders,
    Streaming,
    Finalizing,
    Rebooting,
    Failed(FailureReason),
}

/// Per-attempt bookkeeping, discarded when the next attempt starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadState {
    pub content_length: u64,
    pub content_type_valid: bool,
    pub bytes_written: u64,
    pub phase: Phase,
}

impl Default for DownloadState {
    fn default() -> Self {
        Self {
            content_length: 0,
            content_type_valid: false,
            bytes_written: 0,
            phase: Phase::Idle,
        }
    }
}

impl DownloadState {
    fn enter(&mut self, phase: Phase) {
        log::debug!("OTA phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

/// Successful end of an attempt. On hardware the reboot never returns, so this
/// is only observed with a test double.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub bytes_written: u64,
}

pub struct UpdateExecutor<T, F, C, R>
where
    T: Transport,
    F: FlashWriter,
    C: Clock,
    R: Reboot,
{
    transport: T,
    flash: F,
    clock: C,
    reboot: R,
    first_byte_timeout_ms: u64,
    on_progress: Option<ProgressCallback>,
    on_complete: Option<CompleteCallback>,
    state: DownloadState,
}

impl<T, F, C, R> UpdateExecutor<T, F, C, R>
where
    T: Transport,
    F: FlashWriter,
    C: Clock,
    R: Reboot,
{
    pub fn new(transport: T, flash: F, clock: C, reboot: R) -> Self {
        Self {
            transport,
            flash,
            clock,
            reboot,
            first_byte_timeout_ms: DEFAULT_FIRST_BYTE_TIMEOUT_MS,
            on_progress: None,
            on_complete: None,
            state: DownloadState::default(),
        }
    }

    pub fn with_first_byte_timeout(mut self, timeout_ms: u64) -> Self {
        self.first_byte_timeout_ms = timeout_ms;
        self
    }

    /// Called with `(bytes_written, total_bytes)` as image data lands in flash
    pub fn on_progress(&mut self, callback: impl FnMut(u64, u64) + 'static) {
        self.on_progress = Some(Box::new(callback));
    }

    /// Called once, right before the reset into the new image
    pub fn on_complete(&mut self, callback: impl FnMut() + 'static) {
        self.on_complete = Some(Box::new(callback));
    }

    /// State of the current or most recent attempt
    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn reboot_handle(&self) -> &R {
        &self.reboot
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Run one complete update attempt against `request`
    pub fn execute(&mut self, request: &UpdateRequest) -> Result<UpdateOutcome, FotaError> {
        self.state = DownloadState::default();

        if let Err(e) = self.download_and_commit(request) {
            self.state.enter(Phase::Failed(e.reason()));
            log::error!("OTA update from {} failed: {}", request.host, e);
            return Err(e);
        }

        self.state.enter(Phase::Rebooting);
        if let Some(callback) = self.on_complete.as_mut() {
            callback();
        }
        log::info!("Update successfully completed. Rebooting.");
        self.reboot.reboot();

        Ok(UpdateOutcome {
            bytes_written: self.state.bytes_written,
        })
    }

    fn download_and_commit(&mut self, request: &UpdateRequest) -> Result<(), FotaError> {
        self.state.enter(Phase::Connecting);
        log::info!("Connecting to: {}:{}", request.host, request.port);

        self.transport
            .connect(&request.host, request.port)
            .map_err(|e| FotaError::Connection {
                target: format!("{}:{}", request.host, request.port),
                detail: format!("{:?}", e),
            })?;

        let result = self.fetch_and_flash(request);
        self.transport.close();
        result
    }

    fn fetch_and_flash(&mut self, request: &UpdateRequest) -> Result<(), FotaError> {
        let Self {
            transport,
            flash,
            clock,
            first_byte_timeout_ms,
            on_progress,
            state,
            ..
        } = self;
        let timeout_ms = *first_byte_timeout_ms;

        state.enter(Phase::AwaitingResponse);
        log::info!("Fetching Bin: {}", request.path);
        transport
            .write_all(build_get_request(&request.host, &request.path).as_bytes())
            .map_err(|e| FotaError::Connection {
                target: format!("{}:{}", request.host, request.port),
                detail: format!("{:?}", e),
            })?;

        let mut reader = ResponseReader::new(transport, &*clock);
        if let Err(e) = reader.wait_for_first_byte(timeout_ms) {
            log::warn!("Client Timeout !");
            return Err(e);
        }

        state.enter(Phase::ParsingHeaders);
        let mut parser = HeaderParser::new();
        loop {
            match reader.read_line(timeout_ms) {
                Ok(Some(line)) => match parser.feed_line(&line) {
                    HeaderStep::Continue => {}
                    HeaderStep::Done | HeaderStep::Rejected => break,
                },
                Ok(None) => {
                    log::warn!("Response ended before the end of headers");
                    break;
                }
                Err(FotaError::Timeout { waited_ms }) => {
                    log::warn!("Header read stalled for {} ms", waited_ms);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let head = parser.head();
        state.content_length = head.content_length;
        state.content_type_valid = head.content_type_valid;
        log::info!(
            "contentLength : {}, isValidContentType : {}",
            head.content_length,
            head.content_type_valid
        );

        if !head.is_acceptable() {
            log::warn!("There was no content in the response");
            reader.drain();
            return Err(FotaError::InvalidResponse {
                status: head.status,
                content_length: head.content_length,
                content_type_valid: head.content_type_valid,
            });
        }

        let expected = head.content_length;
        if !flash.begin(expected) {
            log::warn!("Not enough space to begin OTA");
            reader.drain();
            return Err(FotaError::InsufficientSpace { required: expected });
        }

        state.enter(Phase::Streaming);
        log::info!("Begin OTA update, this may take a couple of minutes..");
        let mut report = |written: u64, total: u64| {
            if let Some(callback) = on_progress.as_mut() {
                callback(written, total);
            }
        };
        let written = flash.write_stream(&mut reader, expected, &mut report);
        state.bytes_written = written;

        if written == expected {
            log::info!("Written : {} successfully", written);
        } else {
            // The commit below decides whether a short image is usable
            log::warn!("Written only : {}/{}", written, expected);
        }

        state.enter(Phase::Finalizing);
        if !flash.end() {
            let code = flash.error_code();
            log::error!("Error Occurred. Error #: {}", code);
            return Err(FotaError::FlashCommit { code });
        }
        log::info!("OTA done!");

        if !flash.is_finished() {
            log::error!("Update not finished? Something went wrong!");
            return Err(FotaError::IncompleteImage {
                written,
                expected,
            });
        }

        Ok(())
    }
}
