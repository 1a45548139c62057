//! Single-shot QR scanning over a live camera feed.
//!
//! The scanner samples frames at a fixed rate, crops a centred square scan
//! region and hands it to a [`FrameDecoder`]. The first non-empty payload is
//! trimmed and delivered exactly once, then the camera is released. Frames
//! that arrive after that are never examined.
//!
//! A frame without a code is normal and is not reported. `on_error` fires
//! only when the camera cannot be acquired.

use crate::capture::{CameraConstraints, CameraDevice, FacingMode, MediaStream};
use crate::config::PipelineConfig;
use crate::error::ProofError;
use image::{imageops, RgbaImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// QR decoding capability. Returns the raw payload, if any, found in `frame`.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, frame: &RgbaImage) -> Option<String>;
}

/// Rectangle of a frame that is passed to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScanRegion {
    /// A `size`×`size` square centred in the frame, clipped to its bounds.
    pub fn centered(frame_width: u32, frame_height: u32, size: u32) -> Self {
        let width = size.min(frame_width);
        let height = size.min(frame_height);
        Self {
            x: (frame_width - width) / 2,
            y: (frame_height - height) / 2,
            width,
            height,
        }
    }

    fn crop(&self, frame: &RgbaImage) -> RgbaImage {
        imageops::crop_imm(frame, self.x, self.y, self.width, self.height).to_image()
    }
}

/// State of a [`QrDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    Starting,
    Scanning,
    Decoded,
    Error,
}

struct ScanShared {
    fired: AtomicBool,
    stream: Mutex<Option<Box<dyn MediaStream>>>,
    state: Mutex<ScannerState>,
}

impl ScanShared {
    fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            stream: Mutex::new(None),
            state: Mutex::new(ScannerState::Idle),
        }
    }

    fn set_state(&self, state: ScannerState) {
        *lock(&self.state) = state;
    }

    fn release_camera(&self) {
        if let Some(mut stream) = lock(&self.stream).take() {
            stream.stop();
            debug!("QR camera tracks stopped");
        }
    }
}

/// Holds the scanner in `Starting` while the camera is requested. Dropped
/// without [`StartingGuard::disarm`], it returns the scanner to `Idle`.
struct StartingGuard {
    shared: Arc<ScanShared>,
    armed: bool,
}

impl StartingGuard {
    fn arm(shared: Arc<ScanShared>) -> Self {
        shared.set_state(ScannerState::Starting);
        Self {
            shared,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartingGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("QR camera request abandoned; scanner back to Idle");
            self.shared.set_state(ScannerState::Idle);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Single-shot QR scanner. Owns its camera stream exclusively.
pub struct QrDecoder {
    device: Arc<dyn CameraDevice>,
    decoder: Arc<dyn FrameDecoder>,
    constraints: CameraConstraints,
    frame_interval: Duration,
    box_size: u32,
    shared: Arc<ScanShared>,
    task: Option<JoinHandle<()>>,
}

impl QrDecoder {
    pub fn new(
        device: Arc<dyn CameraDevice>,
        decoder: Arc<dyn FrameDecoder>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            device,
            decoder,
            constraints: CameraConstraints {
                facing_mode: FacingMode::from_user_agent(&config.user_agent),
            },
            frame_interval: Duration::from_millis(1000 / config.qr_scan_fps.max(1) as u64),
            box_size: config.qr_box_size,
            shared: Arc::new(ScanShared::new()),
            task: None,
        }
    }

    pub fn state(&self) -> ScannerState {
        *lock(&self.shared.state)
    }

    /// Open the camera and scan until the first payload is decoded.
    ///
    /// `on_decode` runs at most once, from the scanning task. `on_error` runs
    /// only if the camera cannot be acquired. Calling `start` while already
    /// starting or scanning does nothing.
    pub async fn start<D, E>(&mut self, on_decode: D, on_error: E)
    where
        D: FnOnce(String) + Send + 'static,
        E: FnOnce(ProofError),
    {
        if matches!(self.state(), ScannerState::Starting | ScannerState::Scanning) {
            debug!("QR start() ignored: already {:?}", self.state());
            return;
        }

        // A finished scan leaves its own shared state behind; start afresh.
        self.stop();
        self.shared = Arc::new(ScanShared::new());
        let opened = {
            let guard = StartingGuard::arm(Arc::clone(&self.shared));
            let opened = self.device.open(&self.constraints).await;
            guard.disarm();
            opened
        };

        let stream = match opened {
            Ok(stream) => stream,
            Err(reason) => {
                warn!("QR camera access failed: {}", reason);
                self.shared.set_state(ScannerState::Error);
                on_error(ProofError::CameraAccess(reason));
                return;
            }
        };
        *lock(&self.shared.stream) = Some(stream);
        self.shared.set_state(ScannerState::Scanning);
        info!("QR scanning started");

        let shared = Arc::clone(&self.shared);
        let decoder = Arc::clone(&self.decoder);
        let interval = self.frame_interval;
        let box_size = self.box_size;

        self.task = Some(tokio::spawn(async move {
            let mut on_decode = Some(on_decode);
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if shared.fired.load(Ordering::SeqCst) {
                    break;
                }

                let frame = match lock(&shared.stream).as_mut() {
                    Some(stream) => stream.current_frame(),
                    None => break,
                };
                let Some(frame) = frame else { continue };

                let region = ScanRegion::centered(frame.width(), frame.height(), box_size);
                let Some(raw) = decoder.decode(&region.crop(&frame)) else {
                    continue;
                };
                let payload = raw.trim().to_string();
                if payload.is_empty() {
                    continue;
                }

                if shared
                    .fired
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    info!("QR decoded ({} chars)", payload.len());
                    shared.set_state(ScannerState::Decoded);
                    if let Some(callback) = on_decode.take() {
                        callback(payload);
                    }
                    shared.release_camera();
                }
                break;
            }
        }));
    }

    /// Stop scanning and release the camera. Idempotent; leaves the scanner `Idle`.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared.fired.store(true, Ordering::SeqCst);
        self.shared.release_camera();
        self.shared.set_state(ScannerState::Idle);
    }
}

impl Drop for QrDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}
