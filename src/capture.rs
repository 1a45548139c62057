//! Camera capture: acquire a stream, show a live preview, grab a still,
//! and release the camera on every exit path.
//!
//! The camera itself is a capability ([`CameraDevice`] / [`MediaStream`]).
//! A browser binding, a V4L2 wrapper and the in-memory test doubles all plug
//! in the same way.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start()──▶ Starting ──▶ Live ──capture_photo()──▶ Captured
//!   ▲                   │          │
//!   │                   ▼          ├──cancel()──▶ Stopped
//!   └──────stop()─── Error         └──stop()────▶ Idle
//! ```
//!
//! Every transition out of `Live` stops all media tracks and detaches the
//! preview sink. Dropping the session does the same, so an unmounted view
//! never leaks a camera.

use crate::config::OutputFormat;
use crate::error::ProofError;
use crate::models::{CapturedArtifact, DocumentFile, SourceMethod, MIME_JPEG};
use crate::pipeline::encode::encode_image;
use async_trait::async_trait;
use image::{DynamicImage, RgbaImage};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

static MOBILE_UA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)android|iphone|ipad|ipod|mobile|blackberry|iemobile|opera mini|webos")
        .expect("valid mobile user-agent pattern")
});

/// Which camera to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Front camera.
    User,
    /// Rear camera.
    Environment,
}

impl FacingMode {
    /// Rear camera on mobile user agents, front camera everywhere else.
    pub fn from_user_agent(user_agent: &str) -> Self {
        if MOBILE_UA.is_match(user_agent) {
            FacingMode::Environment
        } else {
            FacingMode::User
        }
    }
}

/// Constraints passed to [`CameraDevice::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConstraints {
    pub facing_mode: FacingMode,
}

/// A live camera stream owned by exactly one session.
pub trait MediaStream: Send {
    /// Native resolution of the video track.
    fn resolution(&self) -> (u32, u32);

    /// The frame currently shown, or `None` before the first frame arrives.
    fn current_frame(&mut self) -> Option<RgbaImage>;

    /// Stop every track. Must be safe to call more than once.
    fn stop(&mut self);

    /// `false` once every track has been stopped.
    fn is_active(&self) -> bool;
}

/// Camera acquisition capability.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Request a stream. Errors describe permission or device failures.
    async fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn MediaStream>, String>;
}

/// Where live frames are shown (a `<video>` element, a window, nothing).
pub trait PreviewSink: Send {
    fn attach(&mut self, resolution: (u32, u32));
    fn detach(&mut self);
}

/// State of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Live,
    Captured,
    Stopped,
    Error,
}

/// One camera capture attempt.
pub struct CaptureSession {
    device: Arc<dyn CameraDevice>,
    constraints: CameraConstraints,
    quality: u8,
    state: CaptureState,
    stream: Option<Box<dyn MediaStream>>,
    sink: Option<Box<dyn PreviewSink>>,
    sink_attached: bool,
    artifact: Option<CapturedArtifact>,
}

impl CaptureSession {
    /// Create an idle session. `user_agent` picks the preferred camera and
    /// `quality` (1–100) is the JPEG quality of captured stills.
    pub fn new(device: Arc<dyn CameraDevice>, user_agent: &str, quality: u8) -> Self {
        Self {
            device,
            constraints: CameraConstraints {
                facing_mode: FacingMode::from_user_agent(user_agent),
            },
            quality: quality.clamp(1, 100),
            state: CaptureState::Idle,
            stream: None,
            sink: None,
            sink_attached: false,
            artifact: None,
        }
    }

    /// Attach a preview sink that is fed while the session is live.
    pub fn with_preview(mut self, sink: Box<dyn PreviewSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn facing_mode(&self) -> FacingMode {
        self.constraints.facing_mode
    }

    /// The still from the last successful capture, if not yet discarded.
    pub fn artifact(&self) -> Option<&CapturedArtifact> {
        self.artifact.as_ref()
    }

    /// Take ownership of the captured still.
    pub fn take_artifact(&mut self) -> Option<CapturedArtifact> {
        self.artifact.take()
    }

    /// `true` while a stream with live tracks is held.
    pub fn holds_camera(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_active())
    }

    /// Acquire the camera and start the live preview.
    ///
    /// A no-op while `Starting` or `Live`.
    pub async fn start(&mut self) -> Result<(), ProofError> {
        if matches!(self.state, CaptureState::Starting | CaptureState::Live) {
            debug!("start() ignored: session already {:?}", self.state);
            return Ok(());
        }

        info!("Requesting camera ({:?})", self.constraints.facing_mode);
        let opened = {
            let guard = StartGuard::arm(&mut self.state);
            let opened = self.device.open(&self.constraints).await;
            guard.disarm();
            opened
        };

        match opened {
            Ok(stream) => {
                let resolution = stream.resolution();
                self.stream = Some(stream);
                if let Some(sink) = self.sink.as_mut() {
                    sink.attach(resolution);
                    self.sink_attached = true;
                }
                self.state = CaptureState::Live;
                debug!("Camera live at {}x{}", resolution.0, resolution.1);
                Ok(())
            }
            Err(reason) => {
                warn!("Camera access failed: {}", reason);
                self.release();
                self.state = CaptureState::Error;
                Err(ProofError::CameraAccess(reason))
            }
        }
    }

    /// Grab the current frame at native resolution and encode it as JPEG.
    ///
    /// Releases the camera afterwards; use [`CaptureSession::retake`] to
    /// go again.
    pub fn capture_photo(&mut self) -> Result<CapturedArtifact, ProofError> {
        if self.state != CaptureState::Live {
            return Err(ProofError::CameraAccess(format!(
                "cannot capture while {:?}",
                self.state
            )));
        }

        let frame = self
            .stream
            .as_mut()
            .and_then(|s| s.current_frame())
            .ok_or_else(|| ProofError::CameraAccess("no video frame available yet".into()))?;

        let bytes = encode_image(&DynamicImage::ImageRgba8(frame), OutputFormat::Jpeg, self.quality)
            .map_err(|e| ProofError::CameraAccess(format!("could not encode frame: {e}")))?;
        if bytes.is_empty() {
            return Err(ProofError::CameraAccess("encoder produced no data".into()));
        }

        let name = format!(
            "camera_capture_{}.jpg",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        let artifact = CapturedArtifact {
            file: DocumentFile::new(name.clone(), MIME_JPEG, bytes),
            origin_name: name,
            source: SourceMethod::Camera,
            page_count: 1,
        };
        info!("Captured still: {} bytes", artifact.size_bytes());

        self.release();
        self.artifact = Some(artifact.clone());
        self.state = CaptureState::Captured;
        Ok(artifact)
    }

    /// Discard the captured still and start the camera again.
    pub async fn retake(&mut self) -> Result<(), ProofError> {
        self.artifact = None;
        self.release();
        self.state = CaptureState::Idle;
        self.start().await
    }

    /// Release the camera and return to `Idle`. Idempotent.
    pub fn stop(&mut self) {
        self.release();
        self.state = CaptureState::Idle;
    }

    /// Release the camera, discard any captured still, and end in `Stopped`.
    pub fn cancel(&mut self) {
        self.release();
        self.artifact = None;
        self.state = CaptureState::Stopped;
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("Camera tracks stopped");
        }
        if self.sink_attached {
            if let Some(sink) = self.sink.as_mut() {
                sink.detach();
            }
            self.sink_attached = false;
        }
    }
}

/// Marks a session `Starting` while the camera is requested, and puts it
/// back to `Idle` if `start()` is dropped before the device answers.
struct StartGuard<'a> {
    state: &'a mut CaptureState,
    armed: bool,
}

impl<'a> StartGuard<'a> {
    fn arm(state: &'a mut CaptureState) -> Self {
        *state = CaptureState::Starting;
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Camera request abandoned; session back to Idle");
            *self.state = CaptureState::Idle;
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeCamera;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const IPHONE: &str =
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148";
    const DESKTOP: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120.0";

    struct CountingSink {
        attached: Arc<AtomicUsize>,
    }

    impl PreviewSink for CountingSink {
        fn attach(&mut self, _resolution: (u32, u32)) {
            self.attached.fetch_add(1, Ordering::SeqCst);
        }
        fn detach(&mut self) {
            self.attached.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn facing_mode_follows_user_agent() {
        assert_eq!(FacingMode::from_user_agent(IPHONE), FacingMode::Environment);
        assert_eq!(
            FacingMode::from_user_agent("Mozilla/5.0 (Linux; Android 14; Pixel 8)"),
            FacingMode::Environment
        );
        assert_eq!(FacingMode::from_user_agent(DESKTOP), FacingMode::User);
        assert_eq!(FacingMode::from_user_agent(""), FacingMode::User);
    }

    #[tokio::test]
    async fn start_requests_preferred_camera_and_goes_live() {
        let cam = Arc::new(FakeCamera::default());
        let mut session = CaptureSession::new(cam.clone(), IPHONE, 92);
        session.start().await.unwrap();
        assert_eq!(session.state(), CaptureState::Live);
        assert_eq!(
            *cam.last_facing.lock().unwrap(),
            Some(FacingMode::Environment)
        );
        assert_eq!(cam.live(), 1);
    }

    #[tokio::test]
    async fn start_while_live_is_a_no_op() {
        let cam = Arc::new(FakeCamera::default());
        let mut session = CaptureSession::new(cam.clone(), DESKTOP, 92);
        session.start().await.unwrap();
        session.start().await.unwrap();
        assert_eq!(cam.opened.load(Ordering::SeqCst), 1);
        assert_eq!(cam.live(), 1);
    }

    #[tokio::test]
    async fn abandoned_start_returns_to_idle_and_can_start_again() {
        let cam = Arc::new(FakeCamera {
            open_delay: Some(Duration::from_millis(200)),
            ..FakeCamera::default()
        });
        let mut session = CaptureSession::new(cam.clone(), DESKTOP, 92);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), session.start()).await;
        assert!(abandoned.is_err());
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(cam.opened.load(Ordering::SeqCst), 0);

        session.start().await.unwrap();
        assert_eq!(session.state(), CaptureState::Live);
        assert_eq!(cam.opened.load(Ordering::SeqCst), 1);
        assert!(session.holds_camera());
        session.capture_photo().unwrap();
        assert!(!session.holds_camera());
    }

    #[tokio::test]
    async fn denied_permission_is_camera_access_error() {
        let cam = Arc::new(FakeCamera {
            deny: true,
            ..FakeCamera::default()
        });
        let mut session = CaptureSession::new(cam.clone(), DESKTOP, 92);
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, ProofError::CameraAccess(_)));
        assert_eq!(session.state(), CaptureState::Error);
        assert!(!session.holds_camera());
    }

    #[tokio::test]
    async fn capture_produces_jpeg_and_releases_camera() {
        let cam = Arc::new(FakeCamera::default());
        let mut session = CaptureSession::new(cam.clone(), DESKTOP, 90);
        session.start().await.unwrap();
        let artifact = session.capture_photo().unwrap();

        assert_eq!(artifact.source, SourceMethod::Camera);
        assert_eq!(artifact.mime_type(), MIME_JPEG);
        assert_eq!(artifact.page_count, 1);
        let img = image::load_from_memory(&artifact.file.bytes).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));

        assert_eq!(session.state(), CaptureState::Captured);
        assert_eq!(cam.live(), 0);
    }

    #[tokio::test]
    async fn capture_requires_live_session() {
        let cam = Arc::new(FakeCamera::default());
        let mut session = CaptureSession::new(cam, DESKTOP, 90);
        assert!(session.capture_photo().is_err());
    }

    #[tokio::test]
    async fn retake_discards_artifact_and_restarts() {
        let cam = Arc::new(FakeCamera::default());
        let mut session = CaptureSession::new(cam.clone(), DESKTOP, 90);
        session.start().await.unwrap();
        session.capture_photo().unwrap();
        session.retake().await.unwrap();
        assert!(session.artifact().is_none());
        assert_eq!(session.state(), CaptureState::Live);
        assert_eq!(cam.opened.load(Ordering::SeqCst), 2);
        assert_eq!(cam.live(), 1);
    }

    #[tokio::test]
    async fn stop_twice_is_idle_and_releases_everything() {
        let cam = Arc::new(FakeCamera::default());
        let attached = Arc::new(AtomicUsize::new(0));
        let mut session = CaptureSession::new(cam.clone(), DESKTOP, 90).with_preview(Box::new(
            CountingSink {
                attached: attached.clone(),
            },
        ));
        session.start().await.unwrap();
        assert_eq!(attached.load(Ordering::SeqCst), 1);

        session.stop();
        session.stop();
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(cam.live(), 0);
        assert_eq!(attached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_discards_artifact() {
        let cam = Arc::new(FakeCamera::default());
        let mut session = CaptureSession::new(cam.clone(), DESKTOP, 90);
        session.start().await.unwrap();
        session.capture_photo().unwrap();
        session.cancel();
        assert!(session.artifact().is_none());
        assert_eq!(session.state(), CaptureState::Stopped);
    }

    #[tokio::test]
    async fn dropping_a_live_session_stops_tracks() {
        let cam = Arc::new(FakeCamera::default());
        {
            let mut session = CaptureSession::new(cam.clone(), DESKTOP, 90);
            session.start().await.unwrap();
            assert_eq!(cam.live(), 1);
        }
        assert_eq!(cam.live(), 0);
    }
}
