//! Local audio capture.

use crate::error::MediaError;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// One 20 ms Opus frame of silence.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
const OPUS_FRAME: Duration = Duration::from_millis(20);

/// A running capture track.
pub trait CaptureTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Track handed to the peer connection.
    fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync>;

    /// Release the capture device. Repeated calls do nothing.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// Capture tracks acquired for one call.
#[derive(Clone, Default)]
pub struct LocalMedia {
    tracks: Vec<Arc<dyn CaptureTrack>>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<Arc<dyn CaptureTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn CaptureTrack>] {
        &self.tracks
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            if !track.is_stopped() {
                debug!(track = track.id(), "stopping capture track");
                track.stop();
            }
        }
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire_audio(&self) -> Result<LocalMedia, MediaError>;
}

pub fn opus_track(track_id: &str, stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        track_id.to_owned(),
        stream_id.to_owned(),
    ))
}

/// Media source that captures silence; stands in for a microphone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilenceSource;

#[async_trait]
impl MediaSource for SilenceSource {
    async fn acquire_audio(&self) -> Result<LocalMedia, MediaError> {
        let track = SilentTrack::start(format!("audio-{}", random_id()));
        Ok(LocalMedia::new(vec![Arc::new(track)]))
    }
}

struct SilentTrack {
    id: String,
    track: Arc<TrackLocalStaticSample>,
    writer: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl SilentTrack {
    fn start(id: String) -> Self {
        let track = opus_track(&id, &format!("stream-{id}"));
        let writer = tokio::spawn({
            let track = track.clone();
            async move {
                let mut ticker = tokio::time::interval(OPUS_FRAME);
                loop {
                    ticker.tick().await;
                    let sample = Sample {
                        data: Bytes::from_static(&OPUS_SILENCE),
                        duration: OPUS_FRAME,
                        ..Default::default()
                    };
                    if let Err(e) = track.write_sample(&sample).await {
                        trace!(error = %e, "silence frame not written");
                    }
                }
            }
        });
        Self {
            id,
            track,
            writer: Mutex::new(Some(writer)),
            stopped: AtomicBool::new(false),
        }
    }
}

impl CaptureTrack for SilentTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = writer {
            handle.abort();
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for SilentTrack {
    fn drop(&mut self) {
        self.stop();
    }
}
