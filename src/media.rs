use crate::error::{MediaError, PeerError};
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    fn capability(self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }
}

/// Аналог `MediaStreamTrack.readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

pub enum TrackSource {
    Local(Arc<TrackLocalStaticSample>),
    Remote(Arc<TrackRemote>),
}

/// Медиа-трек звонка: локальный (пишем сэмплы) или удалённый (приходит от пира)
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    stream_id: String,
    live: AtomicBool,
    source: TrackSource,
}

impl MediaTrack {
    /// Локальный трек, в который внешний энкодер пишет готовые сэмплы
    pub fn local(kind: TrackKind, id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let id = id.into();
        let stream_id = stream_id.into();
        let sample_track = Arc::new(TrackLocalStaticSample::new(
            kind.capability(),
            id.clone(),
            stream_id.clone(),
        ));
        Self {
            id,
            kind,
            stream_id,
            live: AtomicBool::new(true),
            source: TrackSource::Local(sample_track),
        }
    }

    pub fn remote(track: Arc<TrackRemote>) -> Self {
        let kind = match track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        };
        Self {
            id: track.id(),
            kind,
            stream_id: track.stream_id(),
            live: AtomicBool::new(true),
            source: TrackSource::Remote(track),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn source(&self) -> &TrackSource {
        &self.source
    }

    pub fn state(&self) -> TrackState {
        if self.live.load(Ordering::SeqCst) {
            TrackState::Live
        } else {
            TrackState::Ended
        }
    }

    /// Останавливает трек. Возвращает `false`, если он уже был остановлен
    pub fn stop(&self) -> bool {
        self.live.swap(false, Ordering::SeqCst)
    }

    /// Пишет закодированный сэмпл в локальный трек; для остановленного трека ничего не делает
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<(), PeerError> {
        if self.state() == TrackState::Ended {
            return Ok(());
        }
        match &self.source {
            TrackSource::Local(track) => track
                .write_sample(&Sample {
                    data,
                    duration,
                    ..Default::default()
                })
                .await
                .map_err(PeerError::from),
            TrackSource::Remote(_) => Err(PeerError::Transport(format!(
                "track {} is remote and read-only",
                self.id
            ))),
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Локальный поток: то, что вернул захват устройств
#[derive(Debug, Clone)]
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<Arc<MediaTrack>>,
}

impl LocalMedia {
    /// Останавливает только живые треки, уже завершённые пропускает
    pub fn stop_live(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.state() == TrackState::Live)
            .filter(|t| t.stop())
            .count()
    }
}

/// Приёмник удалённого медиа: треки добавляются по одному по мере прихода
#[derive(Debug, Default)]
pub struct RemoteMedia {
    tracks: Mutex<Vec<Arc<MediaTrack>>>,
}

impl RemoteMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Повторное добавление трека с тем же id игнорируется
    pub fn add_track(&self, track: Arc<MediaTrack>) -> bool {
        let mut tracks = self.tracks.lock();
        if tracks.iter().any(|t| t.id() == track.id()) {
            return false;
        }
        tracks.push(track);
        true
    }

    pub fn tracks(&self) -> Vec<Arc<MediaTrack>> {
        self.tracks.lock().clone()
    }

    pub fn stop_all(&self) -> usize {
        self.tracks.lock().iter().filter(|t| t.stop()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Захват локальных аудио/видео треков
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<LocalMedia, MediaError>;
}

/// Устройства без реального захвата: отдают треки, в которые внешний энкодер пишет сэмплы
#[derive(Debug, Default)]
pub struct SampleDevices;

impl SampleDevices {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaDevices for SampleDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<LocalMedia, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::NoDevice("neither audio nor video requested".into()));
        }
        let stream_id = format!("stream-{}", random_id());
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(MediaTrack::local(
                TrackKind::Audio,
                format!("audio-{}", random_id()),
                stream_id.clone(),
            )));
        }
        if constraints.video {
            tracks.push(Arc::new(MediaTrack::local(
                TrackKind::Video,
                format!("video-{}", random_id()),
                stream_id.clone(),
            )));
        }
        Ok(LocalMedia { stream_id, tracks })
    }
}
