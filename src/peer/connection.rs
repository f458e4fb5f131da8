use crate::config::CallConfig;
use crate::error::PeerError;
use crate::media::{MediaTrack, TrackSource};
use crate::peer::types::{IceCandidate, ServerConfig, SessionDescription};
use crate::peer::{LocalCandidateHandler, PeerFactory, PeerTransport, RemoteTrackHandler};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

/// Peer connection на webrtc-rs
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl RtcPeer {
    pub async fn new(config: &CallConfig) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(config)).await?);

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            tracing::debug!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            match st {
                RTCPeerConnectionState::Connected => {
                    tracing::info!("Peer connection connected");
                }
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                    tracing::warn!("Peer connection {:?}", st);
                }
                _ => tracing::debug!("Peer connection state: {:?}", st),
            }
            Box::pin(async {})
        }));

        Ok(Self { pc })
    }

    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

#[async_trait]
impl PeerTransport for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.pc.create_offer(None).await?.try_into()
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.pc.create_answer(None).await?.try_into()
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let desc = RTCSessionDescription::try_from(desc)?;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let desc = RTCSessionDescription::try_from(desc)?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<(), PeerError> {
        let TrackSource::Local(local) = track.source() else {
            return Err(PeerError::Transport(format!(
                "track {} is remote and cannot be sent",
                track.id()
            )));
        };
        let sender = self
            .pc
            .add_track(Arc::clone(local) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP надо вычитывать, иначе interceptors не работают
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| PeerError::InvalidCandidate(e.to_string()))
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        self.pc
            .on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                match cand {
                    None => handler(None),
                    Some(c) => match c.to_json() {
                        Ok(init) => handler(Some(init.into())),
                        Err(e) => tracing::warn!("Failed to serialize local candidate: {e}"),
                    },
                }
                Box::pin(async {})
            }));
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        self.pc
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                handler(Arc::new(MediaTrack::remote(track)));
                Box::pin(async {})
            }));
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Фабрика webrtc-rs соединений
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcPeerFactory;

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(&self, config: &CallConfig) -> Result<Arc<dyn PeerTransport>, PeerError> {
        Ok(Arc::new(RtcPeer::new(config).await?))
    }
}

/// Создает конфигурацию для peer connection
pub(crate) fn rtc_config(config: &CallConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(&config.ice_servers),
        ice_candidate_pool_size: config.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_maps_ice_servers() {
        let mut cfg = CallConfig::default();
        cfg.ice_servers.push(ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: Some("u".into()),
            credential: Some("c".into()),
        });
        let rtc = rtc_config(&cfg);
        assert_eq!(rtc.ice_servers.len(), 3);
        assert_eq!(rtc.ice_servers[2].urls, vec!["turn:relay.example.org:3478".to_string()]);
        assert_eq!(rtc.ice_servers[2].username, "u");
        assert_eq!(rtc.ice_candidate_pool_size, 10);
    }
}
