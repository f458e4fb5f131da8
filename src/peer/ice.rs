use crate::error::PeerError;
use crate::peer::connection::ice_servers;
use crate::peer::types::{IceCandidate, ServerConfig};
use crate::peer::PeerTransport;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Сколько ждём подходящего кандидата при проверке сервера
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Применяет отложенные кандидаты после установки remote description.
/// Ошибка одного кандидата не мешает остальным.
pub async fn apply_pending_candidates(transport: &dyn PeerTransport, pending: Vec<IceCandidate>) {
    for candidate in pending {
        tracing::debug!("Applying pending candidate: {}", candidate.candidate);
        if let Err(e) = transport.add_ice_candidate(candidate).await {
            tracing::warn!("Failed to apply pending candidate: {e}");
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateStats {
    let mut stats = CandidateStats::default();
    for candidate in candidates {
        match candidate.candidate_type() {
            Some("host") => stats.host += 1,
            Some("srflx") => stats.srflx += 1,
            Some("relay") => stats.relay += 1,
            _ => {}
        }
    }

    tracing::debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        stats.host,
        stats.srflx,
        stats.relay
    );

    if stats.relay == 0 {
        tracing::debug!("No TURN relay candidates gathered, connection through NAT may fail");
    }
    stats
}

/// Проверяет, что сервер отвечает: для STUN ждём srflx кандидата, для TURN relay.
pub async fn check_ice_server_availability(config: &ServerConfig) -> Result<bool, PeerError> {
    let rtc_config = RTCConfiguration {
        ice_servers: ice_servers(std::slice::from_ref(config)),
        ..Default::default()
    };
    let api = APIBuilder::new().build();
    let pc = api.new_peer_connection(rtc_config).await?;

    let wanted = if config.r#type == "turn" { "relay" } else { "srflx" };
    let (tx, mut rx) = mpsc::unbounded_channel();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let found = candidate
            .and_then(|c| c.to_json().ok())
            .map(IceCandidate::from)
            .map(|c| c.candidate_type() == Some(wanted));
        match found {
            Some(true) => {
                let _ = tx.send(true);
            }
            Some(false) => {}
            // конец сбора
            None => {
                let _ = tx.send(false);
            }
        }
        Box::pin(async {})
    }));

    // data channel нужен только чтобы в offer была m-секция и начался сбор
    pc.create_data_channel("probe", None).await?;
    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;

    let result = match timeout(PROBE_TIMEOUT, rx.recv()).await {
        Ok(Some(found)) => found,
        Ok(None) => false,
        Err(_) => {
            tracing::debug!("Timeout waiting for {wanted} candidate from {}", config.url);
            false
        }
    };

    if let Err(e) = pc.close().await {
        tracing::debug!("Failed to close probe connection: {e}");
    }
    tracing::info!("ICE server {} available: {}", config.url, result);
    Ok(result)
}
