//! Simulated MCU connection
//!
//! Opening gathers against the advertised ICE servers of the media server the
//! connection lands on, performs a TLS handshake for every TURNS server left
//! after filtering, then starts a loopback that packetizes each local track
//! and raises the frame on the remote track of the same stream.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::track::{SimLocalTrack, SimRemoteTrack};
use super::SimState;
use crate::models::Scenario;
use crate::session::{
    CertificateInfo, Connection, IceGatherPolicy, IceScheme, IceServerCollection, IceServerFilter,
    MediaStream, TlsStream, TlsVersion,
};
use crate::utils::lock;

const TLS_VERSIONS: &[TlsVersion] = &[TlsVersion::Tls12, TlsVersion::Tls13];

pub struct SimConnection {
    state: Arc<SimState>,
    streams: Vec<MediaStream>,
    preferred: Option<String>,
    policy: IceGatherPolicy,
    filter: Option<IceServerFilter>,
    landed: Mutex<Option<String>>,
    media: Mutex<Option<CancellationToken>>,
}

impl SimConnection {
    pub(crate) fn new(state: Arc<SimState>, streams: Vec<MediaStream>) -> Self {
        Self {
            state,
            streams,
            preferred: None,
            policy: IceGatherPolicy::All,
            filter: None,
            landed: Mutex::new(None),
            media: Mutex::new(None),
        }
    }

    async fn handshake(&self, host: &str) -> Result<()> {
        self.state.record(format!("tls:{host}"));
        let mut stream = SimTlsStream {
            state: self.state.clone(),
            certificate: None,
        };
        match self.state.handshaker() {
            Some(handshaker) => handshaker
                .handshake(&mut stream, host, TLS_VERSIONS)
                .await
                .with_context(|| format!("TURNS allocation on {host} failed")),
            None => stream.authenticate_as_client(host, TLS_VERSIONS).await,
        }
    }

    fn start_media(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.media).replace(token.clone()) {
            previous.cancel();
        }

        let streams = self.streams.clone();
        let interval = self.state.options.frame_interval;
        let drop_media = self.state.faults().drop_media;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for stream in &streams {
                            pump(stream, drop_media);
                        }
                    }
                }
            }
            debug!("sim: media loop stopped");
        });
    }

    fn stop_media(&self) {
        if let Some(token) = lock(&self.media).take() {
            token.cancel();
        }
    }
}

/// Move one frame of `stream` from its local to its remote track
fn pump(stream: &MediaStream, drop_media: bool) {
    let Some(local) = stream
        .local
        .as_ref()
        .and_then(|track| track.as_any().downcast_ref::<SimLocalTrack>())
    else {
        return;
    };
    if !local.is_producing() {
        return;
    }

    let frame = local.next_frame();
    stream.counters.record_sent();
    if drop_media {
        return;
    }

    let raised = stream
        .remote
        .as_ref()
        .and_then(|track| track.as_any().downcast_ref::<SimRemoteTrack>())
        .is_some_and(|remote| remote.raise(&frame));
    if raised {
        stream.counters.record_received();
    }
}

/// Scenario a gather with `policy` over `servers` exercises
fn gathered_scenario(policy: IceGatherPolicy, servers: &IceServerCollection) -> Result<Scenario> {
    match policy {
        IceGatherPolicy::All => Ok(Scenario::Host),
        IceGatherPolicy::NoHost => {
            if servers.values().iter().any(|s| s.scheme == IceScheme::Stun) {
                Ok(Scenario::Stun)
            } else {
                bail!("no server-reflexive candidates were gathered")
            }
        }
        IceGatherPolicy::Relay => [Scenario::TurnUdp, Scenario::TurnTcp, Scenario::Turns]
            .into_iter()
            .find(|scenario| servers.values().iter().any(|s| scenario.is_compatible(s)))
            .context("no relay candidates were gathered"),
    }
}

#[async_trait]
impl Connection for SimConnection {
    fn set_preferred_media_server_id(&mut self, media_server_id: &str) {
        self.preferred = Some(media_server_id.to_string());
    }

    fn set_ice_gather_policy(&mut self, policy: IceGatherPolicy) {
        self.policy = policy;
    }

    fn ice_gather_policy(&self) -> IceGatherPolicy {
        self.policy
    }

    fn on_automatic_ice_servers(&mut self, filter: IceServerFilter) {
        self.filter = Some(filter);
    }

    fn media_server_id(&self) -> Option<String> {
        lock(&self.landed).clone()
    }

    async fn open(&self) -> Result<()> {
        self.state.delay().await;
        self.state.record(format!("open:{}", self.policy));
        let faults = self.state.faults();
        let hangs_here = faults.hang_open_on.is_some()
            && faults.hang_open_on.as_deref() == self.preferred.as_deref();
        if faults.hang_open || hangs_here {
            std::future::pending::<()>().await;
        }

        let Some(media_server_id) = self.state.place(self.preferred.as_deref()) else {
            bail!("no media server available for connection");
        };

        let mut servers = self.state.ice_servers(&media_server_id);
        if let Some(filter) = &self.filter {
            filter(&mut servers);
        }
        for server in servers.values() {
            self.state.record(format!("ice:{}", server.url));
        }

        let scenario = gathered_scenario(self.policy, &servers)?;
        if faults.fail_open_for.contains(&scenario) {
            bail!("ICE connectivity checks failed ({scenario})");
        }

        for server in servers.values().iter().filter(|s| s.scheme == IceScheme::Turns) {
            self.handshake(&server.host).await?;
        }

        *lock(&self.landed) = Some(media_server_id);
        self.start_media();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.record("close");
        self.stop_media();
        if self.state.faults().fail_teardown {
            bail!("connection close was not acknowledged");
        }
        Ok(())
    }
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        self.stop_media();
    }
}

/// TLS stream presenting a generated certificate for whatever host it dials
struct SimTlsStream {
    state: Arc<SimState>,
    certificate: Option<CertificateInfo>,
}

#[async_trait]
impl TlsStream for SimTlsStream {
    async fn authenticate_as_client(
        &mut self,
        target_host: &str,
        _versions: &[TlsVersion],
    ) -> Result<()> {
        if self.state.faults().fail_tls {
            bail!("TLS handshake with {target_host} failed: certificate rejected");
        }
        self.certificate = Some(self.state.certificate_for(target_host));
        Ok(())
    }

    fn peer_certificate(&self) -> Option<CertificateInfo> {
        self.certificate.clone()
    }
}
