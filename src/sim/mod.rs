//! In-process media cluster
//!
//! [`SimStack`] implements the collaborator traits without a network. Clients
//! register and join instantly, connections loop synthesized media from each
//! local track back into the remote sink of the same stream, and TURNS
//! handshakes present generated certificates. [`SimFaults`] injects the
//! failures the iterations must survive.

mod client;
mod connection;
mod track;

pub use client::SimClient;
pub use connection::SimConnection;
pub use track::{SimLocalTrack, SimRemoteTrack};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::models::{MediaServerInfo, Scenario, StreamType};
use crate::session::{
    AudioSink, CertificateInfo, ClientSpec, IceServer, IceServerCollection, LocalTrack,
    MediaStack, RemoteTrack, SessionClient, TlsHandshaker, VideoSink,
};
use crate::utils::lock;

/// Failures injected into the simulated cluster
#[derive(Clone, Debug, Default)]
pub struct SimFaults {
    pub fail_register: bool,
    pub fail_join: bool,
    pub fail_track_start: bool,
    /// Connections gathering for these scenarios fail to open
    pub fail_open_for: Vec<Scenario>,
    /// Connections land on a different media server than preferred
    pub wrong_media_server: bool,
    pub silent_audio: bool,
    pub black_video: bool,
    /// Frames are sent but never raised on the remote side
    pub drop_media: bool,
    pub hang_register: bool,
    pub hang_open: bool,
    /// Connections preferring this media server never finish opening
    pub hang_open_on: Option<String>,
    /// Every teardown call reports an error after doing its work
    pub fail_teardown: bool,
    pub fail_tls: bool,
    pub fail_discovery: bool,
}

/// Shape of the simulated cluster
#[derive(Clone, Debug)]
pub struct SimOptions {
    pub media_servers: Vec<MediaServerInfo>,
    pub faults: SimFaults,
    /// Base latency of every collaborator call
    pub latency: Duration,
    /// Random extra latency up to this bound
    pub jitter: Duration,
    /// Remaining validity of generated relay certificates
    pub certificate_days: i64,
    /// Spacing between synthesized frames
    pub frame_interval: Duration,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            media_servers: vec![MediaServerInfo::new("ms-1"), MediaServerInfo::new("ms-2")],
            faults: SimFaults::default(),
            latency: Duration::from_millis(2),
            jitter: Duration::from_millis(3),
            certificate_days: 90,
            frame_interval: Duration::from_millis(20),
        }
    }
}

impl SimOptions {
    pub fn with_faults(mut self, faults: SimFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_media_servers(mut self, media_servers: Vec<MediaServerInfo>) -> Self {
        self.media_servers = media_servers;
        self
    }

    #[cfg(test)]
    pub fn with_certificate_days(mut self, days: i64) -> Self {
        self.certificate_days = days;
        self
    }
}

/// State shared by every object the stack hands out
pub(crate) struct SimState {
    pub(crate) options: SimOptions,
    journal: Mutex<Vec<String>>,
    handshaker: Mutex<Option<Arc<dyn TlsHandshaker>>>,
}

impl SimState {
    pub(crate) fn faults(&self) -> &SimFaults {
        &self.options.faults
    }

    pub(crate) fn record(&self, entry: impl Into<String>) {
        let entry = entry.into();
        debug!("sim: {}", entry);
        lock(&self.journal).push(entry);
    }

    pub(crate) fn handshaker(&self) -> Option<Arc<dyn TlsHandshaker>> {
        lock(&self.handshaker).clone()
    }

    /// Simulated call latency
    pub(crate) async fn delay(&self) {
        let jitter_ms = self.options.jitter.as_millis() as u64;
        let extra = if jitter_ms > 0 {
            rand::rng().random_range(0..=jitter_ms)
        } else {
            0
        };
        tokio::time::sleep(self.options.latency + Duration::from_millis(extra)).await;
    }

    /// Media server a connection lands on given its preference
    pub(crate) fn place(&self, preferred: Option<&str>) -> Option<String> {
        let servers = &self.options.media_servers;
        let preferred = preferred.and_then(|id| servers.iter().find(|s| s.id == id));

        match preferred {
            Some(server) if self.faults().wrong_media_server => servers
                .iter()
                .find(|s| s.id != server.id)
                .map(|s| s.id.clone())
                .or_else(|| Some(format!("{}-standby", server.id))),
            Some(server) => Some(server.id.clone()),
            None => servers.first().map(|s| s.id.clone()),
        }
    }

    /// ICE servers the cluster advertises for `media_server_id`
    pub(crate) fn ice_servers(&self, media_server_id: &str) -> IceServerCollection {
        let host = relay_host(media_server_id);
        let urls = [
            format!("stun:{host}:3478"),
            format!("turn:{host}:3478?transport=udp"),
            format!("turn:{host}:3478?transport=tcp"),
            format!("turns:{host}:443?transport=tcp"),
        ];
        IceServerCollection::new(urls.iter().filter_map(|url| IceServer::parse(url)).collect())
    }

    pub(crate) fn certificate_for(&self, host: &str) -> CertificateInfo {
        let now = Utc::now();
        CertificateInfo {
            subject: format!("CN={host}"),
            issuer: "CN=Media Hammer Sim Root CA".to_string(),
            not_before: now - ChronoDuration::days(30),
            not_after: now + ChronoDuration::days(self.options.certificate_days),
            thumbprint: format!("{:016X}", fingerprint(host)),
        }
    }
}

/// Hostname of the relay co-located with a media server
pub fn relay_host(media_server_id: &str) -> String {
    format!("{media_server_id}.relay.sim.local")
}

/// In-process [`MediaStack`]
#[derive(Clone)]
pub struct SimStack {
    state: Arc<SimState>,
}

impl SimStack {
    pub fn new(options: SimOptions) -> Self {
        Self {
            state: Arc::new(SimState {
                options,
                journal: Mutex::new(Vec::new()),
                handshaker: Mutex::new(None),
            }),
        }
    }

    /// Every acquire/release call made so far, oldest first
    #[cfg(test)]
    pub fn journal(&self) -> Vec<String> {
        lock(&self.state.journal).clone()
    }

    /// Journal entries whose event name is `event`
    #[cfg(test)]
    pub fn count(&self, event: &str) -> usize {
        self.journal()
            .iter()
            .filter(|entry| entry.split(':').next() == Some(event))
            .count()
    }

    #[cfg(test)]
    pub fn has_tls_handshaker(&self) -> bool {
        self.state.handshaker().is_some()
    }
}

impl Default for SimStack {
    fn default() -> Self {
        Self::new(SimOptions::default())
    }
}

#[async_trait]
impl MediaStack for SimStack {
    fn create_client(&self, spec: ClientSpec) -> Arc<dyn SessionClient> {
        Arc::new(SimClient::new(self.state.clone(), spec))
    }

    fn register_token(&self, client: &ClientSpec, shared_secret: &str) -> String {
        sign(
            &[
                "register",
                &client.application_id,
                client.user_id.as_deref().unwrap_or_default(),
                client.device_id.as_deref().unwrap_or_default(),
            ],
            shared_secret,
        )
    }

    fn join_token(&self, client: &ClientSpec, channel_id: &str, shared_secret: &str) -> String {
        sign(
            &[
                "join",
                &client.application_id,
                client.user_id.as_deref().unwrap_or_default(),
                channel_id,
            ],
            shared_secret,
        )
    }

    fn create_local_audio_track(&self) -> Arc<dyn LocalTrack> {
        Arc::new(SimLocalTrack::new(
            self.state.clone(),
            StreamType::Audio,
            false,
        ))
    }

    fn create_local_video_track(&self) -> Arc<dyn LocalTrack> {
        Arc::new(SimLocalTrack::new(
            self.state.clone(),
            StreamType::Video,
            false,
        ))
    }

    fn create_null_audio_track(&self) -> Arc<dyn LocalTrack> {
        Arc::new(SimLocalTrack::new(self.state.clone(), StreamType::Audio, true))
    }

    fn create_remote_audio_track(&self, sink: AudioSink) -> Arc<dyn RemoteTrack> {
        Arc::new(SimRemoteTrack::audio(self.state.clone(), sink))
    }

    fn create_remote_video_track(&self, sink: VideoSink) -> Arc<dyn RemoteTrack> {
        Arc::new(SimRemoteTrack::video(self.state.clone(), sink))
    }

    fn set_tls_handshaker(&self, handshaker: Option<Arc<dyn TlsHandshaker>>) {
        self.state.record(if handshaker.is_some() {
            "tls-hook:install"
        } else {
            "tls-hook:clear"
        });
        *lock(&self.state.handshaker) = handshaker;
    }

    async fn media_servers(&self) -> Result<Vec<MediaServerInfo>> {
        self.state.delay().await;
        if self.state.faults().fail_discovery {
            bail!("media server directory unavailable");
        }
        Ok(self.state.options.media_servers.clone())
    }
}

fn fingerprint(value: impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Opaque token bound to its claims; never contains the secret itself
fn sign(claims: &[&str], secret: &str) -> String {
    let payload = claims.join(".");
    format!("{payload}.{:016x}", fingerprint((&payload, secret)))
}
