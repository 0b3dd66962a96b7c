//! Collaborator interfaces consumed by the test iterations
//!
//! The signaling client, channels, media connections, tracks and the TLS
//! stack live outside this crate. Iterations only talk to them through these
//! traits; [`crate::sim`] provides an in-process implementation.

mod ice;
mod tls;

pub use ice::{
    IceGatherPolicy, IceScheme, IceServer, IceServerCollection, IceServerFilter, IceTransport,
};
pub use tls::{
    CertificateCache, CertificateInfo, CertificateRecorder, TlsHandshaker, TlsStream, TlsVersion,
};

use anyhow::Result;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

use crate::liveness::{FrameCounters, VideoBuffer};
use crate::models::{MediaServerInfo, StreamType};

/// Identity a client registers with
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientSpec {
    pub gateway_url: String,
    pub application_id: String,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub region: Option<String>,
    pub tag: Option<String>,
}

/// A registered participant session
#[async_trait]
pub trait SessionClient: Send + Sync {
    fn spec(&self) -> &ClientSpec;

    async fn register(&self, token: &str) -> Result<()>;

    async fn unregister(&self) -> Result<()>;

    async fn join(&self, channel_id: &str, token: &str) -> Result<Arc<dyn Channel>>;

    async fn leave(&self, channel_id: &str) -> Result<()>;
}

/// Room membership obtained by joining a channel
pub trait Channel: Send + Sync {
    fn id(&self) -> &str;

    /// Create an MCU connection carrying `streams`
    fn create_connection(&self, streams: Vec<MediaStream>) -> Box<dyn Connection>;
}

/// Media connection scoped to one channel
#[async_trait]
pub trait Connection: Send + Sync {
    fn set_preferred_media_server_id(&mut self, media_server_id: &str);

    fn set_ice_gather_policy(&mut self, policy: IceGatherPolicy);

    fn ice_gather_policy(&self) -> IceGatherPolicy;

    /// Install the callback run on the automatically discovered ICE servers
    fn on_automatic_ice_servers(&mut self, filter: IceServerFilter);

    /// Media server the connection actually landed on
    fn media_server_id(&self) -> Option<String>;

    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Local track whose source must be started before use
#[async_trait]
pub trait LocalTrack: Send + Sync {
    fn kind(&self) -> StreamType;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Release the pipeline. Idempotent.
    fn destroy(&self);

    /// Lets a stack recover its own track type from a [`MediaStream`]
    fn as_any(&self) -> &dyn Any;
}

/// Remote track ending in a sink
pub trait RemoteTrack: Send + Sync {
    fn kind(&self) -> StreamType;

    /// Release the pipeline. Idempotent.
    fn destroy(&self);

    /// Lets a stack recover its own track type from a [`MediaStream`]
    fn as_any(&self) -> &dyn Any;
}

/// Receives decoded PCM16 buffers
pub type AudioSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Receives decoded video frames
pub type VideoSink = Arc<dyn Fn(&VideoBuffer) + Send + Sync>;

/// Local/remote track pair plus its frame counters. The connection bumps
/// `counters` whenever it sends or raises a frame.
#[derive(Clone)]
pub struct MediaStream {
    pub kind: StreamType,
    pub local: Option<Arc<dyn LocalTrack>>,
    pub remote: Option<Arc<dyn RemoteTrack>>,
    pub counters: Arc<FrameCounters>,
}

impl MediaStream {
    pub fn new(
        kind: StreamType,
        local: Option<Arc<dyn LocalTrack>>,
        remote: Option<Arc<dyn RemoteTrack>>,
    ) -> Self {
        Self {
            kind,
            local,
            remote,
            counters: Arc::new(FrameCounters::new()),
        }
    }
}

/// Factory for everything an iteration acquires
#[async_trait]
pub trait MediaStack: Send + Sync {
    fn create_client(&self, spec: ClientSpec) -> Arc<dyn SessionClient>;

    fn register_token(&self, client: &ClientSpec, shared_secret: &str) -> String;

    fn join_token(&self, client: &ClientSpec, channel_id: &str, shared_secret: &str) -> String;

    /// Fake audio source, encoder and packetizer
    fn create_local_audio_track(&self) -> Arc<dyn LocalTrack>;

    /// Fake video source, encoder and packetizer
    fn create_local_video_track(&self) -> Arc<dyn LocalTrack>;

    /// Packetized null audio source; never needs starting
    fn create_null_audio_track(&self) -> Arc<dyn LocalTrack>;

    fn create_remote_audio_track(&self, sink: AudioSink) -> Arc<dyn RemoteTrack>;

    fn create_remote_video_track(&self, sink: VideoSink) -> Arc<dyn RemoteTrack>;

    /// Install or clear the hook used for outbound TLS handshakes
    fn set_tls_handshaker(&self, handshaker: Option<Arc<dyn TlsHandshaker>>);

    async fn media_servers(&self) -> Result<Vec<MediaServerInfo>>;
}
