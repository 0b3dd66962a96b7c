//! Two-participant cluster iteration
//!
//! Both participants register, join one fresh channel, start an audio and a
//! video source each and open an MCU connection carrying both streams. The
//! iteration passes once all four remote streams have delivered live media.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::HammerConfig;
use crate::error::{HammerError, Result};
use crate::executor::{settle, FanOut, FanOutError, Ladder, Stage};
use crate::liveness::{
    AudioLivenessProbe, FrameCounters, VerificationSignal, VideoBuffer, VideoLivenessProbe,
};
use crate::models::StreamType;
use crate::session::{
    Channel, Connection, LocalTrack, MediaStack, MediaStream, RemoteTrack, SessionClient,
};

const PARTICIPANTS: usize = 2;

/// Streams of one participant plus the signals their sinks flip
struct ParticipantMedia {
    audio: MediaStream,
    video: MediaStream,
    audio_verified: Arc<VerificationSignal>,
    video_verified: Arc<VerificationSignal>,
}

impl ParticipantMedia {
    fn local_tracks(&self) -> impl Iterator<Item = Arc<dyn LocalTrack>> + '_ {
        [&self.audio, &self.video]
            .into_iter()
            .filter_map(|stream| stream.local.clone())
    }

    fn remote_tracks(&self) -> impl Iterator<Item = Arc<dyn RemoteTrack>> + '_ {
        [&self.audio, &self.video]
            .into_iter()
            .filter_map(|stream| stream.remote.clone())
    }
}

/// One register/join/start/open/verify run
pub struct ClusterIteration {
    stack: Arc<dyn MediaStack>,
    config: Arc<HammerConfig>,
}

impl ClusterIteration {
    pub fn new(stack: Arc<dyn MediaStack>, config: Arc<HammerConfig>) -> Self {
        Self { stack, config }
    }

    /// Run every stage, then tear down whatever was acquired
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let mut ladder =
            Ladder::new("cluster").with_teardown_timeout(self.config.teardown_timeout());
        let outcome = self.climb(&mut ladder, cancel).await;
        ladder.unwind().await;
        outcome
    }

    async fn climb(&self, ladder: &mut Ladder, cancel: &CancellationToken) -> Result<()> {
        let fanout = FanOut::new(cancel).with_deadline(self.config.stage_timeout());

        let clients = self.register(ladder, &fanout).await?;
        let channels = self.join(ladder, &fanout, &clients).await?;
        let media: Vec<ParticipantMedia> =
            (0..PARTICIPANTS).map(|_| self.participant_media()).collect();
        self.start_tracks(ladder, &fanout, &media).await?;
        self.open_connections(ladder, &fanout, &channels, &media).await?;
        self.verify(cancel, &media).await
    }

    async fn register(
        &self,
        ladder: &mut Ladder,
        fanout: &FanOut,
    ) -> Result<Vec<Arc<dyn SessionClient>>> {
        info!("Registering clients...");
        let clients: Vec<Arc<dyn SessionClient>> = (0..PARTICIPANTS)
            .map(|index| self.stack.create_client(self.config.participant_spec(index)))
            .collect();

        let registrations = clients
            .iter()
            .map(|client| {
                let token = self
                    .stack
                    .register_token(client.spec(), &self.config.shared_secret);
                async move { client.register(&token).await }
            })
            .collect();

        let registered = clients.clone();
        ladder
            .acquire_compensated(
                Stage::Register,
                async {
                    fanout.run(registrations).await.map_err(|e| {
                        HammerError::client_register(
                            "One or more clients could not be registered.",
                            e,
                        )
                    })
                },
                move || async move {
                    info!("Unregistering clients...");
                    settle(registered.iter().map(|client| client.unregister())).await
                },
            )
            .await?;
        Ok(clients)
    }

    async fn join(
        &self,
        ladder: &mut Ladder,
        fanout: &FanOut,
        clients: &[Arc<dyn SessionClient>],
    ) -> Result<Vec<Arc<dyn Channel>>> {
        info!("Joining channel...");
        let channel_id = Uuid::new_v4().simple().to_string();

        let joins = clients
            .iter()
            .map(|client| {
                let token = self.stack.join_token(
                    client.spec(),
                    &channel_id,
                    &self.config.shared_secret,
                );
                let channel_id = channel_id.as_str();
                async move { client.join(channel_id, &token).await }
            })
            .collect();

        let members = clients.to_vec();
        let left = channel_id.clone();
        ladder
            .acquire_compensated(
                Stage::Join,
                async {
                    fanout.run(joins).await.map_err(|e| {
                        HammerError::channel_join("One or more channels could not be joined.", e)
                    })
                },
                move || async move {
                    info!("Leaving channel...");
                    settle(members.iter().map(|client| client.leave(&left))).await
                },
            )
            .await
    }

    /// Local tracks plus remote tracks whose sinks feed the liveness probes
    fn participant_media(&self) -> ParticipantMedia {
        let thresholds = &self.config.liveness;
        let audio_verified = Arc::new(VerificationSignal::new());
        let video_verified = Arc::new(VerificationSignal::new());

        let audio_probe = AudioLivenessProbe::new(audio_verified.clone(), thresholds);
        let video_probe = VideoLivenessProbe::new(video_verified.clone(), thresholds);

        let audio = MediaStream::new(
            StreamType::Audio,
            Some(self.stack.create_local_audio_track()),
            Some(
                self.stack
                    .create_remote_audio_track(Arc::new(move |data: &[u8]| {
                        audio_probe.observe(data)
                    })),
            ),
        );
        let video = MediaStream::new(
            StreamType::Video,
            Some(self.stack.create_local_video_track()),
            Some(
                self.stack
                    .create_remote_video_track(Arc::new(move |frame: &VideoBuffer| {
                        video_probe.observe(frame)
                    })),
            ),
        );

        ParticipantMedia {
            audio,
            video,
            audio_verified,
            video_verified,
        }
    }

    async fn start_tracks(
        &self,
        ladder: &mut Ladder,
        fanout: &FanOut,
        media: &[ParticipantMedia],
    ) -> Result<()> {
        info!("Starting tracks...");
        let locals: Vec<Arc<dyn LocalTrack>> =
            media.iter().flat_map(ParticipantMedia::local_tracks).collect();
        let remotes: Vec<Arc<dyn RemoteTrack>> =
            media.iter().flat_map(ParticipantMedia::remote_tracks).collect();

        let starts = locals.iter().map(|track| track.start()).collect();
        let stopped = locals.clone();
        ladder
            .acquire_compensated(
                Stage::StartTracks,
                async {
                    fanout.run(starts).await.map(|_| ()).map_err(|e| {
                        HammerError::track_start("One or more tracks could not be started.", e)
                    })
                },
                move || async move {
                    info!("Stopping tracks...");
                    let outcome = settle(stopped.iter().map(|track| track.stop())).await;
                    for track in &stopped {
                        track.destroy();
                    }
                    for track in &remotes {
                        track.destroy();
                    }
                    outcome
                },
            )
            .await
    }

    async fn open_connections(
        &self,
        ladder: &mut Ladder,
        fanout: &FanOut,
        channels: &[Arc<dyn Channel>],
        media: &[ParticipantMedia],
    ) -> Result<()> {
        info!("Opening connections...");
        let connections: Vec<Arc<dyn Connection>> = channels
            .iter()
            .zip(media)
            .map(|(channel, participant)| {
                Arc::from(
                    channel.create_connection(vec![
                        participant.audio.clone(),
                        participant.video.clone(),
                    ]),
                )
            })
            .collect();

        let opens = connections.iter().map(|connection| connection.open()).collect();
        let opened = connections.clone();
        ladder
            .acquire_compensated(
                Stage::OpenConnection,
                async {
                    fanout.run(opens).await.map(|_| ()).map_err(|e| {
                        HammerError::connection_open(
                            "One or more connections could not be opened.",
                            e,
                        )
                    })
                },
                move || async move {
                    info!("Closing connections...");
                    settle(opened.iter().map(|connection| connection.close())).await
                },
            )
            .await
    }

    /// Wait up to the media timeout for every stream to prove liveness
    async fn verify(&self, cancel: &CancellationToken, media: &[ParticipantMedia]) -> Result<()> {
        info!("Verifying media...");
        let checks: Vec<(StreamType, usize, &VerificationSignal, &FrameCounters)> = [
            StreamType::Audio,
            StreamType::Video,
        ]
        .into_iter()
        .flat_map(|kind| {
            media.iter().enumerate().map(move |(index, participant)| {
                let (signal, stream) = match kind {
                    StreamType::Audio => (&participant.audio_verified, &participant.audio),
                    StreamType::Video => (&participant.video_verified, &participant.video),
                };
                (kind, index + 1, signal.as_ref(), stream.counters.as_ref())
            })
        })
        .collect();

        let waits = checks
            .iter()
            .map(|(_, _, signal, _)| async move {
                signal.wait().await;
                Ok::<(), anyhow::Error>(())
            })
            .collect();

        // running out of time only means some evidence is missing
        let waited = FanOut::new(cancel)
            .with_deadline(Some(self.config.media_timeout()))
            .run(waits)
            .await;
        if let Err(FanOutError::Cancelled) = waited {
            return Err(HammerError::Cancelled);
        }

        for (kind, participant, signal, counters) in checks {
            if !signal.is_set() {
                return Err(HammerError::media_stream_failed(
                    kind,
                    participant,
                    counters.sent(),
                    counters.received(),
                ));
            }
        }

        info!("Media verified on {} streams", media.len() * 2);
        Ok(())
    }
}
