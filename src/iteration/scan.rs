//! Network-path scan of one media server
//!
//! A single client registers and joins a fresh channel, then opens and closes
//! one connection per scenario against the target media server. Each
//! scenario ends in exactly one outcome; a failing scenario never stops the
//! ones after it.

use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::HammerConfig;
use crate::error::{HammerError, Result};
use crate::executor::{FanOut, Ladder, Stage};
use crate::models::{ScanReport, Scenario, ScenarioOutcome, ScenarioState, StreamType};
use crate::session::{
    CertificateCache, CertificateRecorder, Channel, Connection, IceScheme, IceServerCollection,
    MediaStack, MediaStream, TlsHandshaker,
};
use crate::utils::lock;

/// Reason attached to scenarios the configuration leaves out
const EXCLUDED_REASON: &str = "Scenario excluded by configuration.";

/// Matrix before anything runs: excluded scenarios skipped, the rest unknown
pub fn pending_outcomes(config: &HammerConfig) -> Vec<ScenarioOutcome> {
    Scenario::all()
        .into_iter()
        .map(|scenario| {
            if config.should_test(scenario) {
                ScenarioOutcome::unknown(scenario)
            } else {
                ScenarioOutcome::skip(scenario, EXCLUDED_REASON)
            }
        })
        .collect()
}

pub struct ScanIteration {
    stack: Arc<dyn MediaStack>,
    config: Arc<HammerConfig>,
    certificates: Arc<CertificateCache>,
}

impl ScanIteration {
    pub fn new(stack: Arc<dyn MediaStack>, config: Arc<HammerConfig>) -> Self {
        Self {
            stack,
            config,
            certificates: Arc::new(CertificateCache::new()),
        }
    }

    /// Certificates captured by TLS handshakes so far
    pub fn certificates(&self) -> &Arc<CertificateCache> {
        &self.certificates
    }

    /// Run the scenario matrix against `media_server_id`.
    ///
    /// Register and join failures fail the whole iteration; everything after
    /// them is recorded per scenario. Cancellation keeps the outcomes finished
    /// so far and leaves the rest unknown.
    pub async fn run(
        &self,
        media_server_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let mut outcomes = pending_outcomes(&self.config);
        let mut ladder = Ladder::new(format!("scan {media_server_id}"))
            .with_teardown_timeout(self.config.teardown_timeout());
        let climbed = self.climb(&mut ladder, media_server_id, cancel, &mut outcomes).await;
        ladder.unwind().await;

        let cancelled = match climbed {
            Ok(()) => false,
            Err(e) if e.is_cancelled() => {
                warn!("Scan of Media Server {} cancelled", media_server_id);
                true
            }
            Err(e) => return Err(e),
        };
        Ok(ScanReport::new(media_server_id, outcomes)
            .with_certificates(self.certificates.snapshot())
            .with_cancelled(cancelled))
    }

    async fn climb(
        &self,
        ladder: &mut Ladder,
        media_server_id: &str,
        cancel: &CancellationToken,
        outcomes: &mut [ScenarioOutcome],
    ) -> Result<()> {
        let fanout = FanOut::new(cancel).with_deadline(self.config.stage_timeout());

        let hooked = self.stack.clone();
        let recorder: Arc<dyn TlsHandshaker> =
            Arc::new(CertificateRecorder::new(self.certificates.clone()));
        ladder
            .acquire(
                Stage::InstallTlsHook,
                async {
                    self.stack.set_tls_handshaker(Some(recorder));
                    Ok(())
                },
                move || async move {
                    hooked.set_tls_handshaker(None);
                    Ok(())
                },
            )
            .await?;

        info!("Registering client...");
        let client = self.stack.create_client(self.config.scan_spec());
        let token = self
            .stack
            .register_token(client.spec(), &self.config.shared_secret);
        let registered = client.clone();
        ladder
            .acquire(
                Stage::Register,
                async {
                    fanout.run_one(client.register(&token)).await.map_err(|e| {
                        HammerError::client_register(
                            "One or more clients could not be registered.",
                            e,
                        )
                    })
                },
                move || async move {
                    info!("Unregistering client...");
                    registered.unregister().await
                },
            )
            .await?;

        info!("Joining channel...");
        let channel_id = Uuid::new_v4().simple().to_string();
        let token = self
            .stack
            .join_token(client.spec(), &channel_id, &self.config.shared_secret);
        let member = client.clone();
        let left = channel_id.clone();
        let channel = ladder
            .acquire(
                Stage::Join,
                async {
                    fanout
                        .run_one(client.join(&channel_id, &token))
                        .await
                        .map_err(|e| {
                            HammerError::channel_join(
                                "One or more channels could not be joined.",
                                e,
                            )
                        })
                },
                move || async move {
                    info!("Leaving channel...");
                    member.leave(&left).await
                },
            )
            .await?;

        info!("Joined channel {}", channel.id());

        for slot in outcomes.iter_mut() {
            if slot.state() != ScenarioState::Unknown {
                continue;
            }
            let scenario = slot.scenario();
            *slot = match self.attempt(&channel, media_server_id, scenario, cancel).await {
                Ok(valid_for) => {
                    info!("{} scenario passed", scenario);
                    ScenarioOutcome::pass(scenario, valid_for)
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!("{} scenario failed: {}", scenario, e.detail());
                    ScenarioOutcome::fail(scenario, &e)
                }
            };
        }

        Ok(())
    }

    /// One open/close pair. Returns the remaining certificate validity for
    /// TLS scenarios.
    async fn attempt(
        &self,
        channel: &Arc<dyn Channel>,
        media_server_id: &str,
        scenario: Scenario,
        cancel: &CancellationToken,
    ) -> Result<Option<Duration>> {
        info!("Opening connection ({})...", scenario);
        let track = self.stack.create_null_audio_track();
        let stream = MediaStream::new(StreamType::Audio, Some(track.clone()), None);

        let mut connection = channel.create_connection(vec![stream]);
        connection.set_preferred_media_server_id(media_server_id);
        connection.set_ice_gather_policy(scenario.gather_policy());
        debug!("ICE gather policy: {}", connection.ice_gather_policy());

        let tls_hosts = Arc::new(Mutex::new(BTreeSet::new()));
        let kept = tls_hosts.clone();
        connection.on_automatic_ice_servers(Box::new(move |servers: &mut IceServerCollection| {
            servers.retain(|server| scenario.is_compatible(server));
            if servers.is_empty() {
                warn!("No ICE servers left for {}", scenario);
            }
            debug!("{} ICE server(s) kept for {}", servers.len(), scenario);
            for server in servers.values() {
                debug!("ICE server: {}", server.url);
                if server.scheme == IceScheme::Turns {
                    lock(&kept).insert(server.host.clone());
                }
            }
        }));

        let connection: Arc<dyn Connection> = Arc::from(connection);
        let mut ladder = Ladder::new(format!("scan {media_server_id} {}", scenario.slug()))
            .with_teardown_timeout(self.config.teardown_timeout());
        let closed = connection.clone();
        ladder.defer(Stage::OpenConnection, move || async move {
            info!("Closing connection...");
            let outcome = closed.close().await;
            track.destroy();
            outcome
        });

        let opened = FanOut::new(cancel)
            .with_deadline(self.config.stage_timeout())
            .run_one(connection.open())
            .await
            .map_err(|e| HammerError::connection_open("Connection could not be opened.", e))
            .and_then(|()| check_media_server(connection.as_ref(), media_server_id));
        ladder.unwind().await;
        opened?;

        if !scenario.uses_tls() {
            return Ok(None);
        }
        let hosts = lock(&tls_hosts).clone();
        Ok(self
            .certificates
            .min_valid_for(hosts.iter().map(String::as_str), Utc::now()))
    }
}

/// The connection must have landed on the media server it preferred
fn check_media_server(connection: &dyn Connection, expected: &str) -> Result<()> {
    match connection.media_server_id() {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(HammerError::MediaServerMismatch {
            expected: expected.to_string(),
            actual: actual.unwrap_or_else(|| "(none)".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sim::{relay_host, SimFaults, SimOptions, SimStack};

    fn config(skip: Vec<Scenario>) -> Arc<HammerConfig> {
        Arc::new(HammerConfig {
            skip_scenarios: skip,
            teardown_timeout_secs: Some(1),
            ..Default::default()
        })
    }

    fn states(outcomes: &[ScenarioOutcome]) -> Vec<ScenarioState> {
        outcomes.iter().map(|o| o.state()).collect()
    }

    #[tokio::test]
    async fn test_all_scenarios_pass() {
        let stack = SimStack::new(SimOptions::default().with_certificate_days(45));
        let iteration = ScanIteration::new(Arc::new(stack.clone()), config(Vec::new()));
        let outcomes = iteration
            .run("ms-1", &CancellationToken::new())
            .await
            .unwrap()
            .outcomes;

        assert_eq!(states(&outcomes), vec![ScenarioState::Pass; 5]);
        let scenarios: Vec<Scenario> = outcomes.iter().map(|o| o.scenario()).collect();
        assert_eq!(scenarios, Scenario::all());

        let turns = &outcomes[4];
        let days = turns.certificate_days().unwrap();
        assert!((44..=45).contains(&days));
        assert!(outcomes[0].certificate_days().is_none());

        assert_eq!(stack.count("open"), 5);
        assert_eq!(stack.count("close"), 5);
        assert!(!stack.has_tls_handshaker());
        assert_eq!(stack.count("tls-hook"), 2);
    }

    #[tokio::test]
    async fn test_excluded_scenarios_are_skipped_not_attempted() {
        let stack = SimStack::default();
        let iteration = ScanIteration::new(
            Arc::new(stack.clone()),
            config(vec![Scenario::Stun, Scenario::TurnTcp]),
        );
        let outcomes = iteration
            .run("ms-1", &CancellationToken::new())
            .await
            .unwrap()
            .outcomes;

        let skipped: Vec<&ScenarioOutcome> = outcomes
            .iter()
            .filter(|o| o.state() == ScenarioState::Skip)
            .collect();
        assert_eq!(skipped.len(), 2);
        assert!(skipped.iter().all(|o| o.reason() == Some(EXCLUDED_REASON)));
        assert_eq!(stack.count("open"), 3);
        assert_eq!(stack.count("close"), 3);
    }

    #[tokio::test]
    async fn test_failed_scenario_does_not_abort_matrix() {
        let faults = SimFaults {
            fail_open_for: vec![Scenario::TurnUdp],
            ..Default::default()
        };
        let stack = SimStack::new(SimOptions::default().with_faults(faults));
        let iteration = ScanIteration::new(Arc::new(stack.clone()), config(Vec::new()));
        let outcomes = iteration
            .run("ms-1", &CancellationToken::new())
            .await
            .unwrap()
            .outcomes;

        assert_eq!(
            states(&outcomes),
            vec![
                ScenarioState::Pass,
                ScenarioState::Pass,
                ScenarioState::Fail,
                ScenarioState::Pass,
                ScenarioState::Pass,
            ]
        );
        assert_eq!(outcomes[2].error_kind(), Some(ErrorKind::ConnectionOpen));
        assert_eq!(outcomes[2].reason(), Some("Connection could not be opened."));
        assert_eq!(stack.count("close"), 5);
    }

    #[tokio::test]
    async fn test_mismatch_fails_even_when_open_succeeds() {
        let faults = SimFaults {
            wrong_media_server: true,
            ..Default::default()
        };
        let stack = SimStack::new(SimOptions::default().with_faults(faults));
        let iteration = ScanIteration::new(Arc::new(stack.clone()), config(Vec::new()));
        let outcomes = iteration
            .run("ms-1", &CancellationToken::new())
            .await
            .unwrap()
            .outcomes;

        assert!(outcomes
            .iter()
            .all(|o| o.error_kind() == Some(ErrorKind::MediaServerMismatch)));
        assert_eq!(
            outcomes[0].reason(),
            Some("Connection connected to Media Server ms-2 instead of preferred Media Server ms-1.")
        );
        assert_eq!(stack.count("close"), 5);
    }

    #[tokio::test]
    async fn test_ice_servers_filtered_per_scenario() {
        let stack = SimStack::default();
        let iteration = ScanIteration::new(
            Arc::new(stack.clone()),
            config(vec![
                Scenario::Host,
                Scenario::Stun,
                Scenario::TurnUdp,
                Scenario::TurnTcp,
            ]),
        );
        iteration
            .run("ms-2", &CancellationToken::new())
            .await
            .unwrap();

        let host = relay_host("ms-2");
        let ice: Vec<String> = stack
            .journal()
            .into_iter()
            .filter(|entry| entry.starts_with("ice:"))
            .collect();
        assert_eq!(ice, vec![format!("ice:turns:{host}:443?transport=tcp")]);
        assert_eq!(stack.count("tls"), 1);
        assert!(iteration.certificates().get(&host).is_some());
    }

    #[tokio::test]
    async fn test_certificate_first_write_wins_across_iterations_of_matrix() {
        let stack = SimStack::default();
        let iteration = ScanIteration::new(Arc::new(stack.clone()), config(Vec::new()));
        let cancel = CancellationToken::new();
        iteration.run("ms-1", &cancel).await.unwrap();
        let first = iteration.certificates().snapshot();

        iteration.run("ms-1", &cancel).await.unwrap();
        assert_eq!(iteration.certificates().snapshot(), first);
        assert_eq!(iteration.certificates().len(), 1);
    }

    #[tokio::test]
    async fn test_tls_failure_fails_only_turns() {
        let faults = SimFaults {
            fail_tls: true,
            ..Default::default()
        };
        let stack = SimStack::new(SimOptions::default().with_faults(faults));
        let iteration = ScanIteration::new(Arc::new(stack.clone()), config(Vec::new()));
        let outcomes = iteration
            .run("ms-1", &CancellationToken::new())
            .await
            .unwrap()
            .outcomes;

        assert_eq!(outcomes[4].state(), ScenarioState::Fail);
        assert!(outcomes[..4].iter().all(|o| o.state() == ScenarioState::Pass));
        assert!(iteration.certificates().is_empty());
    }

    #[tokio::test]
    async fn test_join_failure_propagates_after_teardown() {
        let faults = SimFaults {
            fail_join: true,
            ..Default::default()
        };
        let stack = SimStack::new(SimOptions::default().with_faults(faults));
        let iteration = ScanIteration::new(Arc::new(stack.clone()), config(Vec::new()));
        let err = iteration
            .run("ms-1", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HammerError::ChannelJoin { .. }));
        assert_eq!(stack.count("leave"), 0);
        assert_eq!(stack.count("unregister"), 1);
        assert_eq!(stack.count("open"), 0);
        assert!(!stack.has_tls_handshaker());
    }

    #[test]
    fn test_pending_outcomes_skip_excluded_only() {
        let outcomes = pending_outcomes(&config(vec![Scenario::Stun]));
        assert_eq!(
            states(&outcomes),
            vec![
                ScenarioState::Unknown,
                ScenarioState::Skip,
                ScenarioState::Unknown,
                ScenarioState::Unknown,
                ScenarioState::Unknown,
            ]
        );
        assert_eq!(outcomes[1].reason(), Some(EXCLUDED_REASON));
    }

    #[tokio::test]
    async fn test_cancellation_during_register_reports_unknown() {
        let faults = SimFaults {
            hang_register: true,
            ..Default::default()
        };
        let stack = SimStack::new(SimOptions::default().with_faults(faults));
        let iteration = ScanIteration::new(Arc::new(stack.clone()), config(vec![Scenario::Host]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let report = iteration.run("ms-1", &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.count(ScenarioState::Skip), 1);
        assert_eq!(report.count(ScenarioState::Unknown), 4);
        assert_eq!(stack.count("join"), 0);
        assert!(!stack.has_tls_handshaker());
    }

    #[tokio::test]
    async fn test_cancellation_mid_matrix() {
        let faults = SimFaults {
            hang_open: true,
            ..Default::default()
        };
        let stack = SimStack::new(SimOptions::default().with_faults(faults));
        let iteration = ScanIteration::new(Arc::new(stack.clone()), config(Vec::new()));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let report = iteration.run("ms-1", &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.media_server_id, "ms-1");
        assert_eq!(states(&report.outcomes), vec![ScenarioState::Unknown; 5]);
        assert_eq!(stack.count("open"), 1);
        assert_eq!(stack.count("close"), 1);
        assert_eq!(stack.count("leave"), 1);
        assert_eq!(stack.count("unregister"), 1);
    }
}
