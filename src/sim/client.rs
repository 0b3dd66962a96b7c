//! Simulated signaling client and channel

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{SimConnection, SimState};
use crate::session::{Channel, ClientSpec, Connection, MediaStream, SessionClient};

pub struct SimClient {
    state: Arc<SimState>,
    spec: ClientSpec,
    registered: AtomicBool,
}

impl SimClient {
    pub(crate) fn new(state: Arc<SimState>, spec: ClientSpec) -> Self {
        Self {
            state,
            spec,
            registered: AtomicBool::new(false),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn user(&self) -> &str {
        self.spec.user_id.as_deref().unwrap_or("anonymous")
    }
}

#[async_trait]
impl SessionClient for SimClient {
    fn spec(&self) -> &ClientSpec {
        &self.spec
    }

    async fn register(&self, token: &str) -> Result<()> {
        self.state.delay().await;
        self.state.record(format!("register:{}", self.user()));
        if self.state.faults().hang_register {
            std::future::pending::<()>().await;
        }
        if self.state.faults().fail_register {
            bail!("gateway rejected registration of {}", self.user());
        }
        if token.is_empty() {
            bail!("unauthorized: empty register token");
        }
        self.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister(&self) -> Result<()> {
        self.state.record(format!("unregister:{}", self.user()));
        self.registered.store(false, Ordering::SeqCst);
        if self.state.faults().fail_teardown {
            bail!("gateway dropped unregister of {}", self.user());
        }
        Ok(())
    }

    async fn join(&self, channel_id: &str, token: &str) -> Result<Arc<dyn Channel>> {
        self.state.delay().await;
        self.state.record(format!("join:{channel_id}"));
        if self.state.faults().fail_join {
            bail!("gateway rejected join of channel {channel_id}");
        }
        if !self.is_registered() {
            bail!("client {} is not registered", self.user());
        }
        if token.is_empty() {
            bail!("unauthorized: empty join token");
        }
        Ok(Arc::new(SimChannel {
            state: self.state.clone(),
            id: channel_id.to_string(),
        }))
    }

    async fn leave(&self, channel_id: &str) -> Result<()> {
        self.state.record(format!("leave:{channel_id}"));
        if self.state.faults().fail_teardown {
            bail!("gateway dropped leave of channel {channel_id}");
        }
        Ok(())
    }
}

pub struct SimChannel {
    state: Arc<SimState>,
    id: String,
}

impl Channel for SimChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_connection(&self, streams: Vec<MediaStream>) -> Box<dyn Connection> {
        Box::new(SimConnection::new(self.state.clone(), streams))
    }
}
