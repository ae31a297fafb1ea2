use std::sync::Arc;

use async_trait::async_trait;

use super::{AgentLink, ControlMessage, DriverHandle};
use crate::agent::AgentId;
use crate::counters::CounterSnapshot;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::phase::Phase;

/// An agent living in the driver's process, backed by its own [`Engine`].
#[derive(Debug, Clone)]
pub struct LocalAgent {
    engine: Arc<Engine>,
}

impl LocalAgent {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Agent-side handling of a control message addressed to this agent.
    pub async fn deliver(&self, msg: ControlMessage, driver: DriverHandle) -> Result<()> {
        match msg {
            ControlMessage::AssignShard { agent, shard } if agent == *self.engine.agent() => {
                let handle = self.engine.start_phase(*shard).await?;
                tokio::spawn(async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(err) => Err(Error::Join(err)),
                    };
                    if driver
                        .send(ControlMessage::PhaseComplete { agent: agent.clone(), result })
                        .is_err()
                    {
                        tracing::warn!(agent = %agent, "driver went away before the phase completed");
                    }
                });
                Ok(())
            }
            ControlMessage::AssignShard { agent, .. } => Err(Error::Agent {
                agent: self.engine.agent().to_string(),
                message: format!("shard addressed to `{agent}`"),
            }),
            other => Err(Error::Agent {
                agent: self.engine.agent().to_string(),
                message: format!("unexpected message {other:?}"),
            }),
        }
    }
}

#[async_trait]
impl AgentLink for LocalAgent {
    fn id(&self) -> &AgentId {
        self.engine.agent()
    }

    async fn assign(&self, shard: Phase, driver: DriverHandle) -> Result<()> {
        let msg = ControlMessage::AssignShard {
            agent: self.id().clone(),
            shard: Box::new(shard),
        };
        self.deliver(msg, driver).await
    }

    async fn pause(&self) -> Result<CounterSnapshot> {
        self.engine.pause().await
    }

    async fn resume(&self, shard: Option<Phase>) -> Result<()> {
        self.engine.resume(shard).await
    }

    async fn stop(&self) -> Result<()> {
        self.engine.stop().await;
        Ok(())
    }
}
