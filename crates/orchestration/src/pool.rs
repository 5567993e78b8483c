use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceStatus {
    Idle,
    Busy,
    Error,
}

#[derive(Clone, Debug)]
pub struct PooledAgent {
    pub id: Uuid,
    pub agent_type: String,
    pub status: InstanceStatus,
    pub created_at: Instant,
    pub last_used: Instant,
    pub usage_count: u64,
    pub error_count: u32,
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_instances_per_type: usize,
    /// Instances whose error count exceeds this are evicted.
    pub error_eviction_threshold: u32,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_instances_per_type: 3,
            error_eviction_threshold: 5,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool exhausted for agent type `{0}`")]
    Exhausted(String),
    #[error("unknown instance `{0}`")]
    UnknownInstance(Uuid),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub busy: usize,
    pub error: usize,
}

/// Bounds live agent instances per type.
///
/// Acquire prefers an idle instance, creates a new one up to the per-type
/// cap, and fails with `Exhausted` beyond that. Releases either return the
/// instance to idle or count an error; instances past the error threshold
/// are evicted, and long-idle instances are reaped by `reap_idle`.
pub struct AgentPool {
    config: PoolConfig,
    instances: Mutex<HashMap<String, Vec<PooledAgent>>>,
}

impl AgentPool {
    pub fn new(config: PoolConfig) -> Self {
        Self { config, instances: Mutex::new(HashMap::new()) }
    }

    pub async fn acquire(&self, agent_type: &str) -> Result<Uuid, PoolError> {
        let mut instances = self.instances.lock().await;
        let slots = instances.entry(agent_type.to_string()).or_default();

        // Idle instances first, then previously errored ones get another try.
        for wanted in [InstanceStatus::Idle, InstanceStatus::Error] {
            if let Some(instance) = slots.iter_mut().find(|instance| instance.status == wanted) {
                instance.status = InstanceStatus::Busy;
                instance.last_used = Instant::now();
                instance.usage_count += 1;
                return Ok(instance.id);
            }
        }

        if slots.len() >= self.config.max_instances_per_type {
            warn!(event_name = "pool.exhausted", agent_type = %agent_type, cap = self.config.max_instances_per_type);
            return Err(PoolError::Exhausted(agent_type.to_string()));
        }

        let now = Instant::now();
        let instance = PooledAgent {
            id: Uuid::new_v4(),
            agent_type: agent_type.to_string(),
            status: InstanceStatus::Busy,
            created_at: now,
            last_used: now,
            usage_count: 1,
            error_count: 0,
        };
        let id = instance.id;
        debug!(event_name = "pool.instance_created", agent_type = %agent_type, instance = %id);
        slots.push(instance);
        Ok(id)
    }

    pub async fn release(&self, id: Uuid, succeeded: bool) -> Result<(), PoolError> {
        let mut instances = self.instances.lock().await;
        for slots in instances.values_mut() {
            if let Some(position) = slots.iter().position(|instance| instance.id == id) {
                let instance = &mut slots[position];
                instance.last_used = Instant::now();
                if succeeded {
                    instance.status = InstanceStatus::Idle;
                    instance.error_count = 0;
                } else {
                    instance.error_count += 1;
                    instance.status = InstanceStatus::Error;
                    let errors = instance.error_count;
                    let agent_type = instance.agent_type.clone();
                    if errors > self.config.error_eviction_threshold {
                        warn!(
                            event_name = "pool.instance_evicted",
                            agent_type = %agent_type,
                            instance = %id,
                            errors,
                        );
                        slots.remove(position);
                    }
                }
                return Ok(());
            }
        }
        Err(PoolError::UnknownInstance(id))
    }

    /// Drops idle instances not used within the idle timeout. Returns how
    /// many were reaped.
    pub async fn reap_idle(&self) -> usize {
        let now = Instant::now();
        let timeout = self.config.idle_timeout;
        let mut instances = self.instances.lock().await;
        let mut reaped = 0;
        for slots in instances.values_mut() {
            let before = slots.len();
            slots.retain(|instance| {
                instance.status != InstanceStatus::Idle
                    || now.duration_since(instance.last_used) < timeout
            });
            reaped += before - slots.len();
        }
        if reaped > 0 {
            debug!(event_name = "pool.idle_reaped", count = reaped);
        }
        reaped
    }

    pub async fn stats(&self, agent_type: &str) -> PoolStats {
        let instances = self.instances.lock().await;
        let mut stats = PoolStats::default();
        if let Some(slots) = instances.get(agent_type) {
            for instance in slots {
                match instance.status {
                    InstanceStatus::Idle => stats.idle += 1,
                    InstanceStatus::Busy => stats.busy += 1,
                    InstanceStatus::Error => stats.error += 1,
                }
            }
        }
        stats
    }
}
