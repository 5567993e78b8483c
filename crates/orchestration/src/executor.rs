use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use concierge_core::state::ConversationState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One agent at a time, in plan order.
    Sequential,
    /// Every agent in a single wave.
    Parallel,
    /// Dependency-ordered waves.
    Pipeline,
}

#[derive(Clone, Debug)]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    pub agents: Vec<String>,
    /// Agent name -> agents that must complete first. Only meaningful for
    /// `Pipeline` plans.
    pub dependencies: HashMap<String, Vec<String>>,
    pub timeout: Duration,
}

impl ExecutionPlan {
    pub fn sequential(agents: Vec<String>) -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            agents,
            dependencies: HashMap::new(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn parallel(agents: Vec<String>) -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            agents,
            dependencies: HashMap::new(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn pipeline(agents: Vec<String>, dependencies: HashMap<String, Vec<String>>) -> Self {
        Self {
            mode: ExecutionMode::Pipeline,
            agents,
            dependencies,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub agent: String,
    pub success: bool,
    pub output: Option<Value>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no handler registered for agent `{0}`")]
    UnknownAgent(String),
}

/// Work performed for one agent within a collaborative plan. Earlier-wave
/// outcomes arrive through `previous`, keyed by agent name.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn run(
        &self,
        agent: &str,
        state: &ConversationState,
        previous: &HashMap<String, ExecutionOutcome>,
    ) -> anyhow::Result<Value>;
}

/// Runs agent handlers as waves under a counting-semaphore concurrency bound.
///
/// A handler failure is recorded in its outcome and never cancels the rest of
/// the wave. Each wave runs under the plan timeout; agents still pending when
/// it expires get failure outcomes.
pub struct ParallelExecutor {
    handlers: HashMap<String, Arc<dyn AgentHandler>>,
    semaphore: Arc<Semaphore>,
}

impl ParallelExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self { handlers: HashMap::new(), semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))) }
    }

    pub fn register(&mut self, agent: impl Into<String>, handler: Arc<dyn AgentHandler>) {
        self.handlers.insert(agent.into(), handler);
    }

    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        state: &ConversationState,
    ) -> Result<HashMap<String, ExecutionOutcome>, ExecutionError> {
        for agent in &plan.agents {
            if !self.handlers.contains_key(agent) {
                return Err(ExecutionError::UnknownAgent(agent.clone()));
            }
        }

        let waves = match plan.mode {
            ExecutionMode::Sequential => {
                plan.agents.iter().map(|agent| vec![agent.clone()]).collect::<Vec<_>>()
            }
            ExecutionMode::Parallel => vec![plan.agents.clone()],
            ExecutionMode::Pipeline => topological_waves(&plan.agents, &plan.dependencies),
        };

        let shared_state = Arc::new(state.clone());
        let mut results: HashMap<String, ExecutionOutcome> = HashMap::new();

        for wave in waves {
            debug!(event_name = "executor.wave_start", agents = wave.len());
            let snapshot = Arc::new(results.clone());
            let mut join_set = JoinSet::new();
            let mut remaining: HashSet<String> = wave.iter().cloned().collect();

            for agent in &wave {
                let handler = Arc::clone(&self.handlers[agent]);
                let semaphore = Arc::clone(&self.semaphore);
                let state = Arc::clone(&shared_state);
                let previous = Arc::clone(&snapshot);
                let agent = agent.clone();
                join_set.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return ExecutionOutcome {
                                agent,
                                success: false,
                                output: None,
                                elapsed: Duration::ZERO,
                                error: Some("executor shut down".to_string()),
                            }
                        }
                    };
                    let started = Instant::now();
                    match handler.run(&agent, &state, &previous).await {
                        Ok(output) => ExecutionOutcome {
                            agent,
                            success: true,
                            output: Some(output),
                            elapsed: started.elapsed(),
                            error: None,
                        },
                        Err(error) => {
                            warn!(event_name = "executor.agent_failed", agent = %agent, error = %error);
                            ExecutionOutcome {
                                agent,
                                success: false,
                                output: None,
                                elapsed: started.elapsed(),
                                error: Some(error.to_string()),
                            }
                        }
                    }
                });
            }

            let wave_deadline = tokio::time::Instant::now() + plan.timeout;
            loop {
                match tokio::time::timeout_at(wave_deadline, join_set.join_next()).await {
                    Ok(Some(Ok(outcome))) => {
                        remaining.remove(&outcome.agent);
                        results.insert(outcome.agent.clone(), outcome);
                    }
                    Ok(Some(Err(join_error))) => {
                        warn!(event_name = "executor.task_panicked", error = %join_error);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(event_name = "executor.wave_timeout", timeout_ms = plan.timeout.as_millis() as u64);
                        join_set.abort_all();
                        break;
                    }
                }
            }
            for agent in remaining {
                results.insert(
                    agent.clone(),
                    ExecutionOutcome {
                        agent,
                        success: false,
                        output: None,
                        elapsed: plan.timeout,
                        error: Some("agent did not complete within the wave".to_string()),
                    },
                );
            }
        }

        Ok(results)
    }
}

/// Groups agents into dependency-ordered waves. When no agent is ready (a
/// dependency cycle), progress is forced with the first pending agent.
/// Dependencies on agents outside the plan are treated as satisfied.
fn topological_waves(
    agents: &[String],
    dependencies: &HashMap<String, Vec<String>>,
) -> Vec<Vec<String>> {
    let mut done: HashSet<String> = HashSet::new();
    let mut pending: Vec<String> = agents.to_vec();
    let mut waves = Vec::new();

    while !pending.is_empty() {
        let mut ready = pending
            .iter()
            .filter(|agent| {
                dependencies.get(*agent).map_or(true, |deps| {
                    deps.iter()
                        .all(|dep| done.contains(dep) || !agents.contains(dep))
                })
            })
            .cloned()
            .collect::<Vec<_>>();

        if ready.is_empty() {
            warn!(event_name = "executor.cycle_break", agent = %pending[0]);
            ready.push(pending[0].clone());
        }

        pending.retain(|agent| !ready.contains(agent));
        done.extend(ready.iter().cloned());
        waves.push(ready);
    }

    waves
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use concierge_core::state::ConversationState;

    use super::{
        topological_waves, AgentHandler, ExecutionOutcome, ExecutionPlan, ParallelExecutor,
    };

    struct RecordingHandler {
        order: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl AgentHandler for RecordingHandler {
        async fn run(
            &self,
            agent: &str,
            _state: &ConversationState,
            previous: &HashMap<String, ExecutionOutcome>,
        ) -> anyhow::Result<Value> {
            self.order.lock().expect("order lock").push(agent.to_string());
            if self.fail {
                anyhow::bail!("simulated failure in {agent}");
            }
            Ok(json!({ "agent": agent, "saw_previous": previous.keys().collect::<Vec<_>>() }))
        }
    }

    fn executor_fixture(
        agents: &[&str],
        failing: &[&str],
    ) -> (ParallelExecutor, Arc<Mutex<Vec<String>>>) {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut executor = ParallelExecutor::new(5);
        for agent in agents {
            executor.register(
                *agent,
                Arc::new(RecordingHandler {
                    order: Arc::clone(&order),
                    fail: failing.contains(agent),
                }),
            );
        }
        (executor, order)
    }

    fn state_fixture() -> ConversationState {
        ConversationState::new("session-1", "user-9", "quarterly rollup")
    }

    #[tokio::test]
    async fn sequential_plan_runs_in_order() {
        let (executor, order) = executor_fixture(&["client_agent", "contract_agent"], &[]);
        let plan = ExecutionPlan::sequential(vec![
            "client_agent".to_string(),
            "contract_agent".to_string(),
        ]);

        let results = executor.execute(&plan, &state_fixture()).await.expect("execute");
        assert_eq!(results.len(), 2);
        assert_eq!(
            *order.lock().expect("order lock"),
            vec!["client_agent".to_string(), "contract_agent".to_string()]
        );
    }

    #[tokio::test]
    async fn failure_is_isolated_to_the_failing_agent() {
        let (executor, _order) =
            executor_fixture(&["client_agent", "contract_agent"], &["client_agent"]);
        let plan = ExecutionPlan::parallel(vec![
            "client_agent".to_string(),
            "contract_agent".to_string(),
        ]);

        let results = executor.execute(&plan, &state_fixture()).await.expect("execute");
        assert!(!results["client_agent"].success);
        assert!(results["client_agent"].error.as_deref().unwrap().contains("simulated failure"));
        assert!(results["contract_agent"].success);
    }

    #[tokio::test]
    async fn pipeline_exposes_earlier_results_to_later_waves() {
        let (executor, _order) = executor_fixture(&["client_agent", "contract_agent"], &[]);
        let mut dependencies = HashMap::new();
        dependencies.insert("contract_agent".to_string(), vec!["client_agent".to_string()]);
        let plan = ExecutionPlan::pipeline(
            vec!["client_agent".to_string(), "contract_agent".to_string()],
            dependencies,
        );

        let results = executor.execute(&plan, &state_fixture()).await.expect("execute");
        let output = results["contract_agent"].output.as_ref().expect("output");
        assert_eq!(output["saw_previous"], json!(["client_agent"]));
    }

    #[tokio::test]
    async fn unknown_agent_is_rejected_up_front() {
        let (executor, _order) = executor_fixture(&["client_agent"], &[]);
        let plan = ExecutionPlan::parallel(vec!["ghost_agent".to_string()]);
        assert!(executor.execute(&plan, &state_fixture()).await.is_err());
    }

    #[test]
    fn circular_dependencies_still_terminate() {
        let agents = vec!["a".to_string(), "b".to_string()];
        let mut dependencies = HashMap::new();
        dependencies.insert("a".to_string(), vec!["b".to_string()]);
        dependencies.insert("b".to_string(), vec!["a".to_string()]);

        let waves = topological_waves(&agents, &dependencies);
        let total: usize = waves.iter().map(Vec::len).sum();
        assert_eq!(total, 2);
        // The cycle is broken by forcing the first pending agent.
        assert_eq!(waves[0], vec!["a".to_string()]);
    }

    struct GaugedHandler {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AgentHandler for GaugedHandler {
        async fn run(
            &self,
            _agent: &str,
            _state: &ConversationState,
            _previous: &HashMap<String, ExecutionOutcome>,
        ) -> anyhow::Result<Value> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn semaphore_bounds_concurrent_handlers() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut executor = ParallelExecutor::new(2);
        let agents: Vec<String> = (0..6).map(|index| format!("agent-{index}")).collect();
        for agent in &agents {
            executor.register(
                agent.clone(),
                Arc::new(GaugedHandler {
                    in_flight: Arc::clone(&in_flight),
                    peak: Arc::clone(&peak),
                }),
            );
        }

        let plan = ExecutionPlan::parallel(agents);
        let results = executor.execute(&plan, &state_fixture()).await.expect("execute");
        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
