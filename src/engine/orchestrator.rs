use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::agent::{AgentOutcome, NodeInput, NodeOutput};
use super::events::{ObservabilityEvent, ObservabilitySink, SwarmEvent};
use super::history::HandoffHistory;
use super::registry::NodeRegistry;
use crate::definitions::OrchestratorBounds;
use crate::error::ConfigError;
use crate::tools::ToolContext;
use crate::types::{
    HandoffRecord, NodeId, NodeResult, NodeStatus, RunEvent, RunId, SwarmResult, SwarmStatus,
    TokenUsage,
};

/// Input of one swarm run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub message: String,
    pub user_id: String,
    pub session_id: String,
}

impl RunRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Mutable state of a single run. Owned by `Swarm::run` and dropped with it.
struct RunState {
    run_id: RunId,
    status: SwarmStatus,
    started: Instant,
    current: NodeId,
    pending_handoff: Option<HandoffRecord>,
    node_history: Vec<NodeId>,
    results: HashMap<NodeId, NodeResult>,
    usage: TokenUsage,
    handoffs: HandoffHistory,
    iterations: usize,
    error: Option<String>,
}

impl RunState {
    fn new(entry: NodeId) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: SwarmStatus::NotStarted,
            started: Instant::now(),
            current: entry,
            pending_handoff: None,
            node_history: Vec::new(),
            results: HashMap::new(),
            usage: TokenUsage::default(),
            handoffs: HandoffHistory::new(),
            iterations: 0,
            error: None,
        }
    }

    fn advance(&mut self, event: RunEvent) {
        self.status = match self.status.transition(event) {
            Ok(next) => next,
            Err(e) => {
                log::error!("{}", e);
                self.error.get_or_insert_with(|| e.to_string());
                SwarmStatus::Failed
            }
        };
    }

    fn fail(&mut self, event: RunEvent, message: String) {
        log::warn!("Swarm run {} stopping: {}", self.run_id, message);
        self.error = Some(message);
        self.advance(event);
    }

    /// Latest result of each visited node, in first-visit order, skipping
    /// the node about to run.
    fn shared_knowledge(&self, exclude: &str) -> Vec<(NodeId, String)> {
        let mut seen = Vec::new();
        for node in &self.node_history {
            if node != exclude && !seen.contains(node) {
                seen.push(node.clone());
            }
        }
        seen.into_iter()
            .filter_map(|node| {
                let text = self.results.get(&node)?.result.clone();
                (!text.is_empty()).then_some((node, text))
            })
            .collect()
    }
}

/// The handoff state machine. Runs one node at a time until a node answers,
/// a bound is exhausted, a deadline passes or a loop is detected.
pub struct Swarm {
    registry: NodeRegistry,
    bounds: OrchestratorBounds,
    sink: Arc<dyn ObservabilitySink>,
}

impl Swarm {
    pub fn new(
        registry: NodeRegistry,
        bounds: OrchestratorBounds,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Result<Self, ConfigError> {
        bounds.validate()?;
        Ok(Self {
            registry,
            bounds,
            sink,
        })
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn bounds(&self) -> &OrchestratorBounds {
        &self.bounds
    }

    /// Execute one run. Never fails: every outcome, including exhaustion and
    /// node errors, is reported through the returned result. Events are sent
    /// to `events` in production order, ending with `SwarmEvent::Finished`.
    pub async fn run(
        &mut self,
        request: RunRequest,
        events: UnboundedSender<SwarmEvent>,
    ) -> SwarmResult {
        let mut state = RunState::new(self.registry.entry().clone());
        state.advance(RunEvent::Started);
        self.registry.reset_all();

        let execution_timeout = self.bounds.execution_timeout();
        let node_timeout = self.bounds.node_timeout();

        let _ = events.send(SwarmEvent::RunStarted {
            run_id: state.run_id,
        });
        log::info!(
            "Starting swarm run {} at '{}' with {} agents",
            state.run_id,
            state.current,
            self.registry.len()
        );

        while state.status == SwarmStatus::Running {
            let elapsed = state.started.elapsed();
            if elapsed >= execution_timeout {
                state.fail(
                    RunEvent::ExecutionDeadlinePassed,
                    format!(
                        "execution timeout of {:.1}s reached before invoking '{}'",
                        execution_timeout.as_secs_f64(),
                        state.current
                    ),
                );
                break;
            }
            if state.iterations >= self.bounds.max_iterations {
                state.fail(
                    RunEvent::IterationLimitReached,
                    format!("maximum of {} iterations reached", self.bounds.max_iterations),
                );
                break;
            }

            let remaining = execution_timeout - elapsed;
            let (deadline, bounded_by_run) = if node_timeout <= remaining {
                (node_timeout, false)
            } else {
                (remaining, true)
            };

            self.execute_node(&mut state, &request, &events, deadline, bounded_by_run)
                .await;
        }

        let result = SwarmResult {
            run_id: state.run_id,
            status: state.status,
            node_history: state.node_history,
            results: state.results,
            accumulated_usage: state.usage,
            execution_time_ms: state.started.elapsed().as_millis() as u64,
            execution_count: state.iterations,
            handoffs: state.handoffs.into_records(),
            error: state.error,
        };

        self.sink.record(&ObservabilityEvent::TerminalStatus {
            run_id: result.run_id,
            status: result.status,
            error: result.error.clone(),
        });
        log::info!(
            "Swarm run {} finished with {} after {} iterations and {} handoffs",
            result.run_id,
            result.status,
            result.execution_count,
            result.handoff_count()
        );
        let _ = events.send(SwarmEvent::Finished(result.clone()));

        result
    }

    async fn execute_node(
        &mut self,
        state: &mut RunState,
        request: &RunRequest,
        events: &UnboundedSender<SwarmEvent>,
        deadline: Duration,
        bounded_by_run: bool,
    ) {
        let node_id = state.current.clone();
        state.iterations += 1;

        let input = NodeInput {
            task: request.message.clone(),
            handoff: state.pending_handoff.take(),
            visited: state.node_history.clone(),
            shared_knowledge: state.shared_knowledge(&node_id),
            peers: self.registry.peers_of(&node_id),
        };
        let handoff_targets = self.registry.names().to_vec();
        let context = ToolContext {
            node_id: node_id.clone(),
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
        };

        let Some(agent) = self.registry.get_mut(&node_id) else {
            state.fail(RunEvent::NodeFailed, format!("agent '{}' is not registered", node_id));
            return;
        };

        self.sink.record(&ObservabilityEvent::NodeEntered {
            run_id: state.run_id,
            node_id: node_id.clone(),
            iteration: state.iterations,
        });
        let _ = events.send(SwarmEvent::NodeStarted {
            node_id: node_id.clone(),
            iteration: state.iterations,
        });

        let mut output = NodeOutput::new(node_id.clone(), events.clone());
        let node_started = Instant::now();
        let outcome = tokio::time::timeout(
            deadline,
            agent.invoke(&input, &handoff_targets, &context, &mut output),
        )
        .await;
        let latency_ms = node_started.elapsed().as_millis() as u64;

        let (status, handoff_to) = match &outcome {
            Err(_) => (NodeStatus::TimedOut, None),
            Ok(Err(_)) => (NodeStatus::Failed, None),
            Ok(Ok(AgentOutcome::Final)) => (NodeStatus::Completed, None),
            Ok(Ok(AgentOutcome::Handoff { target, .. })) => {
                (NodeStatus::HandedOff, Some(target.clone()))
            }
        };
        self.record_result(state, events, &output, status, handoff_to, latency_ms);

        match outcome {
            Err(_) => {
                let (event, status) = if bounded_by_run {
                    (RunEvent::ExecutionDeadlinePassed, SwarmStatus::ExecutionTimeout)
                } else {
                    (RunEvent::NodeDeadlinePassed, SwarmStatus::NodeTimeout)
                };
                self.sink.record(&ObservabilityEvent::TimeoutReached {
                    run_id: state.run_id,
                    node_id: node_id.clone(),
                    status,
                    deadline,
                });
                state.fail(
                    event,
                    format!(
                        "agent '{}' did not finish within {:.1}s",
                        node_id,
                        deadline.as_secs_f64()
                    ),
                );
            }
            Ok(Err(e)) => {
                log::error!("Agent '{}' failed: {}", node_id, e);
                state.fail(RunEvent::NodeFailed, format!("agent '{}' failed: {}", node_id, e));
            }
            Ok(Ok(AgentOutcome::Final)) => state.advance(RunEvent::FinalAnswer),
            Ok(Ok(AgentOutcome::Handoff { target, message })) => {
                self.apply_handoff(state, events, node_id, target, message);
            }
        }
    }

    fn record_result(
        &self,
        state: &mut RunState,
        events: &UnboundedSender<SwarmEvent>,
        output: &NodeOutput,
        status: NodeStatus,
        handoff_to: Option<NodeId>,
        latency_ms: u64,
    ) {
        let node_id = state.current.clone();
        let result = NodeResult {
            node_id: node_id.clone(),
            result: output.result_text(),
            status,
            handoff_to,
            usage: output.usage,
            latency_ms,
            tool_calls: output.tool_calls,
        };

        state.usage += output.usage;
        state.node_history.push(node_id.clone());
        state.results.insert(node_id.clone(), result.clone());

        self.sink.record(&ObservabilityEvent::NodeExited {
            run_id: state.run_id,
            node_id,
            status,
            latency_ms,
        });
        let _ = events.send(SwarmEvent::NodeStopped(result));
    }

    fn apply_handoff(
        &self,
        state: &mut RunState,
        events: &UnboundedSender<SwarmEvent>,
        from: NodeId,
        requested: String,
        message: Option<String>,
    ) {
        let Some(target) = self.registry.resolve(&requested) else {
            state.fail(
                RunEvent::NodeFailed,
                format!(
                    "agent '{}' handed off to unknown agent '{}'",
                    from, requested
                ),
            );
            return;
        };

        if state.handoffs.len() + 1 > self.bounds.max_handoffs {
            state.fail(
                RunEvent::HandoffLimitReached,
                format!(
                    "maximum of {} handoffs reached, '{}' → '{}' rejected",
                    self.bounds.max_handoffs, from, target
                ),
            );
            return;
        }

        let record = HandoffRecord::new(from, target.clone()).with_message(message);
        self.sink.record(&ObservabilityEvent::HandoffOccurred {
            run_id: state.run_id,
            from_node: record.from_node.clone(),
            to_node: record.to_node.clone(),
            message: record.message.clone(),
        });
        let _ = events.send(SwarmEvent::Handoff(record.clone()));
        state.handoffs.record(record.clone());

        let window = self.bounds.repetitive_handoff_detection_window;
        let min_unique = self.bounds.repetitive_handoff_min_unique_agents;
        if state.handoffs.is_repetitive(window, min_unique) {
            state.fail(
                RunEvent::RepetitiveHandoff,
                format!(
                    "fewer than {} distinct agents in the last {} handoffs",
                    min_unique, window
                ),
            );
            return;
        }

        state.current = target;
        state.pending_handoff = Some(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{AgentNode, ModelConfiguration};
    use crate::engine::agent::{Agent, ExecutorConfig};
    use crate::engine::conversation::SlidingWindowConversationManager;
    use crate::engine::events::LogSink;
    use crate::providers::scripted::{ScriptedProvider, ScriptedTurn};
    use tokio::sync::mpsc;

    fn swarm(provider: Arc<ScriptedProvider>, names: &[&str], bounds: OrchestratorBounds) -> Swarm {
        let agents = names
            .iter()
            .map(|name| {
                Agent::new(
                    AgentNode::new(name, format!("You are {}.", name), ModelConfiguration::new("m")),
                    provider.clone(),
                    vec![],
                    Box::new(SlidingWindowConversationManager::new(40)),
                    ExecutorConfig::default(),
                )
            })
            .collect();
        let registry = NodeRegistry::new(agents, names[0]).unwrap();
        Swarm::new(registry, bounds, Arc::new(LogSink)).unwrap()
    }

    fn registry(provider: Arc<ScriptedProvider>, name: &str) -> NodeRegistry {
        let agent = Agent::new(
            AgentNode::new(name, "Answer.", ModelConfiguration::new("m")),
            provider,
            vec![],
            Box::new(SlidingWindowConversationManager::new(40)),
            ExecutorConfig::default(),
        );
        NodeRegistry::new(vec![agent], name).unwrap()
    }

    fn handoff(to: &str) -> ScriptedTurn {
        ScriptedTurn::Handoff {
            to: to.to_string(),
            message: Some(format!("over to {}", to)),
            text: String::new(),
        }
    }

    fn answer(text: &str) -> ScriptedTurn {
        ScriptedTurn::Answer {
            text: text.to_string(),
        }
    }

    async fn run(swarm: &mut Swarm) -> SwarmResult {
        let (tx, _rx) = mpsc::unbounded_channel();
        swarm.run(RunRequest::new("hello"), tx).await
    }

    #[test]
    fn test_new_rejects_invalid_bounds() {
        let provider = Arc::new(ScriptedProvider::new());

        let no_handoffs = OrchestratorBounds {
            max_handoffs: 0,
            ..Default::default()
        };
        let result = Swarm::new(registry(provider.clone(), "solo"), no_handoffs, Arc::new(LogSink));
        assert!(matches!(result, Err(ConfigError::InvalidBounds(_))));

        let narrow_window = OrchestratorBounds {
            repetitive_handoff_detection_window: 3,
            repetitive_handoff_min_unique_agents: 3,
            ..Default::default()
        };
        let result = Swarm::new(registry(provider, "solo"), narrow_window, Arc::new(LogSink));
        assert!(matches!(result, Err(ConfigError::InvalidBounds(_))));
    }

    #[tokio::test]
    async fn test_single_node_answer() {
        let provider = Arc::new(ScriptedProvider::new().script("solo", vec![answer("hi there")]));
        let mut swarm = swarm(provider, &["solo"], OrchestratorBounds::default());

        let result = run(&mut swarm).await;

        assert_eq!(result.status, SwarmStatus::Completed);
        assert_eq!(result.execution_count, 1);
        assert_eq!(result.final_answer(), "hi there");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_handoff_carries_message_and_context() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .script(
                    "researcher",
                    vec![ScriptedTurn::Handoff {
                        to: "writer".to_string(),
                        message: Some("facts gathered".to_string()),
                        text: "cats sleep a lot".to_string(),
                    }],
                )
                .script("writer", vec![answer("an essay")]),
        );
        let mut swarm = swarm(provider.clone(), &["researcher", "writer"], OrchestratorBounds::default());

        let result = run(&mut swarm).await;
        assert_eq!(result.status, SwarmStatus::Completed);

        let writer_request = provider
            .requests()
            .into_iter()
            .find(|r| r.node_id == "writer")
            .unwrap();
        let prompt = &writer_request.messages[0].content;
        assert!(prompt.contains("Handoff Message: facts gathered"));
        assert!(prompt.contains("• researcher: cats sleep a lot"));
        assert!(prompt.contains("Previous agents who worked on this: researcher"));
    }

    #[tokio::test]
    async fn test_unknown_handoff_target_fails() {
        let provider = Arc::new(ScriptedProvider::new().script("solo", vec![handoff("ghost")]));
        let mut swarm = swarm(provider, &["solo"], OrchestratorBounds::default());

        let result = run(&mut swarm).await;

        assert_eq!(result.status, SwarmStatus::Failed);
        assert!(result.handoffs.is_empty());
        assert_eq!(result.node_history, vec!["solo"]);
        assert!(result.error.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_node_error_fails_run() {
        let provider = Arc::new(ScriptedProvider::new().script(
            "solo",
            vec![ScriptedTurn::Throttle {
                message: "rate exceeded".to_string(),
            }],
        ));
        let mut swarm = swarm(provider, &["solo"], OrchestratorBounds::default());

        let result = run(&mut swarm).await;

        assert_eq!(result.status, SwarmStatus::Failed);
        assert_eq!(result.results["solo"].status, NodeStatus::Failed);
        assert!(result.error.unwrap().contains("throttled"));
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .script("a", vec![handoff("b")])
                .script("b", vec![handoff("c")])
                .script("c", vec![handoff("a")]),
        );
        let bounds = OrchestratorBounds {
            max_iterations: 5,
            ..Default::default()
        };
        let mut swarm = swarm(provider, &["a", "b", "c"], bounds);

        let result = run(&mut swarm).await;

        assert_eq!(result.status, SwarmStatus::MaxIterationsExceeded);
        assert_eq!(result.execution_count, 5);
        assert_eq!(result.node_history, vec!["a", "b", "c", "a", "b"]);
        assert_eq!(result.handoff_count(), 5);
    }

    #[tokio::test]
    async fn test_execution_deadline_bounds_node_deadline() {
        let provider = Arc::new(
            ScriptedProvider::new().script("slow", vec![ScriptedTurn::Hang { text: String::new() }]),
        );
        let bounds = OrchestratorBounds {
            execution_timeout_seconds: 0.2,
            node_timeout_seconds: 0.2,
            ..Default::default()
        };
        let mut swarm = swarm(provider, &["slow"], bounds);

        let result = run(&mut swarm).await;

        // The node deadline equals the remaining run time, so the run deadline wins.
        assert_eq!(result.status, SwarmStatus::ExecutionTimeout);
        assert_eq!(result.results["slow"].status, NodeStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_agents_reset_between_runs() {
        let provider = Arc::new(ScriptedProvider::new().script("solo", vec![answer("ok")]));
        let mut swarm = swarm(provider.clone(), &["solo"], OrchestratorBounds::default());

        run(&mut swarm).await;
        run(&mut swarm).await;

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 1);
    }
}
