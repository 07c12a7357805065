use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use relay_backends::BackendRegistry;
use relay_core::agent::{AgentConfig, AgentState, AgentStatus};
use relay_core::errors::BackendError;
use relay_core::events::{AgenticEvent, EventSink};
use relay_core::ids::SessionId;
use relay_core::messages::{AgentNote, Message, TARGET_ALL, TARGET_USER};
use relay_core::session::SessionEndReason;
use relay_store::{AgentRepo, AgentUpdate, Database, MessageRepo, NoteRepo, SessionRepo};

use crate::channel::{ChannelError, EventChannel, EventConsumer};
use crate::config::{GuardrailConfig, SessionConfig};
use crate::error::EngineError;
use crate::guardrails::{Delivery, GuardrailTrip, Guardrails};
use crate::names;
use crate::parser::{self, KnownTargets};
use crate::queue::MessageQueue;
use crate::session::SessionManager;
use crate::truncate;

/// Starts agentic runs. One instance can drive many sessions; each run
/// gets its own task, queue and backend sessions.
pub struct Orchestrator {
    registry: Arc<BackendRegistry>,
    db: Database,
    sinks: Vec<Arc<dyn EventSink>>,
    guardrails: GuardrailConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<BackendRegistry>, db: Database) -> Self {
        Self {
            registry,
            db,
            sinks: Vec::new(),
            guardrails: GuardrailConfig::default(),
        }
    }

    /// Mirror every event to `sink` as well as the run's event channel.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailConfig) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// Validate `config`, record the session and start the run loop.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip_all, fields(agents = config.agents.len(), max_turns = config.max_turns))]
    pub fn run(&self, config: SessionConfig) -> Result<SessionRun, EngineError> {
        if config.agents.is_empty() {
            return Err(EngineError::InvalidConfig("at least one agent is required".into()));
        }
        if config.max_turns == 0 {
            return Err(EngineError::InvalidConfig("max_turns must be at least 1".into()));
        }
        for agent in &config.agents {
            self.registry.get(&agent.backend)?;
        }

        let agents = names::assign_names(&config.agents);
        let mut seen = HashSet::new();
        for agent in &agents {
            if !seen.insert(agent.name.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate agent name: {}",
                    agent.name
                )));
            }
        }

        let states: Vec<AgentState> = agents.iter().map(AgentState::from_config).collect();
        let session = SessionRepo::new(self.db.clone()).create_with_agents(
            &config.prompt,
            config.max_turns,
            &states,
        )?;
        info!(session_id = %session.id, "agentic session created");

        let channel = EventChannel::new();
        let stop = CancellationToken::new();
        let sessions = SessionManager::new(Arc::clone(&self.registry))
            .with_sandbox(config.sandbox)
            .with_call_timeout(config.call_timeout)
            .with_streaming(config.streaming);

        let run_loop = RunLoop {
            session_id: session.id.clone(),
            known: KnownTargets::new(agents.iter().map(|a| a.name.as_str())),
            agents,
            states,
            config,
            queue: MessageQueue::new(),
            sessions: Arc::new(sessions),
            guardrails: Guardrails::new(self.guardrails),
            tripped: None,
            routed_any: false,
            turn: 0,
            started: Instant::now(),
            channel: channel.clone(),
            sinks: self.sinks.clone(),
            stop: stop.clone(),
            session_repo: SessionRepo::new(self.db.clone()),
            agent_repo: AgentRepo::new(self.db.clone()),
            message_repo: MessageRepo::new(self.db.clone()),
            note_repo: NoteRepo::new(self.db.clone()),
        };
        let handle = tokio::spawn(run_loop.run());

        Ok(SessionRun {
            session_id: session.id,
            channel,
            stop,
            handle,
        })
    }
}

/// Handle to one running session.
pub struct SessionRun {
    session_id: SessionId,
    channel: EventChannel,
    stop: CancellationToken,
    handle: JoinHandle<Result<SessionEndReason, EngineError>>,
}

impl SessionRun {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The run's event stream. Only one consumer may attach.
    pub fn events(&self) -> Result<EventConsumer, ChannelError> {
        self.channel.consumer()
    }

    /// Ask the run to end with `stopped` at the next round boundary.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Token that stops the run when cancelled (for signal handlers).
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Wait for the session to end. Store failures surface here after the
    /// closing `session_end` has been emitted.
    pub async fn wait(self) -> Result<SessionEndReason, EngineError> {
        self.handle
            .await
            .map_err(|e| EngineError::Internal(format!("session task failed: {e}")))?
    }
}

struct RunLoop {
    session_id: SessionId,
    agents: Vec<AgentConfig>,
    states: Vec<AgentState>,
    known: KnownTargets,
    config: SessionConfig,
    queue: MessageQueue,
    sessions: Arc<SessionManager>,
    guardrails: Guardrails,
    tripped: Option<GuardrailTrip>,
    /// Whether any agent has produced a routed message yet.
    routed_any: bool,
    turn: u32,
    started: Instant,
    channel: EventChannel,
    sinks: Vec<Arc<dyn EventSink>>,
    stop: CancellationToken,
    session_repo: SessionRepo,
    agent_repo: AgentRepo,
    message_repo: MessageRepo,
    note_repo: NoteRepo,
}

/// A backend call finished during a round.
type Reply = (String, Result<String, BackendError>);

impl RunLoop {
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    async fn run(mut self) -> Result<SessionEndReason, EngineError> {
        let outcome = self.drive().await;
        let reason = match &outcome {
            Ok(reason) => *reason,
            Err(e) => {
                error!(error = %e, "session loop failed");
                self.emit(AgenticEvent::Error {
                    session_id: self.session_id.clone(),
                    agent: None,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                SessionEndReason::Error
            }
        };
        let ended = self.finish(reason);
        let reason = outcome?;
        ended?;
        Ok(reason)
    }

    async fn drive(&mut self) -> Result<SessionEndReason, EngineError> {
        self.emit(AgenticEvent::SessionStart {
            session_id: self.session_id.clone(),
            prompt: self.config.prompt.clone(),
            agents: self.states.clone(),
            timestamp: Utc::now(),
        });
        let prompt = self.config.prompt.clone();
        for agent in self.agents.clone() {
            self.record_message(TARGET_USER, &agent.name, &prompt, 0)?;
        }

        loop {
            if self.stop.is_cancelled() {
                return Ok(SessionEndReason::Stopped);
            }
            self.turn += 1;
            if self.turn == 1 {
                self.spawn_round().await?;
            } else {
                self.resume_round().await?;
            }
            if let Some(reason) = self.check_termination() {
                return Ok(reason);
            }
        }
    }

    /// Round 1: every agent gets its system prompt plus the shared prompt.
    async fn spawn_round(&mut self) -> Result<(), EngineError> {
        let names: Vec<String> = self.agents.iter().map(|a| a.name.clone()).collect();
        let mut calls = FuturesUnordered::new();
        for agent in self.agents.clone() {
            let system_prompt = parser::build_system_prompt(
                &agent.name,
                &names,
                agent.description.as_deref(),
                Some(self.config.max_turns),
            );
            let sessions = Arc::clone(&self.sessions);
            let prompt = self.config.prompt.clone();
            let repo = self.config.repo_path.clone();
            calls.push(async move {
                let result = sessions
                    .spawn(&agent, &system_prompt, &prompt, &repo)
                    .await
                    .map(|spawned| (spawned.output, spawned.session_id));
                (agent.name, result)
            });
        }

        let mut deliveries = Vec::new();
        while let Some((name, result)) = calls.next().await {
            let result = match result {
                Ok((output, backend_session_id)) => {
                    self.agent_repo.update(
                        &self.session_id,
                        &name,
                        &AgentUpdate {
                            backend_session_id: Some(backend_session_id.clone()),
                            ..Default::default()
                        },
                    )?;
                    if let Some(state) = self.state_mut(&name) {
                        state.backend_session_id = Some(backend_session_id);
                    }
                    Ok(output)
                }
                Err(e) => Err(e),
            };
            self.handle_reply((name, result), &mut deliveries)?;
        }
        self.close_round(&deliveries);
        Ok(())
    }

    /// Rounds 2+: every live agent with mail gets its batch, concurrently.
    async fn resume_round(&mut self) -> Result<(), EngineError> {
        let mut pending = self.queue.dequeue_all();
        let mut calls = FuturesUnordered::new();

        for name in self.agents.iter().map(|a| a.name.clone()).collect::<Vec<_>>() {
            let Some(mail) = pending.remove(&name) else {
                continue;
            };
            if self.is_dead(&name) {
                debug!(agent = %name, dropped = mail.len(), "mail for dead agent dropped");
                continue;
            }
            if self.state(&name).map(|s| s.status) == Some(AgentStatus::Idle) {
                self.set_status(&name, AgentStatus::Active)?;
            }
            let prompt = mail
                .iter()
                .map(|m| format!("@{} says: {}", m.from, m.content))
                .collect::<Vec<_>>()
                .join("\n\n");
            let sessions = Arc::clone(&self.sessions);
            let repo = self.config.repo_path.clone();
            calls.push(async move {
                let result = sessions.resume(&name, &prompt, &repo).await;
                (name, result)
            });
        }
        for (target, mail) in pending {
            warn!(target = %target, dropped = mail.len(), "mail for unknown target dropped");
        }

        let mut deliveries = Vec::new();
        while let Some(reply) = calls.next().await {
            self.handle_reply(reply, &mut deliveries)?;
        }
        self.close_round(&deliveries);
        Ok(())
    }

    /// Parse, persist and route one agent's reply as soon as it arrives.
    fn handle_reply(&mut self, reply: Reply, deliveries: &mut Vec<Delivery>) -> Result<(), EngineError> {
        let (name, result) = reply;
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(agent = %name, error = %e, kind = e.error_kind(), "agent call failed");
                self.emit(AgenticEvent::Error {
                    session_id: self.session_id.clone(),
                    agent: Some(name.clone()),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                return self.set_status(&name, AgentStatus::Dead);
            }
        };

        let parsed = parser::parse(&output, &self.known);
        if !parsed.notes.is_empty() {
            debug!(agent = %name, turn = self.turn, notes = %parsed.notes, "agent notes");
            self.note_repo.append(&AgentNote {
                id: None,
                session_id: self.session_id.clone(),
                agent: name.clone(),
                content: parsed.notes.clone(),
                timestamp: Utc::now(),
                turn: self.turn,
            })?;
        }

        for msg in &parsed.messages {
            let content = truncate::truncate_message(&msg.content, self.config.max_message_size);
            self.record_message(&name, &msg.to, &content, self.turn)?;
            self.routed_any = true;

            let recipients: Vec<String> = match msg.to.as_str() {
                TARGET_USER => Vec::new(),
                TARGET_ALL => self
                    .states
                    .iter()
                    .filter(|s| s.name != name && !s.status.is_dead())
                    .map(|s| s.name.clone())
                    .collect(),
                target => vec![target.to_string()],
            };
            for to in recipients {
                self.queue.enqueue(Message::new(
                    self.session_id.clone(),
                    name.clone(),
                    to.clone(),
                    content.clone(),
                    self.turn,
                ));
                deliveries.push(Delivery {
                    from: name.clone(),
                    to,
                    content: content.clone(),
                });
            }
        }

        let status = if parsed.has_routable() {
            AgentStatus::Active
        } else {
            AgentStatus::Idle
        };
        self.set_status(&name, status)
    }

    fn close_round(&mut self, deliveries: &[Delivery]) {
        let pending = self.queue.size();
        if let Some(trip) = self.guardrails.observe_round(deliveries, pending) {
            warn!(guard = trip.guard, detail = %trip.detail, "guardrail tripped");
            self.tripped = Some(trip);
        }
        self.emit(AgenticEvent::TurnComplete {
            session_id: self.session_id.clone(),
            turn: self.turn,
            pending_count: pending,
            timestamp: Utc::now(),
        });
    }

    fn check_termination(&mut self) -> Option<SessionEndReason> {
        if self.stop.is_cancelled() {
            return Some(SessionEndReason::Stopped);
        }
        if self.states.iter().all(|s| s.status.is_dead()) {
            self.emit(AgenticEvent::Error {
                session_id: self.session_id.clone(),
                agent: None,
                error: "all agents are dead".into(),
                timestamp: Utc::now(),
            });
            return Some(SessionEndReason::Error);
        }
        if let Some(trip) = self.tripped.take() {
            self.emit_guardrail(trip.guard, trip.detail);
            return Some(SessionEndReason::Converged);
        }
        if self.queue.is_empty() && self.routed_any {
            return Some(SessionEndReason::Converged);
        }
        if self.turn >= self.config.max_turns {
            self.emit_guardrail(
                "max_turns",
                format!("Reached maximum of {} turns", self.config.max_turns),
            );
            return Some(SessionEndReason::MaxTurns);
        }
        if self.started.elapsed() >= self.config.timeout {
            self.emit_guardrail(
                "timeout",
                format!("Session timed out after {}s", self.config.timeout.as_secs()),
            );
            return Some(SessionEndReason::Timeout);
        }
        None
    }

    /// Record the end everywhere and release backend sessions.
    fn finish(&mut self, reason: SessionEndReason) -> Result<(), EngineError> {
        let stored = self.session_repo.end(&self.session_id, reason.status(), self.turn);
        if let Err(e) = &stored {
            error!(error = %e, "failed to record session end");
        }
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(%reason, turn = self.turn, elapsed_ms = elapsed, "agentic session ended");
        self.emit(AgenticEvent::SessionEnd {
            session_id: self.session_id.clone(),
            reason,
            turn: self.turn,
            elapsed,
            timestamp: Utc::now(),
        });
        self.sessions.clear();
        self.queue.clear();
        self.channel.close();
        stored.map_err(EngineError::from)
    }

    fn record_message(&mut self, from: &str, to: &str, content: &str, turn: u32) -> Result<(), EngineError> {
        let stored = self.message_repo.append(&Message::new(
            self.session_id.clone(),
            from,
            to,
            content,
            turn,
        ))?;
        if let Some(state) = self.state_mut(from) {
            state.message_count += 1;
        }
        self.emit(AgenticEvent::Message {
            session_id: self.session_id.clone(),
            from: stored.from,
            to: stored.to,
            content: stored.content,
            turn,
            timestamp: stored.timestamp,
        });
        Ok(())
    }

    fn set_status(&mut self, name: &str, status: AgentStatus) -> Result<(), EngineError> {
        let update = AgentUpdate {
            message_count: self.state(name).map(|s| s.message_count),
            ..AgentUpdate::status(status)
        };
        self.agent_repo.update(&self.session_id, name, &update)?;
        if let Some(state) = self.state_mut(name) {
            state.status = status;
            state.last_seen = Some(Utc::now());
        }
        self.emit(AgenticEvent::AgentStatus {
            session_id: self.session_id.clone(),
            agent: name.to_string(),
            status,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn emit_guardrail(&self, guard: &str, detail: String) {
        self.emit(AgenticEvent::Guardrail {
            session_id: self.session_id.clone(),
            guard: guard.to_string(),
            detail,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: AgenticEvent) {
        for sink in &self.sinks {
            sink.publish(&event);
        }
        self.channel.push(event);
    }

    fn state(&self, name: &str) -> Option<&AgentState> {
        self.states.iter().find(|s| s.name == name)
    }

    fn state_mut(&mut self, name: &str) -> Option<&mut AgentState> {
        self.states.iter_mut().find(|s| s.name == name)
    }

    fn is_dead(&self, name: &str) -> bool {
        self.state(name).map_or(true, |s| s.status.is_dead())
    }
}
