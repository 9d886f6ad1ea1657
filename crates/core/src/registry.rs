use crate::analysis::AnalysisResult;
use crate::catalog::{RoleScenarioCatalog, Scenario};
use crate::generator::{SharedAnalysisRequester, SharedTurnGenerator};
use crate::session::{
    ConversationSession, SessionError, SessionSnapshot, generate_reply, request_analysis,
};
use crate::turn::Turn;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub type SessionId = String;

/// One session's state plus the gate that keeps its turns in order.
///
/// `state` is only held for in-memory changes. `turn_gate` is held for the whole of a
/// `submit_user_turn`, including the model call, so two submissions on the same session
/// cannot interleave their user and assistant turns.
struct SessionHandle {
    state: Mutex<ConversationSession>,
    turn_gate: Mutex<()>,
    last_active: std::sync::Mutex<Instant>,
}

impl SessionHandle {
    fn new(session: ConversationSession) -> Self {
        Self {
            state: Mutex::new(session),
            turn_gate: Mutex::new(()),
            last_active: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        let mut last_active = self
            .last_active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last_active = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last_active = self
            .last_active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        now.saturating_duration_since(*last_active)
    }
}

/// Everything a client needs to render a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub snapshot: Option<SessionSnapshot>,
    pub role_guidance: String,
    pub history: Vec<Turn>,
}

/// A role assignment and the guidance for it, read under one lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
    pub role_guidance: String,
}

/// Outcome of a scenario switch, read under the same lock as the switch itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioSwitch {
    pub switched: bool,
    pub scenario: Option<Scenario>,
    pub role_guidance: String,
}

/// All live training sessions, keyed by id.
pub struct SessionRegistry {
    catalog: Arc<RoleScenarioCatalog>,
    generator: SharedTurnGenerator,
    requester: SharedAnalysisRequester,
    call_timeout: Duration,
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(
        catalog: Arc<RoleScenarioCatalog>,
        generator: SharedTurnGenerator,
        requester: SharedAnalysisRequester,
        call_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            generator,
            requester,
            call_timeout,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &RoleScenarioCatalog {
        &self.catalog
    }

    /// Registers an empty session and returns its id.
    pub async fn create(&self) -> SessionId {
        let id = uuid::Uuid::new_v4().to_string();
        self.insert(id.clone(), ConversationSession::new(self.catalog.clone()))
            .await;
        id
    }

    /// Creates and initialises a session. Nothing is registered if `init` fails.
    pub async fn start(
        &self,
        primary_role: &str,
        counterpart_role: Option<&str>,
        scenario: &str,
    ) -> Result<(SessionId, Assignment), SessionError> {
        let mut session = ConversationSession::new(self.catalog.clone());
        let snapshot = session.init(primary_role, counterpart_role, scenario)?;
        let assignment = Assignment {
            snapshot,
            role_guidance: session.role_guidance(),
        };
        let id = uuid::Uuid::new_v4().to_string();
        self.insert(id.clone(), session).await;
        Ok((id, assignment))
    }

    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Session ended");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drops every session untouched for at least `idle_ttl`. Sessions with a request
    /// in flight are kept. Returns how many were dropped.
    pub async fn evict_idle(&self, idle_ttl: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        // The map holds one reference; any other means a request still owns the handle.
        sessions.retain(|id, handle| {
            let keep = Arc::strong_count(handle) > 1 || handle.idle_for(now) < idle_ttl;
            if !keep {
                tracing::info!(session_id = %id, "Evicting idle session");
            }
            keep
        });
        before - sessions.len()
    }

    pub async fn init(
        &self,
        id: &str,
        primary_role: &str,
        counterpart_role: Option<&str>,
        scenario: &str,
    ) -> Result<Assignment, SessionError> {
        let handle = self.handle(id).await?;
        let mut session = handle.state.lock().await;
        let snapshot = session.init(primary_role, counterpart_role, scenario)?;
        Ok(Assignment {
            snapshot,
            role_guidance: session.role_guidance(),
        })
    }

    pub async fn switch_roles(&self, id: &str) -> Result<Assignment, SessionError> {
        let handle = self.handle(id).await?;
        let mut session = handle.state.lock().await;
        let snapshot = session.switch_roles()?;
        Ok(Assignment {
            snapshot,
            role_guidance: session.role_guidance(),
        })
    }

    /// Only fails for an unknown session; an unknown scenario yields `switched: false`.
    pub async fn switch_scenario(
        &self,
        id: &str,
        scenario: &str,
    ) -> Result<ScenarioSwitch, SessionError> {
        let handle = self.handle(id).await?;
        let mut session = handle.state.lock().await;
        let switched = session.switch_scenario(scenario);
        Ok(ScenarioSwitch {
            switched,
            scenario: session.snapshot().map(|s| s.scenario),
            role_guidance: session.role_guidance(),
        })
    }

    pub async fn reset_conversation(&self, id: &str) -> Result<(), SessionError> {
        let handle = self.handle(id).await?;
        let mut session = handle.state.lock().await;
        session.reset_conversation()
    }

    pub async fn role_guidance(&self, id: &str) -> Result<String, SessionError> {
        let handle = self.handle(id).await?;
        let session = handle.state.lock().await;
        Ok(session.role_guidance())
    }

    pub async fn snapshot(&self, id: &str) -> Result<Option<SessionSnapshot>, SessionError> {
        let handle = self.handle(id).await?;
        let session = handle.state.lock().await;
        Ok(session.snapshot())
    }

    pub async fn view(&self, id: &str) -> Result<SessionView, SessionError> {
        let handle = self.handle(id).await?;
        let session = handle.state.lock().await;
        Ok(SessionView {
            session_id: id.to_string(),
            snapshot: session.snapshot(),
            role_guidance: session.role_guidance(),
            history: session.history().to_vec(),
        })
    }

    /// Records the user's turn, asks the generator for a reply and records it.
    ///
    /// The exchange runs on its own task, so it completes and the history ends in an
    /// assistant turn even if the caller stops waiting. The state lock is released
    /// while the generator runs, so reads on this session and all work on other
    /// sessions continue in the meantime.
    pub async fn submit_user_turn(&self, id: &str, text: &str) -> Result<Turn, SessionError> {
        let handle = self.handle(id).await?;
        let generator = self.generator.clone();
        let call_timeout = self.call_timeout;
        let session_id = id.to_string();
        let text = text.to_string();

        let exchange = tokio::spawn(async move {
            let _gate = handle.turn_gate.lock().await;

            let pending = handle.state.lock().await.begin_user_turn(&text)?;
            tracing::debug!(
                session_id = %session_id,
                turns = pending.messages.len(),
                "Requesting reply"
            );

            let reply = generate_reply(&*generator, &pending, call_timeout).await;

            let turn = handle.state.lock().await.finish_user_turn(pending, reply);
            handle.touch();
            Ok::<Turn, SessionError>(turn)
        });

        exchange
            .await
            .map_err(|e| SessionError::GeneratorFailure(format!("turn task failed: {e}")))?
    }

    pub async fn analyze(&self, id: &str) -> Result<AnalysisResult, SessionError> {
        let handle = self.handle(id).await?;
        let messages = handle.state.lock().await.analysis_messages()?;
        tracing::debug!(session_id = %id, turns = messages.len(), "Requesting analysis");
        request_analysis(&*self.requester, &messages, self.call_timeout).await
    }

    async fn insert(&self, id: SessionId, session: ConversationSession) {
        let handle = Arc::new(SessionHandle::new(session));
        self.sessions.write().await.insert(id.clone(), handle);
        tracing::info!(session_id = %id, "Session created");
    }

    async fn handle(&self, id: &str) -> Result<Arc<SessionHandle>, SessionError> {
        let sessions = self.sessions.read().await;
        let handle = sessions
            .get(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        handle.touch();
        Ok(handle.clone())
    }
}

/// Runs `evict_idle` on a fixed period until the registry is dropped.
pub fn spawn_idle_sweeper(registry: &Arc<SessionRegistry>, idle_ttl: Duration) -> JoinHandle<()> {
    let registry: Weak<SessionRegistry> = Arc::downgrade(registry);
    let period = idle_ttl.clamp(Duration::from_secs(1), Duration::from_secs(60));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let Some(registry) = registry.upgrade() else {
                break;
            };
            let evicted = registry.evict_idle(idle_ttl).await;
            if evicted > 0 {
                let remaining = registry.len().await;
                tracing::info!(evicted, remaining, "Idle sessions swept");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Role;
    use crate::generator::TurnGenerator;
    use crate::simulated::SimulatedClient;
    use crate::turn::Speaker;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Holds every reply until `release` is notified.
    struct GatedGenerator {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl TurnGenerator for GatedGenerator {
        async fn generate(&self, _messages: &[Turn], _stop: &[String]) -> anyhow::Result<String> {
            self.started.notify_one();
            self.release.notified().await;
            Ok("late reply".to_string())
        }
    }

    fn simulated_registry() -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(RoleScenarioCatalog::builtin().unwrap()),
            Arc::new(SimulatedClient),
            Arc::new(SimulatedClient),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let registry = simulated_registry();
        let (first, _) = registry
            .start("sales specialist", None, "product_pitch")
            .await
            .unwrap();
        let (second, _) = registry
            .start("customer", None, "negotiation")
            .await
            .unwrap();

        registry.submit_user_turn(&first, "Hello there").await.unwrap();

        assert_eq!(registry.view(&first).await.unwrap().history.len(), 3);
        assert_eq!(registry.view(&second).await.unwrap().history.len(), 1);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn failed_start_registers_nothing() {
        let registry = simulated_registry();
        let result = registry.start("manager", None, "product_pitch").await;
        assert!(matches!(result, Err(SessionError::InvalidRole(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let registry = simulated_registry();
        assert!(matches!(
            registry.switch_roles("missing").await,
            Err(SessionError::SessionNotFound(id)) if id == "missing"
        ));
        assert!(!registry.remove("missing").await);
    }

    #[tokio::test]
    async fn created_session_starts_empty() {
        let registry = simulated_registry();
        let id = registry.create().await;

        let view = registry.view(&id).await.unwrap();
        assert!(view.snapshot.is_none());
        assert!(view.history.is_empty());
        assert!(matches!(
            registry.submit_user_turn(&id, "hi").await,
            Err(SessionError::NotStarted)
        ));

        registry
            .init(&id, "customer", Some("sales specialist"), "upselling")
            .await
            .unwrap();
        assert_eq!(registry.view(&id).await.unwrap().history.len(), 1);

        assert!(registry.remove(&id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn reads_proceed_while_reply_is_pending() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(RoleScenarioCatalog::builtin().unwrap()),
            Arc::new(GatedGenerator {
                started: started.clone(),
                release: release.clone(),
            }),
            Arc::new(SimulatedClient),
            Duration::from_secs(5),
        ));
        let (id, _) = registry
            .start("sales specialist", None, "product_pitch")
            .await
            .unwrap();

        let submit = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.submit_user_turn(&id, "Hello").await })
        };
        started.notified().await;

        // The user turn is visible and the session is not locked by the pending call.
        let view = registry.view(&id).await.unwrap();
        assert_eq!(view.history.len(), 2);
        assert_eq!(view.history[1].speaker, Speaker::User);

        release.notify_one();
        let turn = submit.await.unwrap().unwrap();
        assert_eq!(turn, Turn::assistant("late reply"));
        assert_eq!(registry.view(&id).await.unwrap().history.len(), 3);
    }

    #[tokio::test]
    async fn reply_after_reset_is_not_recorded() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(RoleScenarioCatalog::builtin().unwrap()),
            Arc::new(GatedGenerator {
                started: started.clone(),
                release: release.clone(),
            }),
            Arc::new(SimulatedClient),
            Duration::from_secs(5),
        ));
        let (id, _) = registry
            .start("sales specialist", None, "product_pitch")
            .await
            .unwrap();

        let submit = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.submit_user_turn(&id, "Hello").await })
        };
        started.notified().await;

        registry.switch_roles(&id).await.unwrap();
        release.notify_one();

        let turn = submit.await.unwrap().unwrap();
        assert_eq!(turn.text, "late reply");
        let view = registry.view(&id).await.unwrap();
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.history[0].speaker, Speaker::System);
    }

    #[tokio::test]
    async fn analyze_goes_through_requester() {
        let registry = simulated_registry();
        let (id, _) = registry
            .start("customer", None, "objection_handling")
            .await
            .unwrap();

        assert!(matches!(
            registry.analyze(&id).await,
            Err(SessionError::InsufficientHistory)
        ));

        registry.submit_user_turn(&id, "I have concerns").await.unwrap();
        let result = registry.analyze(&id).await.unwrap();
        assert!(!result.strengths.is_empty());

        // Analysis does not touch the conversation.
        assert_eq!(registry.view(&id).await.unwrap().history.len(), 3);
    }

    #[tokio::test]
    async fn soft_scenario_switch_through_registry() {
        let registry = simulated_registry();
        let (id, _) = registry
            .start("customer", None, "negotiation")
            .await
            .unwrap();

        let ignored = registry.switch_scenario(&id, "bogus").await.unwrap();
        assert!(!ignored.switched);
        assert_eq!(ignored.scenario, Some(Scenario::Negotiation));

        let switched = registry.switch_scenario(&id, "upselling").await.unwrap();
        assert!(switched.switched);
        assert_eq!(switched.scenario, Some(Scenario::Upselling));
        assert_eq!(
            switched.role_guidance,
            registry
                .catalog()
                .role_prompt(Role::Customer, Scenario::Upselling)
        );
    }

    #[tokio::test]
    async fn assignment_guidance_matches_new_roles() {
        let registry = simulated_registry();
        let (id, started) = registry
            .start("sales specialist", None, "product_pitch")
            .await
            .unwrap();
        assert_eq!(
            started.role_guidance,
            registry
                .catalog()
                .role_prompt(Role::SalesSpecialist, Scenario::ProductPitch)
        );

        let swapped = registry.switch_roles(&id).await.unwrap();
        assert_eq!(swapped.snapshot.primary_role, Role::Customer);
        assert_eq!(
            swapped.role_guidance,
            registry
                .catalog()
                .role_prompt(Role::Customer, Scenario::ProductPitch)
        );
    }

    #[tokio::test]
    async fn dropped_caller_still_completes_the_exchange() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(RoleScenarioCatalog::builtin().unwrap()),
            Arc::new(GatedGenerator {
                started: started.clone(),
                release: release.clone(),
            }),
            Arc::new(SimulatedClient),
            Duration::from_secs(5),
        ));
        let (id, _) = registry
            .start("sales specialist", None, "product_pitch")
            .await
            .unwrap();

        let submit = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.submit_user_turn(&id, "Hello").await })
        };
        started.notified().await;
        submit.abort();
        assert!(submit.await.unwrap_err().is_cancelled());

        release.notify_one();
        // The exchange holds the turn gate until its reply is recorded.
        let handle = registry.handle(&id).await.unwrap();
        drop(handle.turn_gate.lock().await);

        let speakers: Vec<Speaker> = registry
            .view(&id)
            .await
            .unwrap()
            .history
            .iter()
            .map(|turn| turn.speaker)
            .collect();
        assert_eq!(
            speakers,
            vec![Speaker::System, Speaker::User, Speaker::Assistant]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_evicted() {
        let registry = simulated_registry();
        let ttl = Duration::from_secs(30 * 60);
        let (stale, _) = registry
            .start("customer", None, "negotiation")
            .await
            .unwrap();
        let (active, _) = registry
            .start("customer", None, "upselling")
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        registry.view(&active).await.unwrap();
        tokio::time::advance(Duration::from_secs(15 * 60)).await;

        assert_eq!(registry.evict_idle(ttl).await, 1);
        assert!(matches!(
            registry.view(&stale).await,
            Err(SessionError::SessionNotFound(_))
        ));
        assert!(registry.view(&active).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn session_with_reply_in_flight_is_not_evicted() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(RoleScenarioCatalog::builtin().unwrap()),
            Arc::new(GatedGenerator {
                started: started.clone(),
                release: release.clone(),
            }),
            Arc::new(SimulatedClient),
            Duration::from_secs(2 * 60 * 60),
        ));
        let (id, _) = registry
            .start("customer", None, "negotiation")
            .await
            .unwrap();

        let submit = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.submit_user_turn(&id, "Hello").await })
        };
        started.notified().await;

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        assert_eq!(registry.evict_idle(Duration::from_secs(30 * 60)).await, 0);

        release.notify_one();
        submit.await.unwrap().unwrap();
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_on_its_own() {
        let registry = Arc::new(simulated_registry());
        registry.start("customer", None, "negotiation").await.unwrap();
        let sweeper = spawn_idle_sweeper(&registry, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(registry.is_empty().await);
        sweeper.abort();
    }
}
