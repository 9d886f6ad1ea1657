use crate::analysis::AnalysisResult;
use crate::catalog::{Role, RoleScenarioCatalog, Scenario};
use crate::directive::{ANALYSIS_DIRECTIVE, build_directive, stop_sequences};
use crate::generator::{AnalysisRequester, TurnGenerator};
use crate::turn::Turn;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Returned by `role_guidance` before the session has been initialised.
pub const NOT_STARTED_GUIDANCE: &str = "Please start a conversation first.";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid role: '{0}'")]
    InvalidRole(String),
    #[error("Invalid scenario: '{0}'")]
    InvalidScenario(String),
    #[error("Both parties cannot play the '{0}' role")]
    SameRole(Role),
    #[error("A counterpart role must be given for '{0}'")]
    CounterpartRequired(Role),
    #[error("Please start a conversation first.")]
    NotStarted,
    #[error("Not enough conversation history to analyze.")]
    InsufficientHistory,
    // The text of this variant becomes the assistant turn, so it doubles as the
    // marker clients look for.
    #[error("Error: Unable to get AI response. Details: {0}")]
    GeneratorFailure(String),
    #[error("Unable to parse analysis response: {0}")]
    MalformedAnalysis(String),
    #[error("Unable to analyze conversation. Details: {0}")]
    AnalysisUnavailable(String),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

/// The current role assignment and scenario of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub primary_role: Role,
    pub counterpart_role: Role,
    pub scenario: Scenario,
}

/// A user turn that has been recorded and is waiting for the model's reply.
#[derive(Debug)]
pub struct PendingTurn {
    epoch: u64,
    pub messages: Vec<Turn>,
    pub stop: Vec<String>,
}

/// Conversation state for one trainee.
///
/// Every change of roles or scenario goes through `rebuild_directive`, which replaces
/// the whole history with a single fresh system turn. `epoch` counts those rebuilds so
/// a reply computed against an older history is never merged into a newer one.
#[derive(Debug)]
pub struct ConversationSession {
    catalog: Arc<RoleScenarioCatalog>,
    assignment: Option<SessionSnapshot>,
    history: Vec<Turn>,
    epoch: u64,
}

impl ConversationSession {
    pub fn new(catalog: Arc<RoleScenarioCatalog>) -> Self {
        Self {
            catalog,
            assignment: None,
            history: Vec::new(),
            epoch: 0,
        }
    }

    /// Assigns roles and scenario and seeds the history with the directive.
    ///
    /// A missing or blank `counterpart_role` defaults to the other role. All input is
    /// validated before anything is changed.
    pub fn init(
        &mut self,
        primary_role: &str,
        counterpart_role: Option<&str>,
        scenario: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        let primary = Role::parse(primary_role)
            .ok_or_else(|| SessionError::InvalidRole(primary_role.to_string()))?;

        let counterpart = match counterpart_role.filter(|s| !s.trim().is_empty()) {
            Some(name) => {
                Role::parse(name).ok_or_else(|| SessionError::InvalidRole(name.to_string()))?
            }
            None => self
                .catalog
                .default_counterpart(primary)
                .ok_or(SessionError::CounterpartRequired(primary))?,
        };
        if primary == counterpart {
            return Err(SessionError::SameRole(primary));
        }

        let scenario = Scenario::parse(scenario)
            .ok_or_else(|| SessionError::InvalidScenario(scenario.to_string()))?;

        let snapshot = SessionSnapshot {
            primary_role: primary,
            counterpart_role: counterpart,
            scenario,
        };
        self.rebuild_directive(snapshot);
        tracing::info!(
            primary = %primary,
            counterpart = %counterpart,
            scenario = %scenario,
            "Conversation initialised"
        );
        Ok(snapshot)
    }

    /// Swaps the trainee's and the model's roles. Discards the conversation so far.
    pub fn switch_roles(&mut self) -> Result<SessionSnapshot, SessionError> {
        let current = self.assignment.ok_or(SessionError::NotStarted)?;
        let swapped = SessionSnapshot {
            primary_role: current.counterpart_role,
            counterpart_role: current.primary_role,
            scenario: current.scenario,
        };
        self.rebuild_directive(swapped);
        tracing::info!(primary = %swapped.primary_role, "Roles switched");
        Ok(swapped)
    }

    /// Moves to another scenario. Returns false, changing nothing, when the scenario is
    /// unknown or the session has not been started.
    pub fn switch_scenario(&mut self, new_scenario: &str) -> bool {
        let (Some(current), Some(scenario)) = (self.assignment, Scenario::parse(new_scenario))
        else {
            tracing::debug!("Ignoring scenario switch to '{}'", new_scenario);
            return false;
        };
        self.rebuild_directive(SessionSnapshot {
            scenario,
            ..current
        });
        tracing::info!(scenario = %scenario, "Scenario switched");
        true
    }

    /// Starts the conversation over with the same roles and scenario.
    pub fn reset_conversation(&mut self) -> Result<(), SessionError> {
        let current = self.assignment.ok_or(SessionError::NotStarted)?;
        self.rebuild_directive(current);
        tracing::info!("Conversation reset");
        Ok(())
    }

    /// Guidance for the trainee's own role in the current scenario.
    pub fn role_guidance(&self) -> String {
        match self.assignment {
            Some(a) => self
                .catalog
                .role_prompt(a.primary_role, a.scenario)
                .to_string(),
            None => NOT_STARTED_GUIDANCE.to_string(),
        }
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.assignment
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn directive(&self) -> Option<&str> {
        self.history.first().map(|turn| turn.text.as_str())
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Records the user's turn and returns what must be sent to the turn generator.
    pub fn begin_user_turn(&mut self, text: &str) -> Result<PendingTurn, SessionError> {
        let current = self.assignment.ok_or(SessionError::NotStarted)?;
        self.history.push(Turn::user(text));
        Ok(PendingTurn {
            epoch: self.epoch,
            messages: self.history.clone(),
            stop: stop_sequences(current.primary_role, current.counterpart_role),
        })
    }

    /// Records the model's reply, or the error text if the call failed.
    ///
    /// If the directive was rebuilt while the call was in flight, the reply is
    /// returned but not added to the new history.
    pub fn finish_user_turn(
        &mut self,
        pending: PendingTurn,
        reply: Result<String, SessionError>,
    ) -> Turn {
        let turn = match reply {
            Ok(text) => Turn::assistant(text),
            Err(e) => {
                tracing::warn!("Turn generation failed: {}", e);
                Turn::assistant(e.to_string())
            }
        };

        if pending.epoch == self.epoch {
            self.history.push(turn.clone());
        } else {
            tracing::info!(
                "Conversation was reset while awaiting a reply; the reply was not recorded"
            );
        }
        turn
    }

    /// The messages for an analysis request: the analysis directive followed by every
    /// turn after the role directive.
    pub fn analysis_messages(&self) -> Result<Vec<Turn>, SessionError> {
        if self.history.len() <= 1 {
            return Err(SessionError::InsufficientHistory);
        }
        let mut messages = Vec::with_capacity(self.history.len());
        messages.push(Turn::system(ANALYSIS_DIRECTIVE));
        messages.extend_from_slice(&self.history[1..]);
        Ok(messages)
    }

    /// Sends the user's text to the generator and records both turns.
    ///
    /// Generator failures are not returned: they are recorded as an assistant turn
    /// carrying the error text.
    pub async fn submit_user_turn<G: TurnGenerator + Sync + ?Sized>(
        &mut self,
        generator: &G,
        text: &str,
        deadline: Duration,
    ) -> Result<Turn, SessionError> {
        let pending = self.begin_user_turn(text)?;
        let reply = generate_reply(generator, &pending, deadline).await;
        Ok(self.finish_user_turn(pending, reply))
    }

    pub async fn analyze<A: AnalysisRequester + Sync + ?Sized>(
        &self,
        requester: &A,
        deadline: Duration,
    ) -> Result<AnalysisResult, SessionError> {
        let messages = self.analysis_messages()?;
        request_analysis(requester, &messages, deadline).await
    }

    fn rebuild_directive(&mut self, assignment: SessionSnapshot) {
        let directive = build_directive(
            &self.catalog,
            assignment.primary_role,
            assignment.counterpart_role,
            assignment.scenario,
        );
        self.assignment = Some(assignment);
        self.history = vec![Turn::system(directive)];
        self.epoch += 1;
    }
}

pub(crate) async fn generate_reply<G: TurnGenerator + Sync + ?Sized>(
    generator: &G,
    pending: &PendingTurn,
    deadline: Duration,
) -> Result<String, SessionError> {
    match tokio::time::timeout(deadline, generator.generate(&pending.messages, &pending.stop))
        .await
    {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(SessionError::GeneratorFailure(format!("{e:#}"))),
        Err(_) => Err(SessionError::GeneratorFailure(format!(
            "no reply within {}s",
            deadline.as_secs_f32()
        ))),
    }
}

pub(crate) async fn request_analysis<A: AnalysisRequester + Sync + ?Sized>(
    requester: &A,
    messages: &[Turn],
    deadline: Duration,
) -> Result<AnalysisResult, SessionError> {
    let raw = match tokio::time::timeout(deadline, requester.request_analysis(messages)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => return Err(SessionError::AnalysisUnavailable(format!("{e:#}"))),
        Err(_) => {
            return Err(SessionError::AnalysisUnavailable(format!(
                "no reply within {}s",
                deadline.as_secs_f32()
            )));
        }
    };

    AnalysisResult::parse(&raw).map_err(|e| {
        tracing::warn!("Analysis response did not match the schema: {}", raw);
        SessionError::MalformedAnalysis(e.to_string())
    })
}
