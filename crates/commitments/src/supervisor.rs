//! The commitment supervisor.
//!
//! Promises are recorded when a reply is produced and audited on an
//! independent tick against what the transcript shows happened afterwards:
//!
//! - a tool ran (`tool_calls` on a later assistant turn, or a `[tool:<name>]`
//!   marker in its text)
//! - a substantive reply arrived (long enough, and not itself a promise)
//!
//! Both signals resolve the commitment; a substantive reply alone resolves
//! it once the grace period has passed. Otherwise the escalation ladder
//! applies: flag at 3 minutes, fail and report at 5, silently expire at 15
//! if nothing was ever flagged.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use switchyard_config::SupervisorConfig;
use switchyard_core::{
    Commitment, CommitmentStatus, CommitmentStore, ConversationId, ConversationStore, DomainEvent,
    EventBus, Notifier, Role, SignalClassifier, StoreError, Turn,
};
use tracing::{debug, info, warn};

use crate::detector::{Promise, PromiseDetector, normalize_promise};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// What one verification tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub resolved: usize,
    pub flagged: usize,
    pub failed: usize,
    pub expired: usize,
}

/// Evidence found in the transcript after a commitment was made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Evidence {
    tool_call: bool,
    substantive: bool,
}

pub struct CommitmentSupervisor {
    commitments: Arc<dyn CommitmentStore>,
    turns: Arc<dyn ConversationStore>,
    detector: Arc<dyn SignalClassifier<Promise>>,
    operator: Arc<dyn Notifier>,
    config: SupervisorConfig,
    events: Option<Arc<EventBus>>,
}

impl CommitmentSupervisor {
    pub fn new(
        commitments: Arc<dyn CommitmentStore>,
        turns: Arc<dyn ConversationStore>,
        operator: Arc<dyn Notifier>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            commitments,
            turns,
            detector: Arc::new(PromiseDetector::new(config.recency_sentences)),
            operator,
            config,
            events: None,
        }
    }

    /// Swap the promise heuristic.
    pub fn with_detector(mut self, detector: Arc<dyn SignalClassifier<Promise>>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Record a commitment if `text` (the assistant turn stored at
    /// `turn_seq`) makes a promise that is not already pending.
    pub async fn record_output(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        turn_seq: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<Commitment>, StoreError> {
        let Some(promise) = self.detector.classify(text) else {
            return Ok(None);
        };

        let key = normalize_promise(&promise.text);
        let window = chrono::Duration::seconds(self.config.dedup_window_secs as i64);
        let duplicate = self
            .commitments
            .pending_for(conversation_id)
            .await?
            .into_iter()
            .any(|c| now - c.created_at <= window && normalize_promise(&c.promise_text) == key);
        if duplicate {
            debug!(conversation_id = %conversation_id, "Promise already pending, not recording again");
            return Ok(None);
        }

        let commitment = Commitment::new(
            conversation_id.clone(),
            promise.text,
            turn_seq,
            now,
            chrono::Duration::seconds(self.config.fail_secs as i64),
        );
        self.commitments.insert(&commitment).await?;
        info!(
            conversation_id = %conversation_id,
            commitment_id = %commitment.id,
            promise = %commitment.promise_text,
            "Commitment recorded"
        );
        self.publish(&commitment, "pending");
        Ok(Some(commitment))
    }

    /// One verification pass at the current time.
    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        self.tick_at(Utc::now()).await
    }

    /// One verification pass as of `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, StoreError> {
        let mut report = TickReport::default();

        for mut commitment in self.commitments.pending().await? {
            report.checked += 1;
            let turns = match self
                .turns
                .turns_after(&commitment.conversation_id, commitment.turn_seq_at_creation)
                .await
            {
                Ok(turns) => turns,
                Err(e) => {
                    warn!(commitment_id = %commitment.id, error = %e, "Could not read transcript, skipping");
                    continue;
                }
            };

            let evidence = self.evidence(&turns);
            let mut changed = false;
            if evidence.tool_call && !commitment.verified_tool_call {
                commitment.verified_tool_call = true;
                changed = true;
            }
            if evidence.substantive && !commitment.verified_response {
                commitment.verified_response = true;
                changed = true;
            }

            let age = commitment.age(now);
            let secs = |s: u64| chrono::Duration::seconds(s as i64);

            let settled = if commitment.verified_tool_call && commitment.verified_response {
                Some(CommitmentStatus::Resolved)
            } else if commitment.verified_response && age >= secs(self.config.grace_secs) {
                Some(CommitmentStatus::Resolved)
            } else if age >= secs(self.config.expire_secs) && commitment.follow_up_count == 0 {
                Some(CommitmentStatus::Expired)
            } else if age >= secs(self.config.fail_secs) {
                commitment.follow_up_count += 1;
                Some(CommitmentStatus::Failed)
            } else {
                if age >= secs(self.config.no_tool_flag_secs)
                    && !commitment.verified_tool_call
                    && commitment.follow_up_count == 0
                {
                    commitment.follow_up_count = 1;
                    changed = true;
                    report.flagged += 1;
                    warn!(
                        commitment_id = %commitment.id,
                        conversation_id = %commitment.conversation_id,
                        age_secs = age.num_seconds(),
                        "Commitment flagged: no tool call yet"
                    );
                    self.publish(&commitment, "flagged");
                }
                None
            };

            if let Some(status) = settled {
                if let Err(e) = commitment.transition(status) {
                    warn!(error = %e, "Commitment transition rejected");
                    continue;
                }
                changed = true;
                match status {
                    CommitmentStatus::Resolved => {
                        report.resolved += 1;
                        info!(commitment_id = %commitment.id, "Commitment resolved");
                    }
                    CommitmentStatus::Failed => {
                        report.failed += 1;
                        warn!(
                            commitment_id = %commitment.id,
                            conversation_id = %commitment.conversation_id,
                            "Commitment failed: no response yet"
                        );
                        self.report_failure(&commitment, age).await;
                    }
                    CommitmentStatus::Expired => {
                        report.expired += 1;
                        debug!(commitment_id = %commitment.id, "Commitment expired");
                    }
                    CommitmentStatus::Pending => {}
                }
                self.publish(&commitment, status.as_str());
            }

            if changed {
                self.commitments.update(&commitment).await?;
            }
        }

        if report.checked > 0 {
            debug!(?report, "Commitment tick complete");
        }
        Ok(report)
    }

    /// Tick forever at the configured cadence.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.tick_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_secs = self.config.tick_secs, "Commitment supervisor running");
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "Commitment tick failed");
            }
        }
    }

    fn evidence(&self, turns: &[Turn]) -> Evidence {
        let mut evidence = Evidence::default();
        for turn in turns.iter().filter(|t| t.role == Role::Assistant) {
            if !turn.tool_calls.is_empty() || turn.content.contains("[tool:") {
                evidence.tool_call = true;
            }
            if self.is_substantive(&turn.content) {
                evidence.substantive = true;
            }
        }
        evidence
    }

    fn is_substantive(&self, text: &str) -> bool {
        text.trim().chars().count() >= self.config.substantive_min_chars
            && self.detector.classify(text).is_none()
    }

    async fn report_failure(&self, commitment: &Commitment, age: chrono::Duration) {
        let text = format!(
            "Broken commitment in conversation {}: \"{}\" ({} min old, tool call: {}, response: no)",
            commitment.conversation_id,
            commitment.promise_text,
            age.num_minutes(),
            if commitment.verified_tool_call { "yes" } else { "no" },
        );
        match tokio::time::timeout(
            NOTIFY_TIMEOUT,
            self.operator.notify(&commitment.conversation_id, &text),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(commitment_id = %commitment.id, error = %e, "Operator notification failed"),
            Err(_) => warn!(commitment_id = %commitment.id, "Operator notification timed out"),
        }
    }

    fn publish(&self, commitment: &Commitment, status: &str) {
        if let Some(events) = &self.events {
            events.publish(DomainEvent::CommitmentChanged {
                commitment_id: commitment.id.clone(),
                conversation_id: commitment.conversation_id.to_string(),
                status: status.into(),
                timestamp: Utc::now(),
            });
        }
    }
}
