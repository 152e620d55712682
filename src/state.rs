use crate::config::AppConfig;
use crate::question_bank::QuestionBank;
use crate::rate_limit::RateLimiter;
use crate::store::QuizStore;
use crate::submission::{calculate_score, format_record, Score, SubmissionAdapter, SubmissionOutcome};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Wrong admin passwords tolerated per client per minute.
pub const ADMIN_FAILURES_PER_MINUTE: u32 = 10;

#[derive(Debug, Clone)]
pub struct ParticipantSession {
    pub id: Uuid,
    pub store: QuizStore,
    pub submission_in_flight: bool,
    pub submission: Option<SubmissionOutcome>,
    pub created_at: DateTime<Utc>,
}

impl ParticipantSession {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            store: QuizStore::new(),
            submission_in_flight: false,
            submission: None,
            created_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at)
            .to_std()
            .map(|age| age > ttl)
            .unwrap_or(false)
    }
}

pub type SharedSession = Arc<RwLock<ParticipantSession>>;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("session not found")]
    UnknownSession,
    #[error("test has not been started")]
    NotStarted,
    #[error("submission already in progress")]
    InFlight,
}

#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub score: Score,
    pub submission: SubmissionOutcome,
    /// `false` when a previously recorded outcome was returned without contacting the sheet.
    pub attempted: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<DashMap<Uuid, SharedSession>>,
    pub bank: Arc<RwLock<QuestionBank>>,
    pub submitter: SubmissionAdapter,
    pub admin_failures: RateLimiter,
}

impl AppState {
    pub fn new(config: AppConfig, bank: QuestionBank, submitter: SubmissionAdapter) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(DashMap::new()),
            bank: Arc::new(RwLock::new(bank)),
            submitter,
            admin_failures: RateLimiter::per_minute(ADMIN_FAILURES_PER_MINUTE),
        }
    }

    pub fn create_session(&self) -> (Uuid, SharedSession) {
        self.prune_expired(Utc::now());
        let id = Uuid::new_v4();
        let session = Arc::new(RwLock::new(ParticipantSession::new(id)));
        self.sessions.insert(id, session.clone());
        info!("participant session {} created", id);
        (id, session)
    }

    pub fn session(&self, id: &Uuid) -> Option<SharedSession> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Drops sessions older than the configured TTL. Sessions that are locked or still
    /// waiting on the sheet are kept until a later pass.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.session_ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| match session.try_read() {
            Ok(guard) => guard.submission_in_flight || !guard.is_expired(ttl, now),
            Err(_) => true,
        });
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!(removed, "expired participant sessions dropped");
        }
        removed
    }

    /// Marks the test completed and performs the single submission attempt for it.
    ///
    /// The attempt runs on its own task: the session lock is released while the transport
    /// runs, and a caller that goes away does not cancel it. The in-flight flag keeps a
    /// second caller out until the outcome is recorded; later calls return that outcome.
    pub async fn complete_and_submit(&self, id: &Uuid) -> Result<CompletionReport, CompletionError> {
        let entry = self.session(id).ok_or(CompletionError::UnknownSession)?;
        let record = {
            let mut guard = entry.write().await;
            if !guard.store.session.is_started() {
                return Err(CompletionError::NotStarted);
            }
            if guard.submission_in_flight {
                return Err(CompletionError::InFlight);
            }
            if let Some(outcome) = guard.submission.clone() {
                return Ok(CompletionReport {
                    score: calculate_score(&guard.store.session),
                    submission: outcome,
                    attempted: false,
                });
            }
            guard.store.complete_test_session();
            guard.submission_in_flight = true;
            format_record(&guard.store.form, &guard.store.subjects, &guard.store.session)
        };

        let submitter = self.submitter.clone();
        let task_entry = entry.clone();
        let session_id = *id;
        let attempt = tokio::spawn(async move {
            let outcome = submitter.submit(&record).await;
            let mut guard = task_entry.write().await;
            guard.submission_in_flight = false;
            guard.submission = Some(outcome.clone());
            info!(
                session = %session_id,
                score = record.score,
                total = record.total_questions,
                "test completed"
            );
            (record.score(), outcome)
        });

        match attempt.await {
            Ok((score, outcome)) => Ok(CompletionReport {
                score,
                submission: outcome,
                attempted: true,
            }),
            Err(err) => {
                warn!(session = %id, "submission task aborted: {}", err);
                let outcome = SubmissionOutcome::TransportFailed {
                    detail: err.to_string(),
                };
                let mut guard = entry.write().await;
                guard.submission_in_flight = false;
                guard.submission = Some(outcome.clone());
                Ok(CompletionReport {
                    score: calculate_score(&guard.store.session),
                    submission: outcome,
                    attempted: true,
                })
            }
        }
    }
}
