use crate::models::FormData;
use crate::store::{SelectedSubjects, TestSession};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Value shipped in the sample `.env` of the original deployment; treated as unset.
pub const WEBHOOK_PLACEHOLDER: &str = "your_google_apps_script_url_here";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Score {
    pub score: usize,
    pub total: usize,
    pub percentage: u32,
}

/// A question counts only when its stored answer equals the correct index.
pub fn calculate_score(session: &TestSession) -> Score {
    let score = session
        .questions
        .iter()
        .filter(|q| session.answers.get(&q.id) == Some(&q.correct))
        .count();
    let total = session.questions.len();
    let percentage = if total == 0 {
        0
    } else {
        ((score as f64 / total as f64) * 100.0).round() as u32
    };
    Score {
        score,
        total,
        percentage,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionRecord {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub region: String,
    pub district: String,
    pub school_number: String,
    pub q1: String,
    pub q2: String,
    pub q3: String,
    pub q4: String,
    pub q5: String,
    pub q6: String,
    pub english_level: String,
    pub russian_level: String,
    #[serde(rename = "selectedSubjects")]
    pub selected_subjects: Vec<String>,
    #[serde(rename = "testAnswers")]
    pub test_answers: BTreeMap<String, usize>,
    #[serde(rename = "testCompleted")]
    pub test_completed: bool,
    pub score: usize,
    #[serde(rename = "totalQuestions")]
    pub total_questions: usize,
    #[serde(rename = "scorePercentage")]
    pub score_percentage: u32,
}

impl SubmissionRecord {
    pub fn score(&self) -> Score {
        Score {
            score: self.score,
            total: self.total_questions,
            percentage: self.score_percentage,
        }
    }
}

pub fn format_record(form: &FormData, subjects: &SelectedSubjects, session: &TestSession) -> SubmissionRecord {
    let score = calculate_score(session);
    SubmissionRecord {
        first_name: form.first_name.clone(),
        last_name: form.last_name.clone(),
        phone: form.phone.clone(),
        region: form.region.clone(),
        district: form.district.clone(),
        school_number: form.school_number.clone(),
        q1: form.q1.clone(),
        q2: form.q2.clone(),
        q3: form.q3.clone(),
        q4: form.q4.clone(),
        q5: form.q5.clone(),
        q6: form.q6.clone(),
        english_level: form.english_level.map(|l| l.as_str().to_string()).unwrap_or_default(),
        russian_level: form.russian_level.map(|l| l.as_str().to_string()).unwrap_or_default(),
        selected_subjects: subjects.as_slice().to_vec(),
        test_answers: session.answers.clone(),
        test_completed: session.completed,
        score: score.score,
        total_questions: score.total,
        score_percentage: score.percentage,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("submission endpoint is not configured")]
    ConfigMissing,
    #[error("failed to submit data: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Submitted,
    ConfigMissing,
    TransportFailed { detail: String },
}

impl From<SubmissionError> for SubmissionOutcome {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::ConfigMissing => SubmissionOutcome::ConfigMissing,
            SubmissionError::Transport(detail) => SubmissionOutcome::TransportFailed { detail },
        }
    }
}

/// Delivers one JSON body. The response is never inspected.
pub trait SheetTransport: Send + Sync {
    fn post_json(&self, url: &str, body: serde_json::Value) -> BoxFuture<'static, anyhow::Result<()>>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl SheetTransport for ReqwestTransport {
    fn post_json(&self, url: &str, body: serde_json::Value) -> BoxFuture<'static, anyhow::Result<()>> {
        let request = self.client.post(url).json(&body);
        Box::pin(async move {
            request.send().await?;
            Ok(())
        })
    }
}

#[derive(Clone)]
pub struct SubmissionAdapter {
    endpoint: Option<String>,
    transport: Arc<dyn SheetTransport>,
}

impl SubmissionAdapter {
    pub fn new(endpoint: Option<String>, transport: Arc<dyn SheetTransport>) -> Self {
        Self { endpoint, transport }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint().is_ok()
    }

    fn endpoint(&self) -> Result<&str, SubmissionError> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty() && *url != WEBHOOK_PLACEHOLDER)
            .ok_or(SubmissionError::ConfigMissing)
    }

    /// One attempt, no retry. Failures are reported, never raised.
    pub async fn submit(&self, record: &SubmissionRecord) -> SubmissionOutcome {
        let url = match self.endpoint() {
            Ok(url) => url.to_string(),
            Err(err) => {
                warn!("skipping submission: {}", err);
                return err.into();
            }
        };
        let body = match serde_json::to_value(record) {
            Ok(body) => body,
            Err(err) => return SubmissionError::Transport(err.to_string()).into(),
        };
        match self.transport.post_json(&url, body).await {
            Ok(()) => {
                info!(
                    score = record.score,
                    total = record.total_questions,
                    "submission delivered"
                );
                SubmissionOutcome::Submitted
            }
            Err(err) => {
                warn!("submission transport failed: {}", err);
                SubmissionError::Transport(err.to_string()).into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FormField, LanguageLevel};
    use crate::store::QuestionInstance;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        calls: AtomicUsize,
        bodies: Mutex<Vec<(String, serde_json::Value)>>,
        fail: bool,
    }

    impl SheetTransport for RecordingTransport {
        fn post_json(&self, url: &str, body: serde_json::Value) -> BoxFuture<'static, anyhow::Result<()>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().unwrap().push((url.to_string(), body));
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    anyhow::bail!("connection refused");
                }
                Ok(())
            })
        }
    }

    fn session(subjects: &[&str], per_subject: usize) -> TestSession {
        let mut questions = Vec::new();
        for s in subjects {
            for i in 0..per_subject {
                questions.push(QuestionInstance {
                    id: format!("{}_{}", s, i + 1),
                    subject: s.to_string(),
                    prompt: "p".into(),
                    options: ["a".into(), "b".into(), "c".into(), "d".into()],
                    correct: i % 4,
                    placeholder: false,
                });
            }
        }
        TestSession {
            subject: Some("combined".into()),
            questions,
            ..TestSession::default()
        }
    }

    fn selected(extra: &[&str]) -> SelectedSubjects {
        let mut s = SelectedSubjects::default();
        for id in extra {
            s.toggle(id);
        }
        s
    }

    #[test]
    fn score_counts_only_exact_matches() {
        let mut s = session(&["russian", "english", "math"], 10);
        let ids: Vec<(String, usize)> = s.questions.iter().map(|q| (q.id.clone(), q.correct)).collect();
        for (n, (id, correct)) in ids.into_iter().enumerate() {
            if n < 20 {
                s.answers.insert(id, correct);
            } else if n < 25 {
                s.answers.insert(id, (correct + 1) % 4);
            }
        }
        let score = calculate_score(&s);
        assert_eq!(score, Score { score: 20, total: 30, percentage: 67 });
        assert_eq!(calculate_score(&s), score);
    }

    #[test]
    fn empty_session_scores_zero_percent() {
        assert_eq!(calculate_score(&TestSession::default()), Score { score: 0, total: 0, percentage: 0 });
    }

    #[test]
    fn format_record_is_pure_and_flat() {
        let mut form = FormData::default();
        form.set(FormField::FirstName, "Ali".into());
        form.set(FormField::RussianLevel, "medium".into());
        let mut s = session(&["russian"], 2);
        s.answers.insert("russian_2".into(), 1);
        s.completed = true;
        let subjects = selected(&["math", "cs"]);

        let a = serde_json::to_vec(&format_record(&form, &subjects, &s)).unwrap();
        let b = serde_json::to_vec(&format_record(&form, &subjects, &s)).unwrap();
        assert_eq!(a, b);

        let value: serde_json::Value = serde_json::from_slice(&a).unwrap();
        assert_eq!(value["first_name"], "Ali");
        assert_eq!(value["russian_level"], "medium");
        assert_eq!(value["english_level"], "");
        assert_eq!(value["selectedSubjects"], serde_json::json!(["russian", "math", "cs"]));
        assert_eq!(value["testAnswers"]["russian_2"], 1);
        assert_eq!(value["testCompleted"], true);
        assert_eq!(value["score"], 1);
        assert_eq!(value["totalQuestions"], 2);
        assert_eq!(value["scorePercentage"], 50);
        assert_eq!(LanguageLevel::parse("medium"), form.russian_level);
    }

    #[tokio::test]
    async fn unset_or_placeholder_endpoint_skips_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let record = format_record(&FormData::default(), &selected(&[]), &TestSession::default());

        for endpoint in [None, Some("  ".to_string()), Some(WEBHOOK_PLACEHOLDER.to_string())] {
            let adapter = SubmissionAdapter::new(endpoint, transport.clone());
            assert!(!adapter.is_configured());
            assert_eq!(adapter.submit(&record).await, SubmissionOutcome::ConfigMissing);
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delivered_body_matches_record() {
        let transport = Arc::new(RecordingTransport::default());
        let adapter = SubmissionAdapter::new(Some("http://sheet.local/exec".into()), transport.clone());
        let record = format_record(&FormData::default(), &selected(&["math"]), &session(&["russian"], 1));

        assert_eq!(adapter.submit(&record).await, SubmissionOutcome::Submitted);
        let bodies = transport.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].0, "http://sheet.local/exec");
        assert_eq!(bodies[0].1, serde_json::to_value(&record).unwrap());
    }

    #[tokio::test]
    async fn transport_error_becomes_outcome() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        });
        let adapter = SubmissionAdapter::new(Some("http://sheet.local/exec".into()), transport.clone());
        let record = format_record(&FormData::default(), &selected(&[]), &TestSession::default());

        match adapter.submit(&record).await {
            SubmissionOutcome::TransportFailed { detail } => assert!(detail.contains("connection refused")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let v = serde_json::to_value(SubmissionOutcome::TransportFailed { detail: "x".into() }).unwrap();
        assert_eq!(v, serde_json::json!({"status": "transport_failed", "detail": "x"}));
        let v = serde_json::to_value(SubmissionOutcome::ConfigMissing).unwrap();
        assert_eq!(v, serde_json::json!({"status": "config_missing"}));
    }
}
