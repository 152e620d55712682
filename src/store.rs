//! Per-participant state machine: registration, subject selection, test taking.
//!
//! Every action is a synchronous mutation on [`QuizStore`]; callers own the value and
//! decide how it is shared. Nothing here performs I/O.

use crate::models::{
    FormData, FormField, ValidationIssue, MANDATORY_SUBJECT, MAX_SUBJECTS, OPTION_COUNT, REQUIRED_FIELDS,
};
use crate::question_bank::{QuestionBank, QuestionSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const COMBINED_TAG: &str = "combined";

/// Selection order is kept; the mandatory subject is always first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SelectedSubjects(Vec<String>);

impl Default for SelectedSubjects {
    fn default() -> Self {
        Self(vec![MANDATORY_SUBJECT.to_string()])
    }
}

impl SelectedSubjects {
    pub fn toggle(&mut self, subject: &str) {
        if subject == MANDATORY_SUBJECT {
            return;
        }
        if let Some(pos) = self.0.iter().position(|s| s == subject) {
            self.0.remove(pos);
        } else if self.0.len() < MAX_SUBJECTS {
            self.0.push(subject.to_string());
        }
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.0.iter().any(|s| s == subject)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.0.len() == MAX_SUBJECTS
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionInstance {
    pub id: String,
    pub subject: String,
    pub prompt: String,
    pub options: [String; OPTION_COUNT],
    pub correct: usize,
    pub placeholder: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestSession {
    pub subject: Option<String>,
    pub questions: Vec<QuestionInstance>,
    pub answers: BTreeMap<String, usize>,
    pub completed: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl TestSession {
    pub fn is_started(&self) -> bool {
        !self.questions.is_empty()
    }

    pub fn answered_count(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| self.answers.contains_key(&q.id))
            .count()
    }

    pub fn has_question(&self, id: &str) -> bool {
        self.questions.iter().any(|q| q.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Registration,
    Subjects,
    Test,
    Completed,
}

#[derive(Debug, Clone, Default)]
pub struct QuizStore {
    pub form: FormData,
    pub subjects: SelectedSubjects,
    pub session: TestSession,
    pub registered: bool,
}

impl QuizStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blanking a required field before the test starts closes the registration gate again.
    pub fn set_form_field(&mut self, field: FormField, value: impl Into<String>) {
        let value = value.into();
        if self.registered
            && !self.session.is_started()
            && REQUIRED_FIELDS.contains(&field)
            && value.trim().is_empty()
        {
            self.registered = false;
        }
        self.form.set(field, value);
    }

    /// Fails on the first blank required field; on success the registration gate opens.
    pub fn validate_registration(&mut self) -> Result<(), ValidationIssue> {
        if let Some(field) = self.form.first_missing_field() {
            return Err(ValidationIssue::new(
                field.as_str(),
                format!("Iltimos, {} maydonini to'ldiring", field.as_str()),
            ));
        }
        self.registered = true;
        Ok(())
    }

    pub fn toggle_subject(&mut self, subject: &str) {
        self.subjects.toggle(subject);
    }

    /// Rebuilds the session from the current selection. Previous answers are dropped.
    pub fn start_test_session(&mut self, bank: &QuestionBank, now: DateTime<Utc>) {
        let mut questions = Vec::new();
        for subject in self.subjects.as_slice() {
            let resolved = bank.resolve_questions(subject);
            let placeholder = resolved.source == QuestionSource::Placeholder;
            for (i, q) in resolved.questions.into_iter().enumerate() {
                questions.push(QuestionInstance {
                    id: format!("{}_{}", subject, i + 1),
                    subject: subject.clone(),
                    prompt: q.prompt,
                    options: q.options,
                    correct: q.correct,
                    placeholder,
                });
            }
        }
        self.session = TestSession {
            subject: Some(COMBINED_TAG.to_string()),
            questions,
            answers: BTreeMap::new(),
            completed: false,
            started_at: Some(now),
        };
    }

    pub fn set_answer(&mut self, question_id: impl Into<String>, option_index: usize) {
        self.session.answers.insert(question_id.into(), option_index);
    }

    pub fn complete_test_session(&mut self) {
        self.session.completed = true;
    }

    /// Cosmetic countdown; reaching zero has no effect on the session.
    pub fn remaining_seconds(&self, limit: Duration, now: DateTime<Utc>) -> u64 {
        let Some(started) = self.session.started_at else {
            return limit.as_secs();
        };
        let elapsed = (now - started).num_seconds().max(0) as u64;
        limit.as_secs().saturating_sub(elapsed)
    }

    pub fn stage(&self) -> Stage {
        if self.session.completed {
            Stage::Completed
        } else if !self.registered {
            Stage::Registration
        } else if self.subjects.is_complete() && self.session.is_started() {
            Stage::Test
        } else {
            Stage::Subjects
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Question, SUBJECTS};
    use crate::question_bank::{BankMap, InMemoryQuestionStore};
    use std::sync::Arc;

    fn bank_with(subjects: &[&str], per_subject: usize) -> QuestionBank {
        let mut map = BankMap::new();
        for s in subjects {
            let list = (0..per_subject)
                .map(|i| Question {
                    prompt: format!("{s} {i}"),
                    options: ["a".into(), "b".into(), "c".into(), "d".into()],
                    correct: i % 4,
                })
                .collect();
            map.insert(s.to_string(), list);
        }
        QuestionBank::with_defaults(map, Arc::new(InMemoryQuestionStore::default()))
    }

    fn registered_store() -> QuizStore {
        let mut store = QuizStore::new();
        for field in crate::models::REQUIRED_FIELDS {
            store.set_form_field(field, "x");
        }
        store.validate_registration().unwrap();
        store
    }

    #[test]
    fn toggle_sequences_keep_mandatory_and_cap() {
        let mut store = QuizStore::new();
        let ids: Vec<&str> = SUBJECTS.iter().map(|s| s.id).collect();
        // deterministic pseudo-random walk over the catalog
        let mut seed: usize = 7;
        for _ in 0..500 {
            seed = (seed * 31 + 11) % 1009;
            store.toggle_subject(ids[seed % ids.len()]);
            assert!(store.subjects.contains(MANDATORY_SUBJECT));
            assert!(store.subjects.len() <= MAX_SUBJECTS);
            assert!(!store.subjects.is_empty());
        }
    }

    #[test]
    fn toggling_mandatory_is_noop() {
        let mut store = QuizStore::new();
        store.toggle_subject("math");
        let before = store.subjects.clone();
        store.toggle_subject(MANDATORY_SUBJECT);
        assert_eq!(store.subjects, before);
    }

    #[test]
    fn fourth_subject_is_ignored_and_removal_frees_slot() {
        let mut store = QuizStore::new();
        store.toggle_subject("math");
        store.toggle_subject("cs");
        store.toggle_subject("physics");
        assert_eq!(store.subjects.as_slice(), ["russian", "math", "cs"]);
        store.toggle_subject("math");
        store.toggle_subject("physics");
        assert_eq!(store.subjects.as_slice(), ["russian", "cs", "physics"]);
    }

    #[test]
    fn blanking_required_field_closes_gate_until_test_starts() {
        let mut store = registered_store();
        store.set_form_field(FormField::Phone, "");
        assert!(store.registered);

        store.set_form_field(FormField::Region, "  ");
        assert!(!store.registered);
        assert_eq!(store.stage(), Stage::Registration);
        assert_eq!(store.validate_registration().unwrap_err().field, "region");

        store.set_form_field(FormField::Region, "Toshkent");
        store.validate_registration().unwrap();
        store.toggle_subject("math");
        store.toggle_subject("cs");
        store.start_test_session(&bank_with(&["russian", "math", "cs"], 1), Utc::now());
        store.set_form_field(FormField::Region, "");
        assert!(store.registered);
        assert_eq!(store.stage(), Stage::Test);
    }

    #[test]
    fn registration_names_first_empty_field() {
        let mut store = QuizStore::new();
        store.set_form_field(FormField::FirstName, "Ali");
        let issue = store.validate_registration().unwrap_err();
        assert_eq!(issue.field, "last_name");
        assert!(issue.issue.contains("last_name"));
        assert!(!store.registered);
        assert_eq!(store.stage(), Stage::Registration);
    }

    #[test]
    fn whitespace_only_fields_fail_and_optional_fields_do_not_matter() {
        let mut store = QuizStore::new();
        for field in crate::models::REQUIRED_FIELDS {
            store.set_form_field(field, "ok");
        }
        store.set_form_field(FormField::Q4, "   ");
        assert_eq!(store.validate_registration().unwrap_err().field, "q4");
        store.set_form_field(FormField::Q4, "ok");
        assert!(store.validate_registration().is_ok());
        assert!(store.form.phone.is_empty());
        assert_eq!(store.stage(), Stage::Subjects);
    }

    #[test]
    fn start_builds_unique_instances_in_selection_order() {
        let bank = bank_with(&["russian", "math", "cs"], 10);
        let mut store = registered_store();
        store.toggle_subject("math");
        store.toggle_subject("cs");
        store.start_test_session(&bank, Utc::now());

        let session = &store.session;
        assert_eq!(session.questions.len(), 30);
        assert!(session.answers.is_empty());
        assert!(!session.completed);
        assert_eq!(session.subject.as_deref(), Some(COMBINED_TAG));
        let ids: std::collections::HashSet<_> = session.questions.iter().map(|q| q.id.clone()).collect();
        assert_eq!(ids.len(), 30);
        assert_eq!(session.questions[0].id, "russian_1");
        assert_eq!(session.questions[10].id, "math_1");
        assert_eq!(session.questions[29].id, "cs_10");
        assert_eq!(store.stage(), Stage::Test);
    }

    #[test]
    fn start_uses_all_authored_questions_and_placeholders_when_missing() {
        let bank = bank_with(&["russian"], 14);
        let mut store = registered_store();
        store.toggle_subject("physics");
        store.start_test_session(&bank, Utc::now());
        assert_eq!(store.session.questions.len(), 24);
        assert!(store.session.questions[..14].iter().all(|q| !q.placeholder));
        assert!(store.session.questions[14..].iter().all(|q| q.placeholder));
    }

    #[test]
    fn answers_upsert_and_restart_clears_them() {
        let bank = bank_with(&["russian"], 2);
        let mut store = registered_store();
        store.start_test_session(&bank, Utc::now());
        store.set_answer("russian_1", 2);
        store.set_answer("russian_1", 3);
        store.set_answer("russian_2", 9);
        assert_eq!(store.session.answers.len(), 2);
        assert_eq!(store.session.answers["russian_1"], 3);
        assert_eq!(store.session.answered_count(), 2);

        store.complete_test_session();
        assert!(store.session.completed);
        assert_eq!(store.stage(), Stage::Completed);

        store.start_test_session(&bank, Utc::now());
        assert!(store.session.answers.is_empty());
        assert!(!store.session.completed);
    }

    #[test]
    fn navigating_back_keeps_answers() {
        let bank = bank_with(&["russian", "math", "cs"], 3);
        let mut store = registered_store();
        store.toggle_subject("math");
        store.toggle_subject("cs");
        store.start_test_session(&bank, Utc::now());
        store.set_answer("math_1", 0);
        store.toggle_subject("cs");
        store.toggle_subject("cs");
        assert_eq!(store.session.answers.get("math_1"), Some(&0));
    }

    #[test]
    fn countdown_saturates_at_zero() {
        let bank = bank_with(&["russian"], 1);
        let mut store = registered_store();
        let limit = Duration::from_secs(90 * 60);
        assert_eq!(store.remaining_seconds(limit, Utc::now()), 5400);

        let start = Utc::now();
        store.start_test_session(&bank, start);
        let later = start + chrono::Duration::seconds(61);
        assert_eq!(store.remaining_seconds(limit, later), 5400 - 61);
        let much_later = start + chrono::Duration::hours(3);
        assert_eq!(store.remaining_seconds(limit, much_later), 0);
        assert!(!store.session.completed);
    }
}
