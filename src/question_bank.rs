use crate::models::{validate_question, Question, ValidationIssue};
use anyhow::anyhow;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub type BankMap = BTreeMap<String, Vec<Question>>;

const DEFAULT_BANK_RAW: &str = include_str!("../data/default_questions.json");
const BANK_SCHEMA_RAW: &str = include_str!("../contracts/question_bank.schema.json");
pub const PLACEHOLDER_COUNT: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error("question form is incomplete")]
    Invalid(Vec<ValidationIssue>),
    #[error("question {index} not found for subject {subject}")]
    NotFound { subject: String, index: usize },
    #[error("failed to persist question bank: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Backing storage for the edited bank. The whole map is written on every save.
pub trait QuestionStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<BankMap>>;

    fn save(&self, bank: &BankMap) -> BoxFuture<'static, anyhow::Result<()>>;
}

#[derive(Clone, Default)]
pub struct InMemoryQuestionStore {
    blob: Arc<Mutex<Option<String>>>,
}

impl InMemoryQuestionStore {
    pub fn with_bank(bank: &BankMap) -> anyhow::Result<Self> {
        let store = Self::default();
        *store.lock() = Some(serde_json::to_string(bank)?);
        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        match self.blob.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl QuestionStore for InMemoryQuestionStore {
    fn load(&self) -> anyhow::Result<Option<BankMap>> {
        match self.lock().as_deref() {
            Some(raw) => Ok(Some(decode_bank(raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, bank: &BankMap) -> BoxFuture<'static, anyhow::Result<()>> {
        let serialized = serde_json::to_string(bank);
        let blob = self.blob.clone();
        Box::pin(async move {
            let serialized = serialized?;
            match blob.lock() {
                Ok(mut guard) => *guard = Some(serialized),
                Err(poisoned) => *poisoned.into_inner() = Some(serialized),
            }
            Ok(())
        })
    }
}

#[derive(Clone)]
pub struct FileQuestionStore {
    path: PathBuf,
}

impl FileQuestionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QuestionStore for FileQuestionStore {
    fn load(&self) -> anyhow::Result<Option<BankMap>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(Some(decode_bank(&raw)?))
    }

    fn save(&self, bank: &BankMap) -> BoxFuture<'static, anyhow::Result<()>> {
        let serialized = serde_json::to_vec_pretty(bank);
        let path = self.path.clone();
        Box::pin(async move {
            let serialized = serialized?;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            tokio::fs::write(&path, serialized).await?;
            Ok(())
        })
    }
}

/// Parses a persisted bank after checking it against the bundled schema.
pub fn decode_bank(raw: &str) -> anyhow::Result<BankMap> {
    let value: Value = serde_json::from_str(raw)?;
    let schema: Value = serde_json::from_str(BANK_SCHEMA_RAW)?;
    let validator = jsonschema::draft202012::new(&schema)
        .map_err(|e| anyhow!("question bank schema is invalid: {}", e))?;
    let problems: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect();
    if !problems.is_empty() {
        anyhow::bail!("question bank does not match schema: {}", problems.join("; "));
    }
    Ok(serde_json::from_value(value)?)
}

pub fn default_bank() -> BankMap {
    match serde_json::from_str(DEFAULT_BANK_RAW) {
        Ok(bank) => bank,
        Err(err) => {
            warn!("built-in question bank is unreadable: {}", err);
            BankMap::new()
        }
    }
}

/// Filler for subjects without authored content. Correct answers cycle A, B, C, D.
pub fn placeholder_questions(subject: &str) -> Vec<Question> {
    let mut chars = subject.chars();
    let title = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };
    (1..=PLACEHOLDER_COUNT)
        .map(|i| Question {
            prompt: format!("{} fanidan savol {}", title, i),
            options: [
                "Variant A".to_string(),
                "Variant B".to_string(),
                "Variant C".to_string(),
                "Variant D".to_string(),
            ],
            correct: (i - 1) % 4,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionSource {
    Override,
    Default,
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct ResolvedQuestions {
    pub source: QuestionSource,
    pub questions: Vec<Question>,
}

pub struct QuestionBank {
    defaults: BankMap,
    overrides: Option<BankMap>,
    store: Arc<dyn QuestionStore>,
}

impl QuestionBank {
    pub fn open(store: Arc<dyn QuestionStore>) -> Self {
        Self::with_defaults(default_bank(), store)
    }

    pub fn with_defaults(defaults: BankMap, store: Arc<dyn QuestionStore>) -> Self {
        let overrides = match store.load() {
            Ok(Some(bank)) => {
                info!("loaded edited question bank with {} subjects", bank.len());
                Some(bank)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("failed to read edited question bank, using defaults: {}", err);
                None
            }
        };
        Self {
            defaults,
            overrides,
            store,
        }
    }

    pub fn has_overrides(&self) -> bool {
        self.overrides.is_some()
    }

    pub fn resolve_questions(&self, subject: &str) -> ResolvedQuestions {
        if let Some(questions) = non_empty(self.overrides.as_ref(), subject) {
            return ResolvedQuestions {
                source: QuestionSource::Override,
                questions: questions.clone(),
            };
        }
        if let Some(questions) = non_empty(Some(&self.defaults), subject) {
            return ResolvedQuestions {
                source: QuestionSource::Default,
                questions: questions.clone(),
            };
        }
        warn!("no authored questions for subject {}, using placeholders", subject);
        ResolvedQuestions {
            source: QuestionSource::Placeholder,
            questions: placeholder_questions(subject),
        }
    }

    /// Questions as the admin surface sees them: the edited bank if one was ever saved, else defaults.
    pub fn list(&self, subject: &str) -> Vec<Question> {
        self.working()
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn add_question(&mut self, subject: &str, question: Question) -> Result<usize, BankError> {
        validate_question(&question).map_err(BankError::Invalid)?;
        let list = self.working_mut().entry(subject.to_string()).or_default();
        list.push(question);
        let index = list.len() - 1;
        self.persist().await?;
        Ok(index)
    }

    pub async fn update_question(
        &mut self,
        subject: &str,
        index: usize,
        question: Question,
    ) -> Result<(), BankError> {
        validate_question(&question).map_err(BankError::Invalid)?;
        let slot = self
            .working_mut()
            .get_mut(subject)
            .and_then(|list| list.get_mut(index))
            .ok_or_else(|| BankError::NotFound {
                subject: subject.to_string(),
                index,
            })?;
        *slot = question;
        self.persist().await
    }

    pub async fn delete_question(&mut self, subject: &str, index: usize) -> Result<Question, BankError> {
        let not_found = || BankError::NotFound {
            subject: subject.to_string(),
            index,
        };
        let list = self.working_mut().get_mut(subject).ok_or_else(not_found)?;
        if index >= list.len() {
            return Err(not_found());
        }
        let removed = list.remove(index);
        self.persist().await?;
        Ok(removed)
    }

    async fn persist(&self) -> Result<(), BankError> {
        let bank = self.working();
        self.store.save(bank).await?;
        info!("question bank saved ({} subjects)", bank.len());
        Ok(())
    }

    fn working(&self) -> &BankMap {
        self.overrides.as_ref().unwrap_or(&self.defaults)
    }

    fn working_mut(&mut self) -> &mut BankMap {
        let defaults = &self.defaults;
        self.overrides.get_or_insert_with(|| defaults.clone())
    }
}

fn non_empty<'a>(bank: Option<&'a BankMap>, subject: &str) -> Option<&'a Vec<Question>> {
    bank.and_then(|b| b.get(subject)).filter(|list| !list.is_empty())
}
