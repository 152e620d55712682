pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod question_bank;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod store;
pub mod submission;
pub mod ws_protocol;

use std::sync::Arc;

pub fn build_state(config: config::AppConfig) -> anyhow::Result<state::AppState> {
    let transport: Arc<dyn submission::SheetTransport> =
        Arc::new(submission::ReqwestTransport::new(config.submit_timeout)?);
    let store: Arc<dyn question_bank::QuestionStore> = match config.question_bank_path.as_deref() {
        Some(path) => Arc::new(question_bank::FileQuestionStore::new(path)),
        None => Arc::new(question_bank::InMemoryQuestionStore::default()),
    };
    Ok(build_state_with(config, store, transport))
}

pub fn build_state_with(
    config: config::AppConfig,
    store: Arc<dyn question_bank::QuestionStore>,
    transport: Arc<dyn submission::SheetTransport>,
) -> state::AppState {
    let bank = question_bank::QuestionBank::open(store);
    let submitter = submission::SubmissionAdapter::new(config.webhook_url.clone(), transport);
    state::AppState::new(config, bank, submitter)
}
