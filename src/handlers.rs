use crate::error::{AppError, ErrorDetail};
use crate::models::{
    is_known_subject, FormData, FormField, LanguageLevel, Question, MANDATORY_SUBJECT, MAX_SUBJECTS, OPTION_COUNT,
    SUBJECTS,
};
use crate::question_bank::BankError;
use crate::state::{AppState, CompletionError, ParticipantSession, SharedSession};
use crate::store::{QuestionInstance, Stage};
use crate::submission::{calculate_score, Score, SubmissionOutcome};
use crate::ws_protocol::{WsEnvelope, TEST_COMPLETED, TIMER_TICK, TIME_UP};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "participant_session";
pub const ADMIN_HEADER: &str = "x-admin-password";
fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn client_key(connect: Option<&ConnectInfo<SocketAddr>>) -> String {
    connect
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "local".to_string())
}

fn current_session(state: &AppState, jar: &CookieJar, req_id: &str) -> Result<(Uuid, SharedSession), AppError> {
    let id = jar
        .get(SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "no participant session", req_id))?;
    let session = state
        .session(&id)
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "participant session not found", req_id))?;
    Ok((id, session))
}

#[derive(Debug, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub subject: String,
    pub prompt: String,
    pub options: [String; OPTION_COUNT],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct: Option<usize>,
    pub placeholder: bool,
}

impl QuestionView {
    fn from_instance(q: &QuestionInstance, reveal: bool) -> Self {
        Self {
            id: q.id.clone(),
            subject: q.subject.clone(),
            prompt: q.prompt.clone(),
            options: q.options.clone(),
            correct: reveal.then_some(q.correct),
            placeholder: q.placeholder,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TestView {
    pub subject: Option<String>,
    pub questions: Vec<QuestionView>,
    pub answers: BTreeMap<String, usize>,
    pub completed: bool,
    #[serde(rename = "answeredCount")]
    pub answered_count: usize,
    #[serde(rename = "remainingSeconds")]
    pub remaining_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<SubmissionOutcome>,
    #[serde(rename = "submissionInFlight")]
    pub submission_in_flight: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    pub stage: Stage,
    pub registered: bool,
    #[serde(rename = "formData")]
    pub form_data: FormData,
    #[serde(rename = "selectedSubjects")]
    pub selected_subjects: Vec<String>,
    pub test: TestView,
}

fn session_view(state: &AppState, session: &ParticipantSession) -> SessionView {
    let store = &session.store;
    let completed = store.session.completed;
    SessionView {
        session_id: session.id,
        stage: store.stage(),
        registered: store.registered,
        form_data: store.form.clone(),
        selected_subjects: store.subjects.as_slice().to_vec(),
        test: TestView {
            subject: store.session.subject.clone(),
            questions: store
                .session
                .questions
                .iter()
                .map(|q| QuestionView::from_instance(q, completed))
                .collect(),
            answers: store.session.answers.clone(),
            completed,
            answered_count: store.session.answered_count(),
            remaining_seconds: store.remaining_seconds(state.config.test_duration, Utc::now()),
            score: completed.then(|| calculate_score(&store.session)),
            submission: session.submission.clone(),
            submission_in_flight: session.submission_in_flight,
        },
    }
}

pub async fn list_subjects() -> Json<serde_json::Value> {
    Json(json!({
        "items": SUBJECTS,
        "mandatory": MANDATORY_SUBJECT,
        "maxSelected": MAX_SUBJECTS
    }))
}

pub async fn create_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (StatusCode, CookieJar, Json<SessionView>) {
    let (id, session) = state.create_session();
    let view = session_view(&state, &*session.read().await);
    let cookie = Cookie::build((SESSION_COOKIE, id.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    (StatusCode::CREATED, jar.add(cookie), Json(view))
}

pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (_, session) = current_session(&state, &jar, &req_id)?;
    let guard = session.read().await;
    Ok(Json(session_view(&state, &guard)))
}

#[derive(Debug, Deserialize)]
pub struct FormFieldPayload {
    pub field: String,
    #[serde(default)]
    pub value: String,
}

pub async fn update_form_field(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<FormFieldPayload>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (_, session) = current_session(&state, &jar, &req_id)?;
    let field = FormField::parse(&payload.field).ok_or_else(|| {
        AppError::validation("unknown form field", req_id.clone()).with_details(vec![ErrorDetail {
            field: payload.field.clone(),
            issue: "is not a registration field".into(),
        }])
    })?;
    if field.is_level() && !payload.value.trim().is_empty() && LanguageLevel::parse(&payload.value).is_none() {
        return Err(
            AppError::validation("invalid language level", req_id).with_details(vec![ErrorDetail {
                field: field.as_str().into(),
                issue: "must be one of none, medium, good".into(),
            }]),
        );
    }

    let mut guard = session.write().await;
    guard.store.set_form_field(field, payload.value);
    Ok(Json(session_view(&state, &guard)))
}

pub async fn complete_registration(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (id, session) = current_session(&state, &jar, &req_id)?;
    let mut guard = session.write().await;
    if let Err(issue) = guard.store.validate_registration() {
        return Err(AppError::validation(issue.issue.clone(), req_id).with_issues(vec![issue]));
    }
    info!("participant session {} registered", id);
    Ok(Json(session_view(&state, &guard)))
}

pub async fn toggle_subject(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(subject): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (_, session) = current_session(&state, &jar, &req_id)?;
    if !is_known_subject(&subject) {
        return Err(AppError::validation("unknown subject", req_id).with_details(vec![ErrorDetail {
            field: "subject".into(),
            issue: format!("{subject} is not offered"),
        }]));
    }
    let mut guard = session.write().await;
    if !guard.store.registered {
        return Err(AppError::stage_required("registration is not complete", req_id));
    }
    guard.store.toggle_subject(&subject);
    Ok(Json(session_view(&state, &guard)))
}

#[derive(Debug, Deserialize)]
pub struct StartTestQuery {
    pub restart: Option<bool>,
}

pub async fn start_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<StartTestQuery>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (id, session) = current_session(&state, &jar, &req_id)?;
    let mut guard = session.write().await;
    if !guard.store.registered {
        return Err(AppError::stage_required("registration is not complete", req_id));
    }
    if !guard.store.subjects.is_complete() {
        return Err(AppError::stage_required(
            format!(
                "Iltimos, {} ta fan tanlang. Hozir {} ta fan tanlangan.",
                MAX_SUBJECTS,
                guard.store.subjects.len()
            ),
            req_id,
        ));
    }
    if guard.submission_in_flight {
        return Err(AppError::new(StatusCode::CONFLICT, "CONFLICT", "submission in progress", req_id));
    }

    let restart = query.restart.unwrap_or(false);
    if restart || !guard.store.session.is_started() {
        let bank = state.bank.read().await;
        guard.store.start_test_session(&bank, Utc::now());
        guard.submission = None;
        info!(
            session = %id,
            questions = guard.store.session.questions.len(),
            "test session started"
        );
    }
    Ok(Json(session_view(&state, &guard)))
}

#[derive(Debug, Deserialize)]
pub struct AnswerPayload {
    #[serde(rename = "questionId")]
    pub question_id: String,
    #[serde(rename = "optionIndex")]
    pub option_index: usize,
}

pub async fn submit_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<AnswerPayload>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (_, session) = current_session(&state, &jar, &req_id)?;
    let mut guard = session.write().await;
    if !guard.store.session.is_started() {
        return Err(AppError::stage_required("test has not been started", req_id));
    }
    if guard.store.session.completed {
        return Err(AppError::new(StatusCode::CONFLICT, "CONFLICT", "test already completed", req_id));
    }
    if !guard.store.session.has_question(&payload.question_id) {
        return Err(AppError::validation("unknown question", req_id).with_details(vec![ErrorDetail {
            field: "questionId".into(),
            issue: "must reference a question of this test".into(),
        }]));
    }
    if payload.option_index >= OPTION_COUNT {
        return Err(AppError::validation("invalid option", req_id).with_details(vec![ErrorDetail {
            field: "optionIndex".into(),
            issue: format!("must be between 0 and {}", OPTION_COUNT - 1),
        }]));
    }

    guard.store.set_answer(payload.question_id.clone(), payload.option_index);
    Ok(Json(json!({
        "questionId": payload.question_id,
        "optionIndex": payload.option_index,
        "answeredCount": guard.store.session.answered_count(),
        "totalQuestions": guard.store.session.questions.len()
    })))
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub score: Score,
    pub submission: SubmissionOutcome,
    pub session: SessionView,
}

pub async fn complete_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<CompletionResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (id, session) = current_session(&state, &jar, &req_id)?;
    let report = state.complete_and_submit(&id).await.map_err(|err| match err {
        CompletionError::UnknownSession => {
            AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string(), req_id.clone())
        }
        CompletionError::NotStarted => AppError::stage_required(err.to_string(), req_id.clone()),
        CompletionError::InFlight => AppError::new(StatusCode::CONFLICT, "CONFLICT", err.to_string(), req_id.clone()),
    })?;
    if !matches!(report.submission, SubmissionOutcome::Submitted) {
        warn!(session = %id, outcome = ?report.submission, "test completed without delivery");
    }
    let view = session_view(&state, &*session.read().await);
    Ok(Json(CompletionResponse {
        score: report.score,
        submission: report.submission,
        session: view,
    }))
}

pub async fn ws_timer(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (id, session) = current_session(&state, &jar, &req_id)?;
    Ok(ws.on_upgrade(move |socket| timer_stream(socket, state, id, session)))
}

/// Pushes the countdown once per second. Expiry is announced, never acted upon.
async fn timer_stream(stream: WebSocket, state: AppState, id: Uuid, session: SharedSession) {
    let (mut sender_ws, mut receiver_ws) = stream.split();
    let limit = state.config.test_duration;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (remaining, completed) = {
                    let guard = session.read().await;
                    (guard.store.remaining_seconds(limit, Utc::now()), guard.store.session.completed)
                };
                let envelope = if completed {
                    WsEnvelope::now(TEST_COMPLETED, json!({ "remainingSeconds": remaining }))
                } else if remaining == 0 {
                    WsEnvelope::now(TIME_UP, json!({ "remainingSeconds": 0 }))
                } else {
                    WsEnvelope::now(TIMER_TICK, json!({ "remainingSeconds": remaining }))
                };
                let last = envelope.event != TIMER_TICK;
                let Ok(text) = serde_json::to_string(&envelope) else { break; };
                if sender_ws.send(Message::Text(text)).await.is_err() || last {
                    break;
                }
            }
            incoming = receiver_ws.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("timer stream closed for session {}", id);
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginPayload {
    pub password: String,
}

pub async fn admin_login(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<AdminLoginPayload>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    let client = client_key(connect.as_ref());
    check_admin_password(&state, &client, Some(&payload.password), "Noto'g'ri parol!", &req_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Compares a supplied admin password. Failures count against the client's window and an
/// exhausted window is refused before comparing.
fn check_admin_password(
    state: &AppState,
    client: &str,
    supplied: Option<&str>,
    rejection: &str,
    req_id: &str,
) -> Result<(), AppError> {
    if state.admin_failures.is_exhausted(client) {
        return Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "too many requests",
            req_id,
        ));
    }
    if supplied == Some(state.config.admin_password.as_str()) {
        return Ok(());
    }
    state.admin_failures.record_failure(client);
    warn!("rejected admin password from {}", client);
    Err(AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", rejection, req_id))
}

fn require_admin(
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
    state: &AppState,
    req_id: &str,
) -> Result<(), AppError> {
    let supplied = headers.get(ADMIN_HEADER).and_then(|h| h.to_str().ok());
    check_admin_password(state, &client_key(connect), supplied, "admin password required", req_id)
}

fn require_subject(subject: &str, req_id: &str) -> Result<(), AppError> {
    if is_known_subject(subject) {
        Ok(())
    } else {
        Err(AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "subject not found", req_id))
    }
}

fn bank_error(err: BankError, req_id: String) -> AppError {
    match err {
        BankError::Invalid(issues) => AppError::validation("Barcha maydonlarni to'ldiring!", req_id).with_issues(issues),
        BankError::NotFound { .. } => AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string(), req_id),
        BankError::Storage(_) => {
            warn!("{}", err);
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "question bank could not be saved",
                req_id,
            )
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuestionListResponse {
    pub subject: String,
    pub items: Vec<Question>,
    pub total: usize,
}

pub async fn admin_list_questions(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(subject): Path<String>,
) -> Result<Json<QuestionListResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, connect.as_ref(), &state, &req_id)?;
    require_subject(&subject, &req_id)?;
    let items = state.bank.read().await.list(&subject);
    Ok(Json(QuestionListResponse {
        subject,
        total: items.len(),
        items,
    }))
}

pub async fn admin_add_question(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(subject): Path<String>,
    Json(question): Json<Question>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, connect.as_ref(), &state, &req_id)?;
    require_subject(&subject, &req_id)?;
    let index = state
        .bank
        .write()
        .await
        .add_question(&subject, question)
        .await
        .map_err(|e| bank_error(e, req_id))?;
    info!("admin added question {} to {}", index, subject);
    Ok((StatusCode::CREATED, Json(json!({ "subject": subject, "index": index }))))
}

pub async fn admin_update_question(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path((subject, index)): Path<(String, usize)>,
    Json(question): Json<Question>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, connect.as_ref(), &state, &req_id)?;
    require_subject(&subject, &req_id)?;
    state
        .bank
        .write()
        .await
        .update_question(&subject, index, question)
        .await
        .map_err(|e| bank_error(e, req_id))?;
    info!("admin updated question {} in {}", index, subject);
    Ok(Json(json!({ "subject": subject, "index": index })))
}

pub async fn admin_delete_question(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path((subject, index)): Path<(String, usize)>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    require_admin(&headers, connect.as_ref(), &state, &req_id)?;
    require_subject(&subject, &req_id)?;
    state
        .bank
        .write()
        .await
        .delete_question(&subject, index)
        .await
        .map_err(|e| bank_error(e, req_id))?;
    info!("admin deleted question {} from {}", index, subject);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn not_found(headers: HeaderMap) -> AppError {
    AppError::new(
        StatusCode::NOT_FOUND,
        "NOT_FOUND",
        "unknown path",
        request_id_from_headers(&headers),
    )
    .with_details(vec![ErrorDetail {
        field: "redirect".into(),
        issue: "/".into(),
    }])
}
