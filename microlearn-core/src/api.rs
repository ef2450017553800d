use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::catalog;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::lesson::{Lesson, LessonId, QuizOutcome};
use crate::records::ProgressSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressReceipt {
    pub saved: bool,
    pub progress: ProgressSnapshot,
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

#[async_trait]
pub trait LessonApi: Send + Sync {
    async fn get_all_lessons(&self) -> ApiResult<Vec<Lesson>>;
    async fn get_lesson_by_id(&self, id: LessonId) -> ApiResult<Lesson>;
    async fn search_lessons(&self, query: &str) -> ApiResult<Vec<Lesson>>;
    async fn submit_quiz_answers(
        &self,
        lesson_id: LessonId,
        answers: &[usize],
    ) -> ApiResult<QuizOutcome>;
    async fn save_progress(&self, progress: &ProgressSnapshot) -> ApiResult<ProgressReceipt>;
}

/// In-process API over a fixed lesson list, with optional latency and
/// injectable failures.
#[derive(Debug)]
pub struct MockLessonApi {
    lessons: Vec<Lesson>,
    delay: Duration,
    failure: Mutex<Option<ApiError>>,
    calls: AtomicUsize,
}

impl Default for MockLessonApi {
    fn default() -> Self {
        Self::with_lessons(catalog::builtin_lessons())
    }
}

impl MockLessonApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lessons(lessons: Vec<Lesson>) -> Self {
        Self {
            lessons,
            delay: Duration::ZERO,
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::default().with_delay(config.network_delay())
    }

    /// Every following call fails with `error` until [`MockLessonApi::recover`].
    pub fn fail_with(&self, error: ApiError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Number of API calls attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lessons(&self) -> Vec<Lesson> {
        self.lessons.clone()
    }

    fn find(&self, id: LessonId) -> Result<Lesson, ApiError> {
        self.lessons()
            .into_iter()
            .find(|lesson| lesson.id == id)
            .ok_or_else(|| ApiError::not_found("Lesson not found"))
    }

    async fn simulate(&self) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LessonApi for MockLessonApi {
    async fn get_all_lessons(&self) -> ApiResult<Vec<Lesson>> {
        self.simulate().await?;
        Ok(ApiResponse::ok(self.lessons()))
    }

    async fn get_lesson_by_id(&self, id: LessonId) -> ApiResult<Lesson> {
        self.simulate().await?;
        self.find(id).map(ApiResponse::ok)
    }

    async fn search_lessons(&self, query: &str) -> ApiResult<Vec<Lesson>> {
        self.simulate().await?;
        let needle = query.trim().to_lowercase();
        let found = self
            .lessons()
            .into_iter()
            .filter(|lesson| lesson.matches(&needle))
            .collect();
        Ok(ApiResponse::ok(found))
    }

    async fn submit_quiz_answers(
        &self,
        lesson_id: LessonId,
        answers: &[usize],
    ) -> ApiResult<QuizOutcome> {
        let lesson = self.find(lesson_id)?;
        self.simulate().await?;
        Ok(ApiResponse::ok(lesson.grade(answers)))
    }

    async fn save_progress(&self, progress: &ProgressSnapshot) -> ApiResult<ProgressReceipt> {
        self.simulate().await?;
        Ok(ApiResponse::ok(ProgressReceipt {
            saved: true,
            progress: progress.clone(),
        }))
    }
}

#[derive(Debug, Serialize)]
struct QuizSubmission<'a> {
    answers: &'a [usize],
    timestamp: DateTime<Utc>,
}

/// JSON REST client: `GET /lessons`, `GET /lessons/{id}`, `GET /lessons?q=`,
/// `POST /lessons/{id}/quiz`, `POST /progress`.
#[derive(Debug, Clone)]
pub struct HttpLessonApi {
    client: Client,
    base_url: String,
    timeout: Duration,
    retry_attempts: u8,
    retry_delay: Duration,
}

impl HttpLessonApi {
    pub fn new(client: Client, config: &ApiConfig) -> Result<Self, url::ParseError> {
        let base = Url::parse(&config.base_url)?;
        Ok(Self {
            client,
            base_url: base.as_str().trim_end_matches('/').to_owned(),
            timeout: config.timeout(),
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends the request built by `build`, retrying timeouts, 5xx and
    /// transport failures with a fixed delay.
    async fn send_with_retry<T, F>(&self, url: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempt: u8 = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, send_once::<T>(build())).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::timeout()),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry_attempts => {
                    attempt += 1;
                    warn!(url, attempt, error = %err, "request failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

async fn send_once<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::new(
            format!("HTTP error! status: {}", status.as_u16()),
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
        ));
    }

    let bytes = response.bytes().await?;
    let body: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
    serde_json::from_slice(body)
        .map_err(|e| ApiError::invalid_response(format!("invalid response body: {e}")))
}

#[async_trait]
impl LessonApi for HttpLessonApi {
    async fn get_all_lessons(&self) -> ApiResult<Vec<Lesson>> {
        let url = self.endpoint("/lessons");
        let lessons = self
            .send_with_retry(&url, || self.client.get(&url))
            .await?;
        Ok(ApiResponse::ok(lessons))
    }

    async fn get_lesson_by_id(&self, id: LessonId) -> ApiResult<Lesson> {
        let url = self.endpoint(&format!("/lessons/{id}"));
        let lesson = self
            .send_with_retry(&url, || self.client.get(&url))
            .await?;
        Ok(ApiResponse::ok(lesson))
    }

    async fn search_lessons(&self, query: &str) -> ApiResult<Vec<Lesson>> {
        let url = self.endpoint("/lessons");
        let needle = query.trim();
        let lessons = self
            .send_with_retry(&url, || self.client.get(&url).query(&[("q", needle)]))
            .await?;
        Ok(ApiResponse::ok(lessons))
    }

    async fn submit_quiz_answers(
        &self,
        lesson_id: LessonId,
        answers: &[usize],
    ) -> ApiResult<QuizOutcome> {
        let url = self.endpoint(&format!("/lessons/{lesson_id}/quiz"));
        let submission = QuizSubmission {
            answers,
            timestamp: Utc::now(),
        };
        let outcome = self
            .send_with_retry(&url, || self.client.post(&url).json(&submission))
            .await?;
        Ok(ApiResponse::ok(outcome))
    }

    async fn save_progress(&self, progress: &ProgressSnapshot) -> ApiResult<ProgressReceipt> {
        let url = self.endpoint("/progress");
        let _: Option<serde_json::Value> = self
            .send_with_retry(&url, || self.client.post(&url).json(progress))
            .await?;
        debug!(progress = progress.progress, "progress reported");
        Ok(ApiResponse::ok(ProgressReceipt {
            saved: true,
            progress: progress.clone(),
        }))
    }
}
