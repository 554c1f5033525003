use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::{multipart, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use url::Url;

use super::{AnswerSubmission, Credentials, ExamBackend, ImageFile, StartedSession};
use crate::{
    config::ProctorConfig,
    error::BackendError,
    models::{ActiveSession, Question, SavedAnswer},
};

/// REST client for the exam server.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct IdRef {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveTestEntry {
    test: IdRef,
    selected_domain: IdRef,
    selected_section: String,
    due_time: DateTime<Utc>,
}

#[derive(Deserialize, Default)]
struct MyTests {
    #[serde(default)]
    active: Vec<ActiveTestEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerEntry {
    question: IdRef,
    #[serde(default)]
    answer_text: String,
}

#[derive(Deserialize)]
struct MyAnswers {
    #[serde(default)]
    answers: Vec<AnswerEntry>,
}

#[derive(Deserialize)]
struct QuestionList {
    #[serde(default)]
    questions: Vec<Question>,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &ProctorConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|err| BackendError::Transport(format!("invalid api base url: {err}")))?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Transport(format!("{} cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_saved_answers(
        &self,
        credentials: &Credentials,
        domain_id: &str,
        section_id: &str,
    ) -> Result<Vec<SavedAnswer>, BackendError> {
        let url = self.endpoint(&["student-answers", "my-answers", domain_id, section_id])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(credentials.access_token())
            .send()
            .await
            .map_err(transport)?;

        let body: MyAnswers = decode(response).await?;
        Ok(body
            .answers
            .into_iter()
            .map(|entry| SavedAnswer {
                question_id: entry.question.id,
                answer_text: entry.answer_text,
            })
            .collect())
    }
}

#[async_trait]
impl ExamBackend for HttpBackend {
    async fn session_status(
        &self,
        credentials: &Credentials,
        test_id: &str,
    ) -> Result<Option<ActiveSession>, BackendError> {
        let url = self.endpoint(&["tests", "student", "my-tests"])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(credentials.access_token())
            .send()
            .await
            .map_err(transport)?;

        let tests: MyTests = decode(response).await?;
        let Some(mut active) = find_active(tests, test_id) else {
            debug!("no active session on the server for test {test_id}");
            return Ok(None);
        };

        active.saved_answers = self
            .fetch_saved_answers(credentials, &active.domain_id, &active.section_id)
            .await?;
        Ok(Some(active))
    }

    async fn start_session(
        &self,
        credentials: &Credentials,
        test_id: &str,
        domain_id: &str,
        section_id: &str,
    ) -> Result<StartedSession, BackendError> {
        let url = self.endpoint(&["tests", test_id, "start"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(credentials.access_token())
            .json(&serde_json::json!({ "domainId": domain_id, "section": section_id }))
            .send()
            .await
            .map_err(transport)?;

        decode(response).await
    }

    async fn fetch_questions(
        &self,
        credentials: &Credentials,
        domain_id: &str,
        section_id: &str,
    ) -> Result<Vec<Question>, BackendError> {
        let mut url = self.endpoint(&["questions", "domain", domain_id])?;
        url.query_pairs_mut().append_pair("section", section_id);
        let response = self
            .client
            .get(url)
            .bearer_auth(credentials.access_token())
            .send()
            .await
            .map_err(transport)?;

        let list: QuestionList = decode(response).await?;
        Ok(list.questions)
    }

    async fn save_answer(
        &self,
        credentials: &Credentials,
        answer: &AnswerSubmission,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&["student-answers", "submit"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(credentials.access_token())
            .json(answer)
            .send()
            .await
            .map_err(transport)?;

        check_status(response).await.map(|_| ())
    }

    async fn upload_image(
        &self,
        credentials: &Credentials,
        image: &ImageFile,
    ) -> Result<String, BackendError> {
        let url = self.endpoint(&["upload", "image"])?;
        let part = multipart::Part::bytes(image.bytes.clone())
            .file_name(image.name.clone())
            .mime_str(&image.mime_type)
            .map_err(|err| BackendError::Transport(format!("invalid mime type: {err}")))?;
        let form = multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(url)
            .bearer_auth(credentials.access_token())
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        let uploaded: UploadResponse = decode(response).await?;
        uploaded
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| BackendError::Decode("No URL returned from server".into()))
    }

    async fn submit_session(
        &self,
        credentials: &Credentials,
        test_id: &str,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&["tests", test_id, "submit"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(credentials.access_token())
            .send()
            .await
            .map_err(transport)?;

        check_status(response).await.map(|_| ())
    }
}

fn find_active(tests: MyTests, test_id: &str) -> Option<ActiveSession> {
    tests
        .active
        .into_iter()
        .find(|entry| entry.test.id == test_id)
        .map(|entry| ActiveSession {
            test_id: entry.test.id,
            domain_id: entry.selected_domain.id,
            domain_name: entry.selected_domain.name,
            section_id: entry.selected_section,
            due_time: entry.due_time,
            saved_answers: Vec::new(),
        })
}

fn transport(err: reqwest::Error) -> BackendError {
    BackendError::Transport(err.to_string())
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(BackendError::Unauthorized);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|parsed| parsed.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    warn!("server rejected request with {status}: {message}");

    Err(BackendError::Rejected {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let response = check_status(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|err| BackendError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(&ProctorConfig {
            api_base_url: base.into(),
            ..ProctorConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn endpoint_appends_encoded_segments() {
        let backend = backend("https://exam.test/api/");
        let url = backend.endpoint(&["tests", "t 1", "start"]).unwrap();
        assert_eq!(url.as_str(), "https://exam.test/api/tests/t%201/start");
    }

    #[test]
    fn endpoint_handles_base_without_path() {
        let backend = backend("https://exam.test");
        let url = backend.endpoint(&["upload", "image"]).unwrap();
        assert_eq!(url.as_str(), "https://exam.test/upload/image");
    }

    #[test]
    fn finds_active_session_for_test() {
        let raw = r#"{
            "active": [
                {
                    "test": { "_id": "other" },
                    "selectedDomain": { "_id": "d0", "name": "Networks" },
                    "selectedSection": "A",
                    "dueTime": "2026-01-01T10:00:00Z"
                },
                {
                    "test": { "_id": "t1" },
                    "selectedDomain": { "_id": "d1", "name": "Databases" },
                    "selectedSection": "B",
                    "dueTime": "2026-01-01T11:30:00Z"
                }
            ]
        }"#;
        let tests: MyTests = serde_json::from_str(raw).unwrap();
        let active = find_active(tests, "t1").unwrap();
        assert_eq!(active.domain_id, "d1");
        assert_eq!(active.section_id, "B");
        assert_eq!(active.domain_name.as_deref(), Some("Databases"));
        assert_eq!(active.due_time.to_rfc3339(), "2026-01-01T11:30:00+00:00");
    }

    #[test]
    fn no_active_entry_means_no_session() {
        let tests: MyTests = serde_json::from_str(r#"{ "active": [] }"#).unwrap();
        assert!(find_active(tests, "t1").is_none());
    }

    #[test]
    fn start_response_parses_questions() {
        let raw = r#"{
            "questions": [{ "_id": "q1", "questionText": "Explain ACID" }],
            "dueTime": "2026-01-01T11:30:00.000Z"
        }"#;
        let started: StartedSession = serde_json::from_str(raw).unwrap();
        assert_eq!(started.questions[0].id, "q1");
        assert_eq!(started.questions[0].text, "Explain ACID");
    }

    #[test]
    fn credentials_debug_hides_token() {
        let creds = Credentials::bearer("secret-token");
        assert!(!format!("{creds:?}").contains("secret-token"));
    }
}
