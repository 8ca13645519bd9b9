// src/client/api.rs

//! REST calls the exam client makes before the live session starts.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::{
    error::ClientError,
    models::exam::{EnterExamResponse, ExamPayload},
};

/// The exam-assignment collaborator as seen by the client.
#[async_trait]
pub trait ExamApi: Send + Sync {
    /// Registers entry into the exam. Carries the payload only on first entry.
    async fn enter_exam(&self, exam_id: i64) -> Result<EnterExamResponse, ClientError>;

    /// Question payload fallback used when resuming.
    async fn fetch_questions(&self, exam_id: i64) -> Result<ExamPayload, ClientError>;
}

pub struct HttpExamApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpExamApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body["error"]
            .as_str()
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
            .to_string();
        Err(ClientError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ExamApi for HttpExamApi {
    async fn enter_exam(&self, exam_id: i64) -> Result<EnterExamResponse, ClientError> {
        let response = self
            .client
            .post(format!("{}/api/exams/{}/enter", self.base_url, exam_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn fetch_questions(&self, exam_id: i64) -> Result<ExamPayload, ClientError> {
        let response = self
            .client
            .get(format!("{}/api/exams/{}/questions", self.base_url, exam_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::parse(response).await
    }
}
