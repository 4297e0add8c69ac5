use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::cli::chat::attachment::Attachment;
use crate::config::Config;

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("API request failed with status {status} {status_text}{}", detail_suffix(.detail))]
    Transport {
        status: u16,
        status_text: String,
        detail: Option<String>,
    },

    #[error("API returned no answer")]
    EmptyResponse,

    #[error("could not reach the API: {0}")]
    Network(#[from] reqwest::Error),

    #[error("could not parse the API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid API endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default()
}

/// Something that can answer a question.
///
/// `GeminiClient` is the only implementation that does I/O.
#[async_trait]
pub trait AnswerClient: Send + Sync {
    async fn ask(&self, question: &str, attachment: Option<&Attachment>) -> Result<String, AnswerError>;
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn build_request<'a>(question: &'a str, attachment: Option<&'a Attachment>) -> GenerateContentRequest<'a> {
    let mut parts = vec![Part::Text { text: question }];
    if let Some(attachment) = attachment {
        parts.push(Part::InlineData {
            inline_data: InlineData {
                mime_type: &attachment.mime_type,
                data: &attachment.data,
            },
        });
    }

    GenerateContentRequest {
        contents: vec![Content { parts }],
    }
}

/// Pull `candidates[0].content.parts[0].text` out of a success body.
fn extract_answer(body: &str) -> Result<String, AnswerError> {
    let response: GenerateContentResponse = serde_json::from_str(body)?;

    let candidate = response.candidates.into_iter().next().ok_or(AnswerError::EmptyResponse)?;
    if let Some(reason) = &candidate.finish_reason {
        debug!("First candidate finished with {}", reason);
    }

    candidate
        .content
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .ok_or(AnswerError::EmptyResponse)
}

// The request URL carries the API key.
fn redact(err: reqwest::Error) -> AnswerError {
    AnswerError::Network(err.without_url())
}

fn error_detail(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error.message)
}

pub struct GeminiClient {
    api_key: String,
    model: String,
    api_base: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: &Config, client: reqwest::Client) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_base: config.api_base.clone(),
            client,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        ))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }
}

#[async_trait]
impl AnswerClient for GeminiClient {
    async fn ask(&self, question: &str, attachment: Option<&Attachment>) -> Result<String, AnswerError> {
        let request_body = build_request(question, attachment);

        debug!(
            "Sending request to Gemini model {}: question of {} chars, attachment {:?}",
            self.model,
            question.chars().count(),
            attachment.map(|a| (&a.filename, &a.mime_type, a.data.len()))
        );

        let response = self
            .client
            .post(self.endpoint()?)
            .json(&request_body)
            .send()
            .await
            .map_err(redact)?;

        let status = response.status();
        let body = response.text().await.map_err(redact)?;

        if !status.is_success() {
            error!("API request failed with status {}: {}", status, body);
            return Err(AnswerError::Transport {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
                detail: error_detail(&body),
            });
        }

        debug!("Received response from Gemini API: {}", body);

        let answer = extract_answer(&body)?;
        info!("Received answer of {} chars", answer.chars().count());
        Ok(answer)
    }
}
