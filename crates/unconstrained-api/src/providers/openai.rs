//! OpenAI Assistants API (v2) provider

use async_trait::async_trait;
use reqwest::{
    StatusCode,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::{AssistantsApi, FileUpload};
use crate::{
    error::{Error, Result},
    types::{
        Assistant, CreateMessageRequest, CreateRunRequest, CreateThreadRequest, FileObject,
        ListPage, Run, Thread, ThreadMessage,
    },
};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Page size used when listing thread messages (the API maximum)
const MESSAGE_PAGE_LIMIT: &str = "100";

/// OpenAI assistants client
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a new provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API root (proxies, compatible servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Get the API root
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::InvalidApiKey)?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert("openai-beta", HeaderValue::from_static("assistants=v2"));
        Ok(headers)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await?;
        handle_response(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;
        handle_response(response).await
    }
}

#[async_trait]
impl AssistantsApi for OpenAIProvider {
    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant> {
        tracing::debug!("Retrieving assistant {}", assistant_id);
        self.get(&format!("/assistants/{}", assistant_id), &[]).await
    }

    async fn create_thread(&self, request: CreateThreadRequest) -> Result<Thread> {
        let thread: Thread = self.post("/threads", &request).await?;
        tracing::debug!("Created thread {}", thread.id);
        Ok(thread)
    }

    async fn create_message(
        &self,
        thread_id: &str,
        request: CreateMessageRequest,
    ) -> Result<ThreadMessage> {
        self.post(&format!("/threads/{}/messages", thread_id), &request)
            .await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let path = format!("/threads/{}/messages", thread_id);
        let mut messages = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![("limit", MESSAGE_PAGE_LIMIT)];
            if let Some(ref cursor) = after {
                query.push(("after", cursor.as_str()));
            }

            let page: ListPage<ThreadMessage> = self.get(&path, &query).await?;
            messages.extend(page.data);

            match (page.has_more, page.last_id) {
                (true, Some(last_id)) => after = Some(last_id),
                _ => break,
            }
        }

        tracing::debug!("Listed {} messages in {}", messages.len(), thread_id);
        Ok(messages)
    }

    async fn create_run(&self, thread_id: &str, request: CreateRunRequest) -> Result<Run> {
        let run: Run = self
            .post(&format!("/threads/{}/runs", thread_id), &request)
            .await?;
        tracing::debug!("Created run {} ({})", run.id, run.status);
        Ok(run)
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.get(&format!("/threads/{}/runs/{}", thread_id, run_id), &[])
            .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.post(
            &format!("/threads/{}/runs/{}/cancel", thread_id, run_id),
            &serde_json::json!({}),
        )
        .await
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<FileObject> {
        let FileUpload {
            file_name,
            mime_type,
            bytes,
            purpose,
        } = upload;

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&mime_type)?;
        let form = Form::new().text("purpose", purpose).part("file", part);

        let response = self
            .client
            .post(self.url("/files"))
            .headers(self.headers()?)
            .multipart(form)
            .send()
            .await?;
        let file: FileObject = handle_response(response).await?;
        tracing::info!("Uploaded {} as {} ({} bytes)", file.filename, file.id, file.bytes);
        Ok(file)
    }
}

/// Map a response to either its decoded body or a typed error
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if status.is_success() {
        let text = response.text().await?;
        return serde_json::from_str(&text)
            .map_err(|e| Error::UnexpectedResponse(format!("{}: {}", e, text)));
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let text = response.text().await.unwrap_or_default();

    Err(error_from_status(status, retry_after, &text))
}

fn error_from_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> Error {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| ErrorBody {
            error_type: "http_error".to_string(),
            message: body.to_string(),
        });

    match status {
        StatusCode::UNAUTHORIZED => Error::InvalidApiKey,
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after },
        StatusCode::NOT_FOUND => Error::NotFound(detail.message),
        _ => Error::api(status.as_u16(), detail.error_type, detail.message),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let provider = OpenAIProvider::new("sk-test").with_base_url("http://localhost:8080/v1/");
        assert_eq!(provider.base_url(), "http://localhost:8080/v1");
        assert_eq!(
            provider.url("/threads"),
            "http://localhost:8080/v1/threads"
        );
    }

    #[test]
    fn test_headers_carry_auth_and_beta() {
        let provider = OpenAIProvider::new("sk-test");
        let headers = provider.headers().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-test");
        assert_eq!(headers.get("openai-beta").unwrap(), "assistants=v2");
    }

    #[test]
    fn test_invalid_key_characters_rejected() {
        let provider = OpenAIProvider::new("sk-bad\nkey");
        assert!(matches!(provider.headers(), Err(Error::InvalidApiKey)));
    }

    #[test]
    fn test_error_body_is_decoded() {
        let body = r#"{"error": {"type": "invalid_request_error", "message": "No assistant found"}}"#;
        match error_from_status(StatusCode::BAD_REQUEST, None, body) {
            Error::Api {
                status,
                error_type,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(error_type, "invalid_request_error");
                assert_eq!(message, "No assistant found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_status_specific_errors() {
        assert!(matches!(
            error_from_status(StatusCode::UNAUTHORIZED, None, ""),
            Error::InvalidApiKey
        ));
        assert!(matches!(
            error_from_status(StatusCode::TOO_MANY_REQUESTS, Some(7), ""),
            Error::RateLimited {
                retry_after: Some(7)
            }
        ));
        let not_found = error_from_status(
            StatusCode::NOT_FOUND,
            None,
            r#"{"error": {"type": "invalid_request_error", "message": "No thread found with id 'thread_x'."}}"#,
        );
        assert!(not_found.is_not_found());
        assert!(not_found.to_string().contains("thread_x"));
    }

    #[test]
    fn test_non_json_error_body_is_kept() {
        let err = error_from_status(StatusCode::BAD_GATEWAY, None, "<html>bad gateway</html>");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("bad gateway"));
    }
}
