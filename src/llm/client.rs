use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{CompletionProvider, GenerationParams};
use crate::config::LLMConfig;
use crate::error::{ScorerError, ScorerResult};

/// OpenAI-compatible chat-completions client with rate limiting and retries
pub struct OpenAiClient {
    client: Client,
    endpoint: Url,
    params: GenerationParams,
    system_message: String,
    timeout: Duration,
    max_retries: usize,
    retry_delay: Duration,
    limiter: DefaultDirectRateLimiter,
    stats: ProviderStats,
}

/// Request counters for the run summary
#[derive(Debug, Default)]
pub struct ProviderStats {
    requests: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
}

impl ProviderStats {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a client; the API key must already be validated
    pub fn new(
        config: &LLMConfig,
        api_key: &str,
        params: GenerationParams,
        system_message: impl Into<String>,
    ) -> ScorerResult<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.trim())).map_err(|_| {
            ScorerError::InvalidCredential {
                reason: "API key contains characters not allowed in a header".to_string(),
            }
        })?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let timeout = Duration::from_secs(config.request_timeout_seconds);
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| ScorerError::config(format!("cannot build HTTP client: {}", e)))?;

        let rpm = NonZeroU32::new(config.requests_per_minute)
            .ok_or_else(|| ScorerError::config("requests_per_minute must be > 0"))?;

        Ok(Self {
            client,
            endpoint: completions_endpoint(&config.api_base_url)?,
            params,
            system_message: system_message.into(),
            timeout,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            limiter: RateLimiter::direct(Quota::per_minute(rpm)),
            stats: ProviderStats::default(),
        })
    }

    pub fn stats(&self) -> &ProviderStats {
        &self.stats
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.params.model,
            messages: vec![
                ChatMessage { role: "system", content: &self.system_message },
                ChatMessage { role: "user", content: prompt },
            ],
            max_tokens: self.params.max_output_tokens,
            temperature: self.params.temperature,
        }
    }

    /// Make a single request without retries
    async fn send_once(&self, prompt: &str) -> ScorerResult<String> {
        self.limiter.until_ready().await;
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        let request = self.build_request(prompt);
        let transport = |e: reqwest::Error| ScorerError::from_reqwest(e, self.timeout);
        let call = async {
            let response = self
                .client
                .post(self.endpoint.clone())
                .json(&request)
                .send()
                .await
                .map_err(transport)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ScorerError::from_status(status.as_u16(), body));
            }

            let parsed: ChatResponse = response.json().await.map_err(transport)?;
            extract_content(parsed)
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ScorerError::Timeout { seconds: self.timeout.as_secs() }),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, prompt: &str) -> ScorerResult<String> {
        debug!("Calling completion API, model: {}", self.params.model);

        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.send_once(prompt).await {
                Ok(content) => {
                    debug!("Completion API call succeeded on attempt {}", attempt);
                    return Ok(content);
                }
                Err(e) if e.is_recoverable() && attempt < self.max_retries => {
                    warn!("Completion request failed (attempt {}): {}, retrying", attempt, e);
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = e.retry_delay().unwrap_or_default().max(self.retry_delay * attempt as u32);
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        Err(last_error.unwrap_or_else(|| ScorerError::internal("all retry attempts failed")))
    }
}

/// Join `chat/completions` onto the configured base URL
fn completions_endpoint(base_url: &str) -> ScorerResult<Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)
        .and_then(|url| url.join("chat/completions"))
        .map_err(|e| ScorerError::config(format!("invalid API base URL '{}': {}", base_url, e)))
}

/// Pull the first choice's text out of a response
fn extract_content(response: ChatResponse) -> ScorerResult<String> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(ScorerError::EmptyResponse)?;

    let content = content.trim();
    if content.is_empty() {
        return Err(ScorerError::EmptyResponse);
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn test_config() -> LLMConfig {
        crate::config::AppConfig::default().llm
    }

    /// Read one HTTP request: headers plus a Content-Length body
    async fn read_request(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Serve the same canned reply to every request, counting hits
    async fn serve(status_line: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut stream).await;
                let reply = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (base_url, hits)
    }

    fn local_client(base_url: String, timeout_seconds: u64) -> OpenAiClient {
        let mut config = test_config();
        config.api_base_url = base_url;
        config.max_retries = 3;
        config.retry_delay_seconds = 0;
        config.request_timeout_seconds = timeout_seconds;
        OpenAiClient::new(&config, "sk-test", GenerationParams::default(), "system").unwrap()
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let (base_url, hits) = serve(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"1. 5\n2. 2"}}]}"#,
        )
        .await;
        let client = local_client(base_url, 10);

        let content = client.complete("score these").await.unwrap();
        assert_eq!(content, "1. 5\n2. 2");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(client.stats().requests(), 1);
        assert_eq!(client.stats().failures(), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let (base_url, hits) = serve("401 Unauthorized", r#"{"error":"bad key"}"#).await;
        let client = local_client(base_url, 10);

        let result = client.complete("score these").await;
        assert!(matches!(result, Err(ScorerError::Authentication { status: 401 })));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(client.stats().retries(), 0);
        assert_eq!(client.stats().failures(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried_until_exhausted() {
        let (base_url, hits) = serve("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let client = local_client(base_url, 10);

        let result = client.complete("score these").await;
        assert!(matches!(result, Err(ScorerError::HttpStatus { status: 500, .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(client.stats().requests(), 3);
        assert_eq!(client.stats().retries(), 2);
        assert_eq!(client.stats().failures(), 1);
    }

    #[tokio::test]
    async fn test_stalled_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let mut config = test_config();
        config.api_base_url = base_url;
        config.max_retries = 1;
        config.request_timeout_seconds = 1;
        let client = OpenAiClient::new(&config, "sk-test", GenerationParams::default(), "system").unwrap();

        let result = client.complete("score these").await;
        assert!(matches!(result, Err(ScorerError::Timeout { seconds: 1 })));
        assert_eq!(client.stats().failures(), 1);
    }

    #[test]
    fn test_endpoint_joining() {
        let url = completions_endpoint("https://api.openai.com/v1").unwrap();
        assert_eq!(url.as_str(), "https://api.openai.com/v1/chat/completions");

        let url = completions_endpoint("http://localhost:8080/v1/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/v1/chat/completions");

        assert!(completions_endpoint("no scheme").is_err());
    }

    #[test]
    fn test_request_serialization() {
        let client = OpenAiClient::new(
            &test_config(),
            "sk-test",
            GenerationParams::default(),
            "You are a keyword intent scoring expert.",
        )
        .unwrap();

        let body = serde_json::to_value(client.build_request("score these")).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "score these");
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_extract_content() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"  1. 5\n2. 3  "}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(response).unwrap(), "1. 5\n2. 3");
    }

    #[test]
    fn test_extract_content_empty() {
        let no_choices: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(extract_content(no_choices), Err(ScorerError::EmptyResponse)));

        let null_content: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(matches!(extract_content(null_content), Err(ScorerError::EmptyResponse)));

        let blank: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"   "}}]}"#).unwrap();
        assert!(matches!(extract_content(blank), Err(ScorerError::EmptyResponse)));
    }

    #[test]
    fn test_header_rejects_invalid_key() {
        let result = OpenAiClient::new(
            &test_config(),
            "sk-bad\nkey",
            GenerationParams::default(),
            "system",
        );
        assert!(matches!(result, Err(ScorerError::InvalidCredential { .. })));
    }
}
