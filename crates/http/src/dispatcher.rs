use std::collections::HashMap;
use std::time::{Duration, Instant};

use courier_auth::AuthHeaderBuilder;
use courier_core::{ExecutionResult, RetryStrategy, millis};
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::capture::{CapturedRequest, CapturedResponse, sanitize_headers, truncate_body};
use crate::config::{DispatcherSettings, HttpRequestConfig};
use crate::error::HttpError;

/// Outcome of one dispatched request, with sanitized captures.
#[derive(Debug, Clone, Serialize)]
pub struct HttpExecutionResult {
    #[serde(flatten)]
    pub result: ExecutionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    pub request: CapturedRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedResponse>,
}

impl HttpExecutionResult {
    pub fn success(&self) -> bool {
        self.result.success
    }

    pub fn status(&self) -> Option<u16> {
        self.result.status
    }

    /// Worth retrying: no response at all, or a 5xx.
    fn is_transient_failure(&self) -> bool {
        match self.result.status {
            Some(status) => (500..600).contains(&status),
            None => !self.result.success,
        }
    }
}

struct RawResponse {
    status: u16,
    status_text: String,
    headers: HeaderMap,
    body: String,
}

/// Generic outbound HTTP client used for callbacks and integrations.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    auth: AuthHeaderBuilder,
    settings: DispatcherSettings,
}

impl HttpDispatcher {
    pub fn new(settings: DispatcherSettings) -> Result<Self, HttpError> {
        let client = build_client(settings.max_redirects)?;
        Ok(Self {
            client,
            auth: AuthHeaderBuilder::new(),
            settings,
        })
    }

    /// Share an auth builder (and its OAuth2 token cache).
    #[must_use]
    pub fn with_auth_builder(mut self, auth: AuthHeaderBuilder) -> Self {
        self.auth = auth;
        self
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Issue one request.
    ///
    /// Non-2xx responses, network failures and timeouts are reported in the
    /// result; `Err` is reserved for malformed request configs and auth
    /// failures.
    pub async fn execute(&self, config: &HttpRequestConfig) -> Result<HttpExecutionResult, HttpError> {
        self.execute_cancellable(config, &CancellationToken::new()).await
    }

    /// [`execute`](Self::execute) that aborts when `cancel` fires.
    #[instrument(skip(self, config, cancel), fields(method = %config.method, url = %config.url))]
    pub async fn execute_cancellable(
        &self,
        config: &HttpRequestConfig,
        cancel: &CancellationToken,
    ) -> Result<HttpExecutionResult, HttpError> {
        let start = Instant::now();
        let url = config.final_url()?;
        let body = config.body_text()?;
        let headers = self.build_headers(config).await?;
        let timeout = config
            .timeout_ms
            .map_or(self.settings.timeout, Duration::from_millis);

        let request_capture = CapturedRequest {
            method: config.method.as_str().to_owned(),
            url: url.clone(),
            headers: capture_headers(&headers),
            body: body.as_deref().map(truncate_body),
        };
        debug!(request = ?request_capture, "dispatching HTTP request");

        let client = match config.max_redirects {
            Some(max) if max != self.settings.max_redirects => build_client(max)?,
            _ => self.client.clone(),
        };
        let mut request = client
            .request(config.method.to_reqwest(), &url)
            .headers(headers)
            .timeout(timeout);
        if let Some(body) = body {
            request = request.body(body);
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HttpError::Cancelled),
            raw = send(request, timeout) => raw,
        };
        let elapsed = start.elapsed();

        let raw = match outcome {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, duration_ms = millis(elapsed), "HTTP request failed");
                return Ok(HttpExecutionResult {
                    result: ExecutionResult::failed(e.to_string(), elapsed),
                    status_text: None,
                    request: request_capture,
                    response: None,
                });
            }
        };

        let success = (200..300).contains(&raw.status);
        let captured_body = truncate_body(&raw.body);
        let mut result = if success {
            ExecutionResult::succeeded(elapsed)
        } else if config.validate_status {
            ExecutionResult::failed(format!("HTTP {} {}", raw.status, raw.status_text), elapsed)
        } else {
            ExecutionResult {
                success: false,
                ..ExecutionResult::succeeded(elapsed)
            }
        };
        result = result.with_status(raw.status).with_body(captured_body.clone());

        info!(
            status = raw.status,
            success,
            duration_ms = result.duration_ms,
            "HTTP request completed"
        );

        Ok(HttpExecutionResult {
            result,
            status_text: Some(raw.status_text.clone()),
            request: request_capture,
            response: Some(CapturedResponse {
                status: raw.status,
                status_text: raw.status_text,
                headers: capture_headers(&raw.headers),
                body: captured_body,
            }),
        })
    }

    /// Retry on network failure or 5xx with delay
    /// `base_delay * multiplier^attempt`. A 4xx or success returns at once.
    pub async fn execute_with_retry(
        &self,
        config: &HttpRequestConfig,
        max_retries: u32,
        base_delay: Duration,
        multiplier: f64,
    ) -> Result<HttpExecutionResult, HttpError> {
        let strategy = RetryStrategy::exponential(base_delay, multiplier);
        self.execute_with_strategy(config, max_retries, &strategy, &CancellationToken::new())
            .await
    }

    /// Bounded retry loop driven by `strategy`. Backoff sleeps and in-flight
    /// requests both stop when `cancel` fires.
    #[instrument(skip(self, config, strategy, cancel), fields(url = %config.url))]
    pub async fn execute_with_strategy(
        &self,
        config: &HttpRequestConfig,
        max_retries: u32,
        strategy: &RetryStrategy,
        cancel: &CancellationToken,
    ) -> Result<HttpExecutionResult, HttpError> {
        let start = Instant::now();
        let mut attempt = 0;
        loop {
            let mut last = self.execute_cancellable(config, cancel).await?;

            let done = !last.is_transient_failure() || cancel.is_cancelled() || attempt >= max_retries;
            if done {
                last.result.retries = Some(attempt);
                last.result.duration_ms = millis(start.elapsed());
                return Ok(last);
            }

            let delay = strategy.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                max_retries,
                delay_ms = millis(delay),
                error = last.result.error.as_deref().unwrap_or_default(),
                "retrying HTTP request"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    last.result.retries = Some(attempt);
                    last.result.duration_ms = millis(start.elapsed());
                    return Ok(last);
                }
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn build_headers(&self, config: &HttpRequestConfig) -> Result<HeaderMap, HttpError> {
        let mut merged: HashMap<String, String> = match &config.auth {
            Some(auth) => self.auth.generate_headers(auth).await?,
            None => HashMap::new(),
        };

        for (name, value) in &config.headers {
            let already_set = merged.keys().any(|k| k.eq_ignore_ascii_case(name));
            if !already_set {
                merged.insert(name.clone(), value.clone());
            }
        }

        let mut headers = HeaderMap::with_capacity(merged.len() + 2);
        for (name, value) in merged {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HttpError::InvalidHeader(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| HttpError::InvalidHeader(format!("{name}: {e}")))?;
            headers.insert(name, value);
        }

        if !headers.contains_key(USER_AGENT) {
            let agent = HeaderValue::from_str(&self.settings.user_agent)
                .map_err(|e| HttpError::InvalidHeader(format!("user-agent: {e}")))?;
            headers.insert(USER_AGENT, agent);
        }
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        Ok(headers)
    }
}

fn build_client(max_redirects: usize) -> Result<Client, HttpError> {
    Client::builder()
        .redirect(reqwest::redirect::Policy::limited(max_redirects))
        .build()
        .map_err(|e| HttpError::Client(e.to_string()))
}

async fn send(request: reqwest::RequestBuilder, timeout: Duration) -> Result<RawResponse, HttpError> {
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            HttpError::Timeout(millis(timeout))
        } else {
            HttpError::Network(e.to_string())
        }
    };

    let response = request.send().await.map_err(classify)?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.map_err(classify)?;

    Ok(RawResponse {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_owned(),
        headers,
        body,
    })
}

fn capture_headers(headers: &HeaderMap) -> std::collections::BTreeMap<String, String> {
    sanitize_headers(
        headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use courier_auth::AuthConfig;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::config::HttpMethod;

    /// A minimal mock HTTP server that answers connections from a script of
    /// canned responses, one per connection.
    struct MockHttpServer {
        listener: tokio::net::TcpListener,
        base_url: String,
    }

    impl MockHttpServer {
        async fn start() -> Self {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("failed to bind mock server");
            let port = listener.local_addr().unwrap().port();
            Self {
                listener,
                base_url: format!("http://127.0.0.1:{port}"),
            }
        }

        /// Serve each `(status, body)` in turn, counting connections. Returns
        /// the raw requests.
        async fn respond_sequence(
            self,
            script: Vec<(u16, &'static str)>,
            hits: Arc<AtomicU32>,
        ) -> Vec<String> {
            let mut requests = Vec::new();
            for (status_code, body) in script {
                let (mut stream, _) = self.listener.accept().await.unwrap();
                hits.fetch_add(1, Ordering::SeqCst);

                requests.push(read_request(&mut stream).await);

                let response = format!(
                    "HTTP/1.1 {status_code} Mock\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: {}\r\n\
                     Set-Cookie: session=abcdef123456\r\n\
                     Connection: close\r\n\
                     \r\n\
                     {body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            requests
        }

        /// Accept one connection and never answer it.
        async fn hang(self) {
            let (_stream, _) = self.listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }

    /// Read headers plus `Content-Length` bytes of body.
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = vec![0u8; 16384];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).into_owned();
            if n == 0 {
                return text;
            }
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= header_end + 4 + content_length {
                    return text;
                }
            }
        }
    }

    fn dispatcher() -> HttpDispatcher {
        HttpDispatcher::new(DispatcherSettings::default().with_user_agent("courier-test/1.0")).unwrap()
    }

    #[tokio::test]
    async fn success_sets_defaults_and_merges_headers() {
        let server = MockHttpServer::start().await;
        let url = format!("{}/hook", server.base_url);
        let hits = Arc::new(AtomicU32::new(0));
        let handle = tokio::spawn(server.respond_sequence(vec![(200, r#"{"ok":true}"#)], hits));

        let config = HttpRequestConfig::post(url)
            .with_auth(AuthConfig::Bearer {
                token: "from-auth-1234".into(),
            })
            .with_header("Authorization", "Bearer explicit")
            .with_header("X-Trace", "t-1")
            .with_query("source", "test")
            .with_body(json!({"event": "created"}));

        let result = dispatcher().execute(&config).await.unwrap();
        let requests = handle.await.unwrap();
        let request = requests[0].to_ascii_lowercase();

        assert!(result.success());
        assert_eq!(result.status(), Some(200));
        assert_eq!(result.result.response_body.as_deref(), Some(r#"{"ok":true}"#));
        assert!(request.starts_with("post /hook?source=test "));
        assert!(request.contains("authorization: bearer from-auth-1234"));
        assert!(request.contains("x-trace: t-1"));
        assert!(request.contains("user-agent: courier-test/1.0"));
        assert!(request.contains("content-type: application/json"));
        assert!(request.contains(r#"{"event":"created"}"#));

        assert_eq!(result.request.headers["authorization"], "...1234");
        let response = result.response.unwrap();
        assert_eq!(response.headers["set-cookie"], "session=abcdef123456");
    }

    #[tokio::test]
    async fn non_2xx_is_reported_not_raised() {
        let server = MockHttpServer::start().await;
        let url = server.base_url.clone();
        let hits = Arc::new(AtomicU32::new(0));
        let handle = tokio::spawn(server.respond_sequence(
            vec![(404, r#"{"error":"nope"}"#), (404, "{}")],
            hits,
        ));

        let dispatcher = dispatcher();
        let config = HttpRequestConfig::get(url);
        let result = dispatcher.execute(&config).await.unwrap();
        assert!(!result.success());
        assert_eq!(result.result.error.as_deref(), Some("HTTP 404 Not Found"));

        let result = dispatcher
            .execute(&config.clone().without_status_validation())
            .await
            .unwrap();
        assert!(!result.success());
        assert!(result.result.error.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn retry_until_success_after_5xx() {
        let server = MockHttpServer::start().await;
        let url = server.base_url.clone();
        let hits = Arc::new(AtomicU32::new(0));
        let handle = tokio::spawn(server.respond_sequence(
            vec![(503, "{}"), (503, "{}"), (200, r#"{"ok":true}"#)],
            Arc::clone(&hits),
        ));

        let result = dispatcher()
            .execute_with_retry(
                &HttpRequestConfig::post(url),
                2,
                Duration::from_millis(5),
                2.0,
            )
            .await
            .unwrap();
        handle.await.unwrap();

        assert!(result.success());
        assert_eq!(result.result.retries, Some(2));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_immediately_on_4xx() {
        let server = MockHttpServer::start().await;
        let url = server.base_url.clone();
        let hits = Arc::new(AtomicU32::new(0));
        let handle = tokio::spawn(server.respond_sequence(vec![(404, "{}")], Arc::clone(&hits)));

        let result = dispatcher()
            .execute_with_retry(
                &HttpRequestConfig::post(url),
                2,
                Duration::from_millis(5),
                2.0,
            )
            .await
            .unwrap();
        handle.await.unwrap();

        assert!(!result.success());
        assert_eq!(result.result.retries, Some(0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_last_status() {
        let server = MockHttpServer::start().await;
        let url = server.base_url.clone();
        let hits = Arc::new(AtomicU32::new(0));
        let handle = tokio::spawn(server.respond_sequence(
            vec![(500, "{}"), (502, "{}")],
            Arc::clone(&hits),
        ));

        let result = dispatcher()
            .execute_with_retry(&HttpRequestConfig::post(url), 1, Duration::from_millis(5), 2.0)
            .await
            .unwrap();
        handle.await.unwrap();

        assert!(!result.success());
        assert_eq!(result.result.retries, Some(1));
        assert_eq!(result.result.error.as_deref(), Some("HTTP 502 Bad Gateway"));
    }

    #[tokio::test]
    async fn network_failure_is_a_result() {
        // Bind then drop to get a port nothing listens on.
        let url = {
            let server = MockHttpServer::start().await;
            server.base_url.clone()
        };
        let result = dispatcher().execute(&HttpRequestConfig::get(url)).await.unwrap();
        assert!(!result.success());
        assert!(result.status().is_none());
        assert!(result.result.error.unwrap().starts_with("network error"));
    }

    #[tokio::test]
    async fn per_call_timeout() {
        let server = MockHttpServer::start().await;
        let url = server.base_url.clone();
        let handle = tokio::spawn(server.hang());

        let config = HttpRequestConfig::get(url).with_timeout(Duration::from_millis(50));
        let result = dispatcher().execute(&config).await.unwrap();
        handle.abort();

        assert!(!result.success());
        assert!(result.result.is_timeout());
        assert_eq!(result.result.error.as_deref(), Some("Timeout after 50ms"));
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_request() {
        let server = MockHttpServer::start().await;
        let url = server.base_url.clone();
        let handle = tokio::spawn(server.hang());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = dispatcher()
            .execute_with_strategy(
                &HttpRequestConfig::get(url),
                5,
                &RetryStrategy::default(),
                &cancel,
            )
            .await
            .unwrap();
        handle.abort();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.result.error.as_deref(), Some("request cancelled"));
        assert_eq!(result.result.retries, Some(0));
    }

    #[tokio::test]
    async fn invalid_auth_is_an_error() {
        let config = HttpRequestConfig::new(HttpMethod::Put, "https://example.com").with_auth(
            AuthConfig::Basic {
                username: String::new(),
                password: "x".into(),
            },
        );
        let err = dispatcher().execute(&config).await.unwrap_err();
        assert!(matches!(err, HttpError::Auth(_)));
    }
}
