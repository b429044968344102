use std::fs;
use std::io::Write;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response, multipart};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{Credentials, HttpSettings};
use crate::entity::{EntityKind, Record};

pub const POST_STATUSES: &str = "draft,publish,pending";

/// The REST surface the migration needs from a WordPress site.
pub trait WordPressApi {
    fn list(&mut self, kind: EntityKind, per_page: usize, offset: usize) -> Result<Vec<Record>>;
    fn get(&mut self, kind: EntityKind, id: i64) -> Result<Record>;
    fn create(&mut self, kind: EntityKind, fields: &Map<String, Value>) -> Result<Record>;
    fn upload_media(&mut self, file: &Path, fields: &Map<String, Value>) -> Result<Record>;
    fn request_count(&self) -> usize;
}

/// Plain web access outside the REST API: permalink pages and asset files.
pub trait AssetFetcher {
    fn fetch_html(&mut self, url: &str) -> Result<String>;
    fn download(&mut self, url: &str, destination: &Path) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct WordPressClientConfig {
    pub host: String,
    pub credentials: Option<Credentials>,
    pub http: HttpSettings,
}

pub struct WordPressClient {
    client: Client,
    config: WordPressClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl WordPressClient {
    pub fn new(config: WordPressClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http.timeout)
            .user_agent(config.http.user_agent.clone())
            .build()
            .context("failed to build WordPress HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    fn endpoint_url(&self, kind: EntityKind) -> String {
        format!("{}/wp-json/wp/v2/{}", self.config.host, kind.endpoint())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.credentials {
            Some(credentials) => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => request,
        }
    }

    /// Send a request built by `build`, retrying transient failures within the
    /// configured budget. `build` runs once per attempt.
    fn send_with_retry<F>(&mut self, description: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> Result<RequestBuilder>,
    {
        let max_retries = self.config.http.retries;
        for attempt in 0..=max_retries {
            self.apply_rate_limit();
            let request = self.authorize(build(&self.client)?);
            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if attempt < max_retries && is_retryable_status(status) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(decode_error_response(response))
                        .with_context(|| format!("{description} failed"));
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("{description} failed"));
                }
            }
        }

        bail!("{description} exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = self.config.http.min_interval;
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = u64::try_from(self.config.http.retry_delay.as_millis())
            .unwrap_or(u64::MAX)
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl WordPressApi for WordPressClient {
    fn list(&mut self, kind: EntityKind, per_page: usize, offset: usize) -> Result<Vec<Record>> {
        let url = self.endpoint_url(kind);
        let mut query = vec![
            ("per_page", per_page.to_string()),
            ("offset", offset.to_string()),
        ];
        if kind == EntityKind::Post {
            query.push(("status", POST_STATUSES.to_string()));
        }
        if kind == EntityKind::User && self.config.credentials.is_some() {
            // Only the edit context exposes email addresses.
            query.push(("context", "edit".to_string()));
        }
        debug!(%kind, per_page, offset, "listing {url}");

        let response = self.send_with_retry(&format!("list {}", kind.endpoint()), |client| {
            Ok(client.get(&url).query(&query))
        })?;
        let payload: Value = response
            .json()
            .with_context(|| format!("failed to decode {} listing JSON", kind.endpoint()))?;
        match payload {
            Value::Array(items) => items.into_iter().map(Record::from_value).collect(),
            _ => bail!("expected a JSON array from {}", kind.endpoint()),
        }
    }

    fn get(&mut self, kind: EntityKind, id: i64) -> Result<Record> {
        let url = format!("{}/{id}", self.endpoint_url(kind));
        let response = self.send_with_retry(&format!("get {} {id}", kind.endpoint()), |client| {
            Ok(client.get(&url))
        })?;
        let payload: Value = response
            .json()
            .with_context(|| format!("failed to decode {} {id} JSON", kind.endpoint()))?;
        Record::from_value(payload)
    }

    fn create(&mut self, kind: EntityKind, fields: &Map<String, Value>) -> Result<Record> {
        let url = self.endpoint_url(kind);
        let body = Value::Object(fields.clone());
        let response = self.send_with_retry(&format!("create {}", kind.endpoint()), |client| {
            Ok(client.post(&url).json(&body))
        })?;
        let payload: Value = response
            .json()
            .with_context(|| format!("failed to decode created {} JSON", kind.as_str()))?;
        Record::from_value(payload)
    }

    fn upload_media(&mut self, file: &Path, fields: &Map<String, Value>) -> Result<Record> {
        let url = self.endpoint_url(EntityKind::Media);
        let response = self.send_with_retry("upload media", |client| {
            let mut form = multipart::Form::new();
            for (key, value) in fields {
                let text = match value {
                    Value::String(text) => text.clone(),
                    Value::Null => continue,
                    other => other.to_string(),
                };
                form = form.text(key.clone(), text);
            }
            let form = form
                .file("file", file)
                .with_context(|| format!("failed to attach {}", file.display()))?;
            Ok(client.post(&url).multipart(form))
        })?;
        let payload: Value = response
            .json()
            .context("failed to decode uploaded media JSON")?;
        Record::from_value(payload)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl AssetFetcher for WordPressClient {
    fn fetch_html(&mut self, url: &str) -> Result<String> {
        let target = url.to_string();
        let response = self.send_with_retry(&format!("fetch {url}"), |client| {
            Ok(client
                .get(&target)
                .header("Accept", "text/html, */*;q=0.1"))
        })?;
        response
            .text()
            .with_context(|| format!("failed to read body of {url}"))
    }

    fn download(&mut self, url: &str, destination: &Path) -> Result<u64> {
        let target = url.to_string();
        let mut response =
            self.send_with_retry(&format!("download {url}"), |client| Ok(client.get(&target)))?;

        let partial = destination.with_extension(match destination.extension() {
            Some(extension) => format!("{}.part", extension.to_string_lossy()),
            None => "part".to_string(),
        });
        let result = stream_to_file(&mut response, &partial, destination);
        if result.is_err() && partial.exists() {
            let _ = fs::remove_file(&partial);
        }
        result.with_context(|| format!("failed to download {url}"))
    }
}

fn stream_to_file(response: &mut Response, partial: &Path, destination: &Path) -> Result<u64> {
    let mut file = fs::File::create(partial)
        .with_context(|| format!("failed to create {}", partial.display()))?;
    let bytes = response
        .copy_to(&mut file)
        .context("failed to stream response body")?;
    file.flush()
        .with_context(|| format!("failed to flush {}", partial.display()))?;
    fs::rename(partial, destination)
        .with_context(|| format!("failed to move download into {}", destination.display()))?;
    Ok(bytes)
}

/// Turn a non-2xx response into an error, using the WordPress error payload
/// (`{"code", "message", "data": {"status"}}`) when the body carries one.
fn decode_error_response(response: Response) -> anyhow::Error {
    let status = response.status();
    let body = response.text().unwrap_or_default();
    anyhow::anyhow!(describe_api_error(status, &body))
}

pub(crate) fn describe_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<Value>(body)
        && let Some(code) = payload.get("code").and_then(Value::as_str)
    {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return format!(
            "wordpress API error [{code}] (HTTP {}): {message}",
            status.as_u16()
        );
    }
    format!("request failed with HTTP {status}")
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
