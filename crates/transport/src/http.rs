use std::sync::Arc;

use core_types::{ClientError, ClientResult, SessionTerminator};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::Form;
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub use reqwest::Method;

const API_KEY_HEADER: &str = "x-api-key";
const GENERIC_FAILURE: &str = "Request failed";

pub enum RequestBody {
    Empty,
    Json(Value),
    /// Raw multipart payload; the content type is left to reqwest so it can
    /// pick the boundary.
    Multipart(Form),
}

pub struct RequestOptions {
    pub method: Method,
    pub body: RequestBody,
    pub token: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: RequestBody::Empty,
            token: None,
            headers: Vec::new(),
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post() -> Self {
        Self {
            method: Method::POST,
            ..Self::default()
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, form: Form) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn token(mut self, token: Option<&str>) -> Self {
        self.token = token.map(str::to_string);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// The one function every backend call goes through.
pub struct HttpTransport {
    client: reqwest::Client,
    api_key: String,
    terminator: Arc<dyn SessionTerminator>,
}

impl HttpTransport {
    pub fn new(api_key: impl Into<String>, terminator: Arc<dyn SessionTerminator>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            terminator,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub async fn send(&self, url: &str, options: RequestOptions) -> ClientResult<Value> {
        let RequestOptions {
            method,
            body,
            token,
            headers: extra_headers,
        } = options;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| ClientError::validation("invalid service credential"))?,
        );
        apply_extra_headers(&mut headers, &extra_headers)?;
        if let Some(token) = token.as_deref() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                    .map_err(|_| ClientError::validation("invalid authorization token"))?,
            );
        }
        if !matches!(body, RequestBody::Multipart(_)) {
            headers.insert(
                reqwest::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        let mut request = self.client.request(method.clone(), url).headers(headers);
        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.body(value.to_string()),
            RequestBody::Multipart(form) => request.multipart(form),
        };

        debug!(%method, url, "sending request");
        let response = request
            .send()
            .await
            .map_err(|err| ClientError::Network(err.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!(url, "request rejected as unauthorized, ending session");
            self.terminator.terminate();
            return Err(ClientError::AuthExpired);
        }

        // A body that fails to read counts as empty.
        let text = response.text().await.unwrap_or_else(|err| {
            warn!(url, error = %err, "failed to read response body");
            String::new()
        });
        let data = parse_body(url, &text);

        if !status.is_success() {
            let message = error_message(&data);
            warn!(url, status = status.as_u16(), %message, "request failed");
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(data)
    }
}

fn apply_extra_headers(
    headers: &mut HeaderMap,
    extra_headers: &[(String, String)],
) -> ClientResult<()> {
    for (key, value) in extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| ClientError::validation(format!("invalid header name: {key}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ClientError::validation(format!("invalid header value for {key}")))?;
        headers.insert(name, value);
    }
    Ok(())
}

/// Bodies that are not JSON degrade to an empty object.
fn parse_body(url: &str, text: &str) -> Value {
    match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(url, error = %err, "response body is not JSON, substituting empty object");
            Value::Object(Map::new())
        }
    }
}

fn error_message(data: &Value) -> String {
    ["detail", "error"]
        .iter()
        .filter_map(|field| data.get(*field))
        .find_map(|value| match value {
            Value::Null => None,
            Value::String(text) if text.is_empty() => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        })
        .unwrap_or_else(|| GENERIC_FAILURE.to_string())
}
