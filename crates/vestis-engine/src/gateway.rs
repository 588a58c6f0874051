use anyhow::Context;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;
use thiserror::Error;
use vestis_contracts::search::{ImageAttachment, Query, SchemaError, SearchResponse};

use crate::config::GatewayConfig;

pub const ERROR_BODY_MAX_CHARS: usize = 512;

const TRANSPORT_USER_MESSAGE: &str =
    "Search failed: the search service could not be reached or sent an unreadable response.";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("search backend rejected the request ({status}): {body}")]
    BackendRejected { status: u16, body: String },
    #[error("search backend unreachable: {0}")]
    Transport(String),
    #[error("search backend returned a malformed response: {0}")]
    Malformed(#[from] SchemaError),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BackendRejected { .. } => "backend_rejected",
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::BackendRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text shown to the user when a search fails. Transport and malformed
    /// failures share one generic message.
    pub fn user_message(&self) -> String {
        match self {
            Self::BackendRejected { status, body } => {
                let body = body.trim();
                if body.is_empty() {
                    format!("Search failed ({status})")
                } else {
                    format!(
                        "Search failed ({status}): {}",
                        truncate_text(body, ERROR_BODY_MAX_CHARS)
                    )
                }
            }
            Self::Transport(_) | Self::Malformed(_) => TRANSPORT_USER_MESSAGE.to_string(),
        }
    }
}

/// Issues one search for a query snapshot.
pub trait SearchGateway {
    fn send(&self, query: &Query) -> Result<SearchResponse, GatewayError>;
}

/// Multipart field as it goes on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum FormField {
    Message(String),
    Image {
        filename: String,
        mime_type: String,
        bytes: Vec<u8>,
    },
}

impl FormField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Image { .. } => "image",
        }
    }
}

/// `message` only when the trimmed text is non-empty, `image` only when attached.
pub fn search_form_fields(query: &Query) -> Vec<FormField> {
    let mut fields = Vec::new();
    if query.has_text() {
        fields.push(FormField::Message(query.trimmed_text().to_string()));
    }
    if let Some(image) = query.image() {
        fields.push(FormField::Image {
            filename: image.filename.clone(),
            mime_type: image_mime_type(image),
            bytes: image.bytes.clone(),
        });
    }
    fields
}

fn image_mime_type(image: &ImageAttachment) -> String {
    image
        .mime_type
        .clone()
        .or_else(|| {
            image::guess_format(&image.bytes)
                .ok()
                .map(|format| format.to_mime_type().to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

fn multipart_form(fields: Vec<FormField>) -> Result<MultipartForm, GatewayError> {
    let mut form = MultipartForm::new();
    for field in fields {
        form = match field {
            FormField::Message(text) => form.text("message", text),
            FormField::Image {
                filename,
                mime_type,
                bytes,
            } => {
                let part = MultipartPart::bytes(bytes)
                    .file_name(filename)
                    .mime_str(&mime_type)
                    .map_err(|err| {
                        GatewayError::Transport(format!(
                            "could not encode image part ({mime_type}): {err}"
                        ))
                    })?;
                form.part("image", part)
            }
        };
    }
    Ok(form)
}

/// Talks to the search backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    origin: String,
    http: HttpClient,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build search HTTP client")?;
        Ok(Self::with_client(config.origin.clone(), http))
    }

    pub fn with_client(origin: impl Into<String>, http: HttpClient) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn chat_endpoint(&self) -> String {
        format!("{}/api/chat", self.origin)
    }

    /// `GET /health`; true only for a 2xx `{"ok": true}` answer.
    pub fn health(&self) -> anyhow::Result<bool> {
        let endpoint = format!("{}/health", self.origin);
        let response = self
            .http
            .get(&endpoint)
            .send()
            .with_context(|| format!("health check failed ({endpoint})"))?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let payload: Value = response
            .json()
            .context("health check returned invalid JSON")?;
        Ok(payload.get("ok").and_then(Value::as_bool).unwrap_or(false))
    }
}

impl SearchGateway for HttpGateway {
    fn send(&self, query: &Query) -> Result<SearchResponse, GatewayError> {
        let endpoint = self.chat_endpoint();
        let form = multipart_form(search_form_fields(query))?;
        let response = self
            .http
            .post(&endpoint)
            .multipart(form)
            .send()
            .map_err(|err| GatewayError::Transport(format!("POST {endpoint} failed: {err}")))?;
        search_response_or_error(response)
    }
}

fn search_response_or_error(response: HttpResponse) -> Result<SearchResponse, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(GatewayError::BackendRejected {
            status: status.as_u16(),
            body,
        });
    }
    let body = response
        .text()
        .map_err(|err| GatewayError::Transport(format!("search response body read failed: {err}")))?;
    Ok(SearchResponse::from_json_str(&body)?)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use reqwest::blocking::Client as HttpClient;

    /// Answers exactly one HTTP request with a canned response and hands back
    /// the raw request text it received.
    pub(crate) fn serve_once(
        status_line: &'static str,
        content_type: &'static str,
        body: Vec<u8>,
    ) -> anyhow::Result<(String, JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let origin = format!("http://{}", listener.local_addr()?);
        let handle = thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return String::new();
            };
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            let request = read_request(&mut stream);
            let head = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
            let _ = stream.flush();
            request
        });
        Ok((origin, handle))
    }

    /// An origin nothing is listening on.
    pub(crate) fn closed_origin() -> anyhow::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let origin = format!("http://{}", listener.local_addr()?);
        drop(listener);
        Ok(origin)
    }

    pub(crate) fn local_client() -> anyhow::Result<HttpClient> {
        Ok(HttpClient::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()?)
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(read) => read,
            };
            buf.extend_from_slice(&chunk[..read]);
            if request_complete(&buf) {
                break;
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn request_complete(buf: &[u8]) -> bool {
        let Some(header_end) = buf.windows(4).position(|window| window == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
        let body_len = buf.len() - (header_end + 4);
        if let Some(expected) = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
        {
            return body_len >= expected;
        }
        if headers.contains("transfer-encoding: chunked") {
            return buf.ends_with(b"0\r\n\r\n");
        }
        true
    }
}
