//! HTTP clients for the local model server and the hosted speech API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::audio::wav;

use super::SpeechBackend;
use super::types::{
    BackendError, BackendKind, BackendSettings, HealthResponse, SynthesizeRequest,
    SynthesizedAudio,
};

/// HTTP-based speech backend.
pub struct HttpBackend {
    kind: BackendKind,
    base_url: String,
    client: Client,
    api_key: Option<String>,
    model: Option<String>,
    speed: Option<f32>,
}

#[derive(Serialize)]
struct CloudSpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
    speed: f32,
}

impl HttpBackend {
    /// Client for the model server at `http://{host}:{port}`.
    pub fn local(settings: &BackendSettings) -> Result<Self, BackendError> {
        let local = &settings.local;
        Ok(Self {
            kind: BackendKind::Local,
            base_url: format!("http://{}:{}", local.host, local.port),
            client: build_client(local.timeout_secs)?,
            api_key: None,
            model: None,
            speed: settings.speed,
        })
    }

    /// Client for the hosted API. The key is read from the configured
    /// environment variable; a missing key fails only when a call is made.
    pub fn cloud(settings: &BackendSettings) -> Result<Self, BackendError> {
        let cloud = &settings.cloud;
        Ok(Self {
            kind: BackendKind::Cloud,
            base_url: cloud.base_url.trim_end_matches('/').to_string(),
            client: build_client(cloud.timeout_secs)?,
            api_key: std::env::var(&cloud.api_key_env).ok().filter(|k| !k.is_empty()),
            model: Some(cloud.model.clone()),
            speed: settings.speed,
        })
    }

    /// Get the base URL for this backend.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn synthesize_url(&self) -> String {
        match self.kind {
            BackendKind::Local => format!("{}/synthesize", self.base_url),
            BackendKind::Cloud => format!("{}/v1/audio/speech", self.base_url),
        }
    }

    fn health_url(&self) -> String {
        match self.kind {
            BackendKind::Local => format!("{}/health", self.base_url),
            BackendKind::Cloud => format!("{}/v1/models", self.base_url),
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, BackendError> {
        match self.kind {
            BackendKind::Local => Ok(builder),
            BackendKind::Cloud => {
                let key = self.api_key.as_deref().ok_or_else(|| {
                    BackendError::Configuration("cloud API key is not set".to_string())
                })?;
                Ok(builder.bearer_auth(key))
            }
        }
    }
}

fn build_client(timeout_secs: u64) -> Result<Client, BackendError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BackendError::Configuration(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(e.to_string())
    } else {
        BackendError::Unavailable(e.to_string())
    }
}

/// Map a non-success HTTP status to a typed backend failure.
pub fn classify_status(status: StatusCode, body: &str, retry_after: Option<Duration>) -> BackendError {
    let detail = format!("{status}: {}", body.trim());
    match status.as_u16() {
        429 => BackendError::RateLimited { retry_after },
        408 | 504 => BackendError::Timeout(detail),
        400 | 404 | 422 if body.to_ascii_lowercase().contains("voice") => {
            BackendError::InvalidVoice(detail)
        }
        code if code >= 500 => BackendError::Unavailable(detail),
        _ => BackendError::Rejected(detail),
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl SpeechBackend for HttpBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn render_settings(&self) -> String {
        format!(
            "model={};speed={:.3}",
            self.model.as_deref().unwrap_or_default(),
            self.speed.unwrap_or(1.0)
        )
    }

    async fn health(&self) -> Result<HealthResponse, BackendError> {
        let request = self.authorized(self.client.get(self.health_url()))?;
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, retry_after));
        }

        match self.kind {
            BackendKind::Local => response
                .json()
                .await
                .map_err(|e| BackendError::Rejected(format!("unexpected health payload: {e}"))),
            BackendKind::Cloud => Ok(HealthResponse {
                status: "healthy".to_string(),
                model: self.model.clone(),
                device: None,
            }),
        }
    }

    async fn synthesize(&self, request: &SynthesizeRequest) -> Result<SynthesizedAudio, BackendError> {
        let speed = self.speed.unwrap_or(request.speed);
        let builder = self.client.post(self.synthesize_url());
        let builder = match self.kind {
            BackendKind::Local => builder.json(&SynthesizeRequest {
                speed,
                ..request.clone()
            }),
            BackendKind::Cloud => builder.json(&CloudSpeechRequest {
                model: self.model.as_deref().unwrap_or_default(),
                input: &request.text,
                voice: &request.voice_id,
                response_format: "wav",
                speed,
            }),
        };

        let response = self.authorized(builder)?.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, retry_after));
        }

        let bytes = response.bytes().await.map_err(transport_error)?.to_vec();
        let (duration_ms, sample_rate) =
            wav::probe(&bytes).map_err(|e| BackendError::InvalidAudio(e.to_string()))?;

        debug!(
            backend = self.kind.as_str(),
            voice = %request.voice_id,
            duration_ms,
            "synthesized"
        );
        Ok(SynthesizedAudio {
            bytes,
            duration_ms,
            sample_rate,
        })
    }
}
