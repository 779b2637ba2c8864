//! Face embedder client.
//!
//! The model runs out of process; we post the normalised JPEG and get back
//! one vector per image. Responses may be a bare object or the list format
//! DeepFace's `represent` produces.

use std::time::Duration;

use serde::Deserialize;

use crate::config::EmbedderConfig;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("No face detected in image")]
    NoFaceDetected,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Embedder unavailable: {0}")]
    Unavailable(String),
}

pub trait Embedder: Send + Sync {
    fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError>;
}

#[derive(Deserialize)]
struct Representation {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbedResponse {
    Single(Representation),
    Faces(Vec<Representation>),
}

/// HTTP client for the model server.
pub struct RemoteEmbedder {
    client: reqwest::blocking::Client,
    url: String,
    dimensions: usize,
}

impl RemoteEmbedder {
    /// Must be called outside of an async runtime.
    pub fn new(config: &EmbedderConfig, dimensions: usize) -> Result<Self, EmbedError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            dimensions,
        })
    }
}

impl Embedder for RemoteEmbedder {
    fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(image.to_vec())
            .send()?;

        let status = response.status().as_u16();
        let body = response.bytes()?;
        parse_response(status, &body, self.dimensions)
    }
}

/// Interpret a model server reply.
pub fn parse_response(status: u16, body: &[u8], dimensions: usize) -> Result<Vec<f32>, EmbedError> {
    match status {
        200..=299 => {}
        422 => return Err(EmbedError::NoFaceDetected),
        _ => {
            let text = String::from_utf8_lossy(body);
            return Err(EmbedError::Unavailable(format!(
                "status {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }
    }

    let response: EmbedResponse =
        serde_json::from_slice(body).map_err(|e| EmbedError::InvalidResponse(e.to_string()))?;

    let embedding = match response {
        EmbedResponse::Single(face) => face.embedding,
        EmbedResponse::Faces(faces) => match faces.into_iter().next() {
            Some(face) => face.embedding,
            None => return Err(EmbedError::NoFaceDetected),
        },
    };

    if embedding.len() != dimensions {
        return Err(EmbedError::InvalidResponse(format!(
            "expected {dimensions} dimensions, got {}",
            embedding.len()
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(EmbedError::InvalidResponse(
            "embedding contains NaN or infinite values".to_string(),
        ));
    }

    Ok(embedding)
}
