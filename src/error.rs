use std::path::PathBuf;

use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::{StatusCode, header::InvalidHeaderValue},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    resolver::{FetchError, ResolveError},
    validate::{DownloadKind, InvalidUrl},
};

/// Every way a download request can end without a file.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidUrl),
    #[error(transparent)]
    MissingQuery(#[from] QueryRejection),
    #[error("{}", no_stream_message(.0))]
    NoStreamAvailable(DownloadKind),
    #[error("File not found after download.")]
    ArtifactMissing { path: PathBuf },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("scratch storage failure at {}: {source}", .path.display())]
    Scratch {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not build response header: {0}")]
    Header(#[from] InvalidHeaderValue),
}

fn no_stream_message(kind: &DownloadKind) -> &'static str {
    match kind {
        DownloadKind::Video => "No downloadable MP4 video stream found.",
        DownloadKind::Audio => "No audio stream found for this video.",
    }
}

impl DownloadError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::MissingQuery(_) => StatusCode::BAD_REQUEST,
            Self::NoStreamAvailable(_)
            | Self::ArtifactMissing { .. }
            | Self::Resolve(ResolveError::Unavailable(_)) => StatusCode::NOT_FOUND,
            Self::Resolve(_) | Self::Fetch(_) | Self::Scratch { .. } | Self::Header(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl From<DownloadError> for ApiError {
    fn from(error: DownloadError) -> Self {
        let status = error.status();
        let message = match &error {
            DownloadError::Resolve(ResolveError::Unavailable(reason)) => {
                format!("Video unavailable: {reason}")
            }
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
                format!("An internal error occurred: {error}")
            }
            _ => error.to_string(),
        };

        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.message })).into_response()
    }
}
