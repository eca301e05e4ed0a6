//! Multipart audio upload intake.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, Multipart};
use axum::extract::State;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::AppState;
use crate::analysis::command::Invocation;
use crate::errors::{Error, Result};
use crate::jobs::AnalysisJob;

/// Audio container/codec suffixes accepted for upload.
const ALLOWED_EXTENSIONS: [&str; 9] = [
    ".mp3", ".wav", ".ogg", ".aiff", ".aac", ".m4a", ".opus", ".flac", ".wma",
];

/// Accept one audio file, store it, and dispatch the background analysis.
///
/// The response confirms the upload only; the analysis result arrives on
/// the event stream once the subprocess finishes, and never changes the
/// status returned here.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<&'static str> {
    fs::create_dir_all(&state.config.storage.dir).await.map_err(|e| {
        tracing::error!(
            dir = %state.config.storage.dir.display(),
            error = %e,
            "Cannot create storage directory"
        );
        Error::Internal {
            operation: "create storage directory".to_string(),
        }
    })?;

    let mut stored: Option<PathBuf> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {e}"),
    })? {
        if field.name() != Some("file") {
            // Ignore unknown fields (forward compatibility)
            continue;
        }

        let file_name = field
            .file_name()
            .map(sanitize_file_name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::BadRequest {
                message: "Invalid file".to_string(),
            })?;

        if !has_allowed_extension(&file_name) {
            return Err(Error::BadRequest {
                message: "File format not allowed".to_string(),
            });
        }

        let path = state.config.storage.dir.join(&file_name);
        stored = Some(write_field(field, &path, state.config.storage.max_upload_size).await?);
        // Exactly one file field is used; anything after it is ignored
        break;
    }

    let path = stored.ok_or_else(|| Error::BadRequest {
        message: "Invalid file".to_string(),
    })?;

    tracing::info!(file = %path.display(), "File uploaded");

    let invocation = Invocation::loudness_scan(
        &state.config.analysis.program,
        &path,
        &state.config.analysis.graph_color,
    );
    let _ = state.jobs.dispatch(AnalysisJob { file: path, invocation });

    Ok("Upload ready\n")
}

/// Strip any directory component from a client-supplied name.
fn sanitize_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|base| base.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn has_allowed_extension(name: &str) -> bool {
    let lower = name.to_lowercase();
    ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Stream one multipart field to `path`, enforcing the size cap.
///
/// An oversized upload removes the partial file before returning; other
/// write failures leave whatever was written behind and surface as a 500.
async fn write_field(mut field: Field<'_>, path: &Path, max_size: u64) -> Result<PathBuf> {
    let mut dst = fs::File::create(path).await.map_err(|e| {
        tracing::error!(file = %path.display(), error = %e, "Cannot create file");
        Error::Internal {
            operation: "create upload file".to_string(),
        }
    })?;

    let mut total: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                return Err(Error::BadRequest {
                    message: format!("Failed to read file: {e}"),
                });
            }
        };

        total += chunk.len() as u64;
        if total > max_size {
            drop(dst);
            let _ = fs::remove_file(path).await;
            tracing::warn!(file = %path.display(), max_size, "Upload exceeds size cap, rejected");
            return Err(Error::BadRequest {
                message: "File too big".to_string(),
            });
        }

        dst.write_all(&chunk).await.map_err(|e| {
            tracing::error!(file = %path.display(), error = %e, "Cannot save file");
            Error::Internal {
                operation: "write upload file".to_string(),
            }
        })?;
    }

    dst.flush().await.map_err(|e| {
        tracing::error!(file = %path.display(), error = %e, "Cannot save file");
        Error::Internal {
            operation: "write upload file".to_string(),
        }
    })?;

    Ok(path.to_path_buf())
}
