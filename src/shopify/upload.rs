use crate::http::build_client;
use crate::shopify::staged_upload::StagedTarget;
use reqwest::multipart::{Form, Part};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("staging store answered HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("upload request failed: {0}")]
    Transport(String),
}

/// Push the binary payload to the staged target. Every signed parameter is
/// appended first, in the order the platform supplied them, then the payload
/// itself under the conventional `file` field. One attempt, no retry.
pub async fn upload_to_staged_target(
    target: &StagedTarget,
    bytes: Vec<u8>,
) -> Result<(), UploadError> {
    let byte_count = bytes.len();
    let mut form = Form::new();
    for parameter in &target.parameters {
        form = form.text(parameter.name.clone(), parameter.value.clone());
    }
    let part = Part::bytes(bytes).file_name(target.remote_file_name().to_string());
    form = form.part("file", part);

    let response = build_client()
        .post(&target.url)
        .multipart(form)
        .send()
        .await
        .map_err(|err| UploadError::Transport(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UploadError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    debug!(
        target = "subasta.shopify",
        bytes = byte_count,
        "staged upload accepted"
    );
    Ok(())
}
