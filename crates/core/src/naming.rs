//! Filename conventions for persisted and uploaded media.
//!
//! Local names are derived from the job, the media category, the position in
//! the batch and a random suffix, so repeated downloads of the same remote
//! file never collide and never need a lock.

use std::path::Path;

use crate::media::MediaKind;

/// Fallback upload name when the caller supplied nothing usable.
pub const DEFAULT_UPLOAD_NAME: &str = "upload.png";

/// Random 32-character lowercase hex suffix.
pub fn random_hex() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Compose the local filename for the `index`-th (1-based) item of a batch.
///
/// Convention: `{job_id}_{category}_{index:02}_{hex}{extension}`.
pub fn local_media_filename(job_id: &str, kind: &MediaKind, index: usize, extension: &str) -> String {
    format!(
        "{job_id}_{}_{index:02}_{}{extension}",
        kind.as_key(),
        random_hex()
    )
}

/// Compose an engine upload name: `{prefix}_{hex}{extension}`.
pub fn upload_filename(prefix: &str, extension: &str) -> String {
    format!("{prefix}_{}{extension}", random_hex())
}

/// Extension of a filename including the leading dot, if any.
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
}

/// Preferred extension (with dot) for a mime type such as `image/webp`.
///
/// Parameters after `;` are ignored. When several extensions are registered
/// the one matching the subtype wins, otherwise the first.
pub fn extension_for_mime(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    if essence.is_empty() {
        return None;
    }
    let candidates = mime_guess::get_mime_extensions_str(&essence)?;
    let subtype = essence.split('/').nth(1).unwrap_or_default();
    candidates
        .iter()
        .find(|ext| **ext == subtype)
        .or_else(|| candidates.first())
        .map(|ext| format!(".{ext}"))
}

/// Mime type guessed from a filename's extension.
pub fn mime_for_filename(filename: &str) -> Option<String> {
    mime_guess::from_path(filename)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

/// Pick the extension for a downloaded file.
///
/// Priority: usable format hint, then the remote filename's own extension,
/// then the response content type, then the category default.
pub fn resolve_extension(
    format_hint: Option<&str>,
    remote_filename: &str,
    content_type: Option<&str>,
    kind: &MediaKind,
) -> String {
    if let Some(ext) = format_hint.and_then(format_hint_extension) {
        return ext;
    }
    if let Some(ext) = file_extension(remote_filename) {
        return ext;
    }
    content_type
        .and_then(extension_for_mime)
        .unwrap_or_else(|| kind.default_extension().to_string())
}

/// Turn an engine format hint into an extension.
///
/// Accepts a bare token (`mp4`, `.webm`) or a mime-like value. Video nodes
/// report formats such as `video/h264-mp4`; those map through the mime
/// table first, then fall back to the token after the last `/` or `-`.
/// Anything else yields `None`.
fn format_hint_extension(hint: &str) -> Option<String> {
    let hint = hint.trim().trim_start_matches('.');
    if is_extension_token(hint) {
        return Some(format!(".{hint}"));
    }
    if !hint.contains('/') {
        return None;
    }
    if let Some(ext) = extension_for_mime(hint) {
        return Some(ext);
    }
    hint.rsplit(['/', '-'])
        .next()
        .filter(|token| is_extension_token(token))
        .map(|token| format!(".{}", token.to_ascii_lowercase()))
}

fn is_extension_token(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Reduce a user-supplied filename to a safe basename.
///
/// Directory components are dropped and anything outside `[A-Za-z0-9._-]`
/// becomes `_`. Leading dots are stripped so the result is never hidden or
/// a parent reference. May return an empty string.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_string()
}
