//! PDF signature checks on buffers and files.

use std::path::Path;

use tokio::io::AsyncReadExt;

use super::constants::PDF_SIGNATURE;

/// Returns true when `bytes` starts with `%PDF`.
#[must_use]
pub fn has_pdf_signature(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_SIGNATURE)
}

/// Returns true when the file at `path` exists and starts with `%PDF`.
///
/// Missing or unreadable files are reported as `false`.
pub async fn file_has_pdf_signature(path: &Path) -> bool {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return false;
    };
    let mut header = [0u8; 4];
    match file.read_exact(&mut header).await {
        Ok(_) => has_pdf_signature(&header),
        Err(_) => false,
    }
}
