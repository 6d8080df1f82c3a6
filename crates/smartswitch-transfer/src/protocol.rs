//! Wire format for a transfer connection.
//!
//! ```text
//! [meta_len(4 bytes BE)][FileTransferInfo JSON][file_size raw bytes]
//! ```
//!
//! Repeated once per file on the same TCP stream; there is no
//! end-of-session marker — closing the connection ends the batch.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use smartswitch_types::FileTransferInfo;

use crate::error::TransferError;

/// Copy unit for file bytes (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Largest metadata record we will read. Bounds allocation from a
/// corrupt or hostile length prefix.
pub const MAX_METADATA_LEN: u32 = 64 * 1024;

/// Write one length-framed metadata record.
pub async fn write_metadata<W>(writer: &mut W, info: &FileTransferInfo) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(info)?;
    let len = body.len() as u32;
    if len > MAX_METADATA_LEN {
        return Err(TransferError::MetadataTooLarge(len));
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    Ok(())
}

/// Read one length-framed metadata record.
///
/// Returns `Ok(None)` on a clean end-of-stream at a record boundary —
/// the peer finished its batch and closed. EOF inside a record is an
/// error.
pub async fn read_metadata<R>(reader: &mut R) -> Result<Option<FileTransferInfo>, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    // Distinguish "no next record" from a torn prefix: a zero-byte
    // first read is the clean case.
    let first = reader.read(&mut len_buf[..1]).await?;
    if first == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;

    let len = u32::from_be_bytes(len_buf);
    if len == 0 || len > MAX_METADATA_LEN {
        return Err(TransferError::MetadataTooLarge(len));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    let info: FileTransferInfo = serde_json::from_slice(&body)?;
    info.validate()
        .map_err(|e| TransferError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    Ok(Some(info))
}

/// MIME type from a file extension, matching what the sender reports
/// in `FileTransferInfo::file_type`.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "json" => "application/json",
        "zip" => "application/zip",
        "apk" => "application/vnd.android.package-archive",
        "vcf" => "text/vcard",
        _ => "application/octet-stream",
    }
}
