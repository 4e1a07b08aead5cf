use crate::import::error::ImportError;
use crate::models::PostRecord;

/// Parse the upstream payload. All-or-nothing: any malformed element fails the whole body.
pub fn decode_posts(body: &str) -> Result<Vec<PostRecord>, ImportError> {
    let records: Vec<PostRecord> = serde_json::from_str(body)?;
    log::debug!("decode: {} post records", records.len());
    Ok(records)
}
