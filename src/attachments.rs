use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

pub const MAX_ATTACHMENTS: usize = 10;

/// File reference stored inline on tasks, messages and tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub content_type: Option<String>,
    pub name: String,
}

pub fn attachments_to_value(attachments: Vec<Attachment>) -> AppResult<Value> {
    if attachments.len() > MAX_ATTACHMENTS {
        return Err(AppError::bad_request(format!(
            "at most {MAX_ATTACHMENTS} attachments are allowed"
        )));
    }

    let mut cleaned = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let url = attachment.url.trim();
        let name = attachment.name.trim();
        if url.is_empty() || name.is_empty() {
            return Err(AppError::bad_request("attachments need a url and a name"));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppError::bad_request("attachment url must be http(s)"));
        }
        cleaned.push(Attachment {
            url: url.to_string(),
            content_type: attachment
                .content_type
                .map(|ct| ct.trim().to_string())
                .filter(|ct| !ct.is_empty()),
            name: name.to_string(),
        });
    }

    Ok(serde_json::to_value(cleaned)?)
}
