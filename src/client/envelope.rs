//! Response envelope and content negotiation.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{ApiError, ApiResult};

/// Uniform result shape handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
  #[serde(default)]
  pub data: Value,
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub errors: Option<Value>,
}

impl Envelope {
  pub fn ok(data: Value) -> Self {
    Self {
      data,
      success: true,
      message: None,
      errors: None,
    }
  }

  /// Successful envelope carrying only a message.
  pub fn message(message: impl Into<String>) -> Self {
    Self {
      data: Value::Null,
      success: true,
      message: Some(message.into()),
      errors: None,
    }
  }

  /// Field-level validation failure, returned inline rather than thrown.
  pub fn validation(errors: Value) -> Self {
    Self {
      data: Value::Null,
      success: false,
      message: crate::error::extract_message(&errors),
      errors: Some(errors),
    }
  }

  /// Synthetic success for writes buffered while offline.
  pub fn queued_offline() -> Self {
    Self::message("Queued offline")
  }

  /// Decode `data` into a caller type.
  pub fn data_as<T: DeserializeOwned>(&self) -> ApiResult<T> {
    serde_json::from_value(self.data.clone())
      .map_err(|e| ApiError::Config(format!("Unexpected response shape: {}", e)))
  }

  /// Turn an inline validation failure into an error.
  pub fn into_result(self) -> ApiResult<Self> {
    if self.success {
      Ok(self)
    } else {
      Err(ApiError::Validation(self.errors.unwrap_or(Value::Null)))
    }
  }
}

/// Attachment or spreadsheet download.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryPayload {
  pub content_type: Option<String>,
  pub filename: Option<String>,
  pub bytes: Vec<u8>,
}

/// Decoded response: either a JSON envelope or a raw binary payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
  Envelope(Envelope),
  Binary(BinaryPayload),
}

impl ApiResponse {
  pub fn envelope(&self) -> Option<&Envelope> {
    match self {
      ApiResponse::Envelope(envelope) => Some(envelope),
      ApiResponse::Binary(_) => None,
    }
  }

  /// Envelope view of the response; binary payloads become an empty success.
  pub fn into_envelope(self) -> Envelope {
    match self {
      ApiResponse::Envelope(envelope) => envelope,
      ApiResponse::Binary(payload) => Envelope {
        data: Value::Null,
        success: true,
        message: payload.filename,
        errors: None,
      },
    }
  }

  pub fn is_success(&self) -> bool {
    match self {
      ApiResponse::Envelope(envelope) => envelope.success,
      ApiResponse::Binary(_) => true,
    }
  }
}

/// Body shapes a backend may answer with, tried in order.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireBody {
  /// Already enveloped: `{ "success": .., "data": .. }`
  Enveloped(Envelope),
  /// Anything else is the payload itself
  Raw(Value),
}

/// Decode a successful response body.
///
/// Attachments and spreadsheet/CSV content types are returned as binary,
/// empty bodies as a null-data success. Bodies that fail to parse are also
/// treated as a null-data success.
pub fn decode_success(
  content_type: Option<&str>,
  content_disposition: Option<&str>,
  body: &[u8],
) -> ApiResponse {
  if is_binary(content_type, content_disposition) {
    return ApiResponse::Binary(BinaryPayload {
      content_type: content_type.map(String::from),
      filename: content_disposition.and_then(attachment_filename),
      bytes: body.to_vec(),
    });
  }

  if body.iter().all(u8::is_ascii_whitespace) {
    return ApiResponse::Envelope(Envelope::ok(Value::Null));
  }

  match serde_json::from_slice::<WireBody>(body) {
    Ok(WireBody::Enveloped(envelope)) => ApiResponse::Envelope(envelope),
    Ok(WireBody::Raw(value)) => ApiResponse::Envelope(Envelope::ok(value)),
    Err(e) => {
      warn!(error = %e, "response body is not JSON, treating as empty");
      ApiResponse::Envelope(Envelope::ok(Value::Null))
    }
  }
}

/// Best-effort JSON decode of an error body.
pub fn decode_error_body(body: &[u8]) -> Option<Value> {
  serde_json::from_slice::<Value>(body)
    .ok()
    .filter(|v| v.is_object() || v.is_array())
}

fn is_binary(content_type: Option<&str>, content_disposition: Option<&str>) -> bool {
  if content_disposition
    .map(|d| d.to_ascii_lowercase().contains("attachment"))
    .unwrap_or(false)
  {
    return true;
  }

  content_type
    .map(|t| {
      let t = t.to_ascii_lowercase();
      t.contains("spreadsheet")
        || t.contains("ms-excel")
        || t.contains("text/csv")
        || t.contains("octet-stream")
    })
    .unwrap_or(false)
}

/// Filename suggested by `content-disposition`, reduced to its final path
/// component so a download can never land outside the target directory.
fn attachment_filename(disposition: &str) -> Option<String> {
  let name = disposition
    .split(';')
    .map(str::trim)
    .find_map(|part| part.strip_prefix("filename="))?
    .trim_matches('"');

  let base = name.rsplit(['/', '\\']).next()?.trim();
  match base {
    "" | "." | ".." => None,
    base => Some(base.to_string()),
  }
}
