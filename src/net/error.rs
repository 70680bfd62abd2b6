use thiserror::Error;

use super::types::ApiEnvelope;

/// Failure classes of a single HTTP exchange.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("request timed out")]
  Timeout,

  #[error("connection failed: {0}")]
  Connection(String),

  #[error("resource not found")]
  NotFound,

  #[error("server error (status {0})")]
  Server(u16),

  #[error("request rejected (status {status}): {message}")]
  Rejected { status: u16, message: String },

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl FetchError {
  /// Classify a non-2xx response, preferring the server's own message.
  pub fn from_status(status: u16, body: &[u8]) -> Self {
    match status {
      404 => Self::NotFound,
      500..=599 => Self::Server(status),
      _ => {
        let message = serde_json::from_slice::<ApiEnvelope>(body)
          .ok()
          .and_then(|envelope| envelope.message)
          .unwrap_or_else(|| "request failed".to_string());
        Self::Rejected { status, message }
      }
    }
  }

  /// True when the server could not be reached at all.
  pub fn is_offline(&self) -> bool {
    matches!(self, Self::Timeout | Self::Connection(_))
  }

  /// One-line text for the user-facing notification.
  pub fn user_message(&self) -> String {
    match self {
      Self::Timeout => "The request timed out".to_string(),
      Self::Connection(_) => "Connection error - check your internet connection".to_string(),
      Self::NotFound => "The requested resource was not found".to_string(),
      Self::Server(_) => "A server error occurred".to_string(),
      Self::Rejected { message, .. } => message.clone(),
      Self::InvalidRequest(detail) => format!("Invalid request: {}", detail),
    }
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      Self::Timeout
    } else if e.is_builder() {
      Self::InvalidRequest(e.to_string())
    } else {
      Self::Connection(e.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_classification() {
    assert_eq!(FetchError::from_status(404, b""), FetchError::NotFound);
    assert_eq!(FetchError::from_status(503, b""), FetchError::Server(503));
    assert_eq!(
      FetchError::from_status(400, br#"{"success": false, "message": "Book already borrowed"}"#),
      FetchError::Rejected {
        status: 400,
        message: "Book already borrowed".to_string()
      }
    );
    assert_eq!(
      FetchError::from_status(409, b"<html>"),
      FetchError::Rejected {
        status: 409,
        message: "request failed".to_string()
      }
    );
  }

  #[test]
  fn only_transport_failures_count_as_offline() {
    assert!(FetchError::Timeout.is_offline());
    assert!(FetchError::Connection("refused".into()).is_offline());
    assert!(!FetchError::Server(500).is_offline());
    assert!(!FetchError::NotFound.is_offline());
  }

  #[test]
  fn rejected_message_is_shown_verbatim() {
    let err = FetchError::Rejected {
      status: 422,
      message: "Member limit reached".to_string(),
    };
    assert_eq!(err.user_message(), "Member limit reached");
  }
}
