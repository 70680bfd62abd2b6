//! User-visible notifications.
//!
//! Delivery is best-effort: callers go through [`report`], which swallows
//! notifier errors so they never affect queue state.

use color_eyre::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
  Info,
  Success,
  Warning,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  /// Notifications with the same tag replace each other on screen
  pub tag: Option<String>,
  pub level: Level,
}

impl Notification {
  pub fn new(level: Level, title: &str, body: &str) -> Self {
    Self {
      title: title.to_string(),
      body: body.to_string(),
      tag: None,
      level,
    }
  }

  pub fn with_tag(mut self, tag: &str) -> Self {
    self.tag = Some(tag.to_string());
    self
  }

  /// Confirmation for a replayed action
  pub fn sync_success(kind: &str) -> Self {
    Self::new(
      Level::Success,
      "Action completed",
      &format!("{} action completed successfully", kind),
    )
    .with_tag("sync-success")
  }
}

pub trait Notifier: Send + Sync {
  fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Emits notifications as log events on the `shelf_sync::notification` target.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(&self, n: &Notification) -> Result<()> {
    let tag = n.tag.as_deref().unwrap_or("-");
    match n.level {
      Level::Info | Level::Success => {
        tracing::info!(target: "shelf_sync::notification", tag, title = %n.title, "{}", n.body)
      }
      Level::Warning => {
        tracing::warn!(target: "shelf_sync::notification", tag, title = %n.title, "{}", n.body)
      }
      Level::Error => {
        tracing::error!(target: "shelf_sync::notification", tag, title = %n.title, "{}", n.body)
      }
    }
    Ok(())
  }
}

/// Used when notifications are turned off in the config.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
  fn notify(&self, _notification: &Notification) -> Result<()> {
    Ok(())
  }
}

/// Deliver a notification, logging and dropping any failure.
pub fn report(notifier: &dyn Notifier, notification: Notification) {
  if let Err(e) = notifier.notify(&notification) {
    tracing::debug!(title = %notification.title, error = %e, "notification not delivered");
  }
}


#[cfg(test)]
mod tests {
  use super::testing::*;
  use super::*;

  #[test]
  fn sync_success_mentions_the_action_type() {
    let n = Notification::sync_success("borrow");
    assert!(n.body.contains("borrow"));
    assert_eq!(n.tag.as_deref(), Some("sync-success"));
  }

  #[test]
  fn report_swallows_failures() {
    report(&DeniedNotifier, Notification::sync_success("return"));

    let recorder = RecordingNotifier::default();
    report(&recorder, Notification::sync_success("return"));
    assert_eq!(recorder.seen().len(), 1);
  }
}
