use color_eyre::{eyre::eyre, Result};

use crate::net::{self, ApiEnvelope, Transport};
use crate::notify::{self, Level, Notification, Notifier};
use crate::queue::{ActionQueue, NewAction, PendingAction};

/// What happened to a live submission
#[derive(Debug)]
pub enum SubmitOutcome {
  /// The server accepted the request
  Delivered(ApiEnvelope),
  /// The server was unreachable; the request waits in the queue
  Queued(PendingAction),
}

/// Send a mutating request now, queueing it when the server can't be reached.
///
/// Failures other than unreachability (not found, server error, rejection)
/// are reported to the user and returned; they aren't retried.
pub async fn submit_or_queue(
  transport: &dyn Transport,
  queue: &ActionQueue,
  notifier: &dyn Notifier,
  action: NewAction,
) -> Result<SubmitOutcome> {
  match net::call(transport, &action.to_request()).await {
    Ok(envelope) => {
      if let Some(message) = &envelope.message {
        notify::report(notifier, Notification::new(Level::Success, &action.kind, message));
      }
      Ok(SubmitOutcome::Delivered(envelope))
    }
    Err(e) if e.is_offline() => {
      let queued = queue.enqueue(action)?;
      notify::report(
        notifier,
        Notification::new(
          Level::Warning,
          "Saved offline",
          &format!("{} will be sent when the connection returns", queued.kind),
        )
        .with_tag("offline-queued"),
      );
      Ok(SubmitOutcome::Queued(queued))
    }
    Err(e) => {
      notify::report(
        notifier,
        Notification::new(Level::Error, &action.kind, &e.user_message()),
      );
      Err(eyre!("{} failed: {}", action.kind, e))
    }
  }
}
