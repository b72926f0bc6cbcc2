use chrono::{DateTime, Utc};
use shared::domain::DistributionMethod;
use tokio::sync::broadcast;
use tracing::warn;

/// Notifications for the presentation layer. `PersistFailed` is the toast
/// channel for background writes that could not be delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum BallotEvent {
    PersistFailed { target: String, message: String },
    MethodChanged(Option<DistributionMethod>),
    BallotRefetched,
    UnlockBallotRequested,
    ImportWarning(String),
    Submitted { submitted_at: Option<DateTime<Utc>> },
}

pub type EventSender = broadcast::Sender<BallotEvent>;

pub fn event_channel() -> EventSender {
    let (events, _) = broadcast::channel(256);
    events
}

pub(crate) fn report_persist_failure(events: &EventSender, target: String, err: &anyhow::Error) {
    warn!("persist: write failed target={target} error={err:#}");
    let _ = events.send(BallotEvent::PersistFailed {
        target,
        message: format!("{err:#}"),
    });
}
