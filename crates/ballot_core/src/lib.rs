pub mod allocation_editor;
pub mod api;
pub mod ballot_editor;
pub mod config;
pub mod csv_template;
pub mod debounce;
pub mod distribution;
pub mod error;
pub mod events;
pub mod impact;
pub mod rebalance;
pub mod reconciler;
pub mod session;
pub mod submit;

pub use allocation_editor::AllocationEditor;
pub use api::{BallotApi, HttpBallotApi, NoAuth, StaticToken, TokenProvider};
pub use ballot_editor::{BallotEditor, ImportReport};
pub use config::{load_settings, Settings};
pub use distribution::{DistributionOrchestrator, MethodSync, PendingMethodChange};
pub use error::{AllocationError, ApiRequestError, ReorderError, SubmitError, ValidationIssue};
pub use events::{event_channel, BallotEvent, EventSender};
pub use impact::{ImpactScoring, PendingConflict, ScoreOutcome, ScoreStatus};
pub use reconciler::{ProjectListReconciler, ProjectRow};
pub use session::BallotSession;
pub use submit::{BallotSigner, PresignedSignature};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
