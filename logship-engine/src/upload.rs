// Upload path: gating, retry coordination and the persisted upload ledger

pub mod coordinator;
pub mod ledger;

pub use coordinator::{PendingUpload, SubmitOutcome, UploadCoordinator, UploadState};
pub use ledger::UploadLedger;
