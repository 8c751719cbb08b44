//! fdc-capture - Field survey capture engine
//!
//! Runs on the operator's device. Guides one response at a time through the
//! step wizard, validates it locally, sends it directly when possible and
//! otherwise keeps it in a durable offline queue that is drained on
//! reconnect or when the app shell requests a background sync.

pub mod autosave;
pub mod config;
pub mod connectivity;
pub mod draft;
pub mod duplicate;
pub mod error;
pub mod geolocation;
pub mod queue;
pub mod schedule;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;
pub mod validator;
pub mod wizard;

pub use error::{CaptureError, Result, StoreError, TransportError};
pub use session::{CaptureSession, RecoveryDecision, SessionContext, SessionServices, SubmitOutcome};
pub use sync::{DrainStatus, SyncEngine, SyncOutcome};
