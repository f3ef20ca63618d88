//! Client-side orchestration for the financial report dashboard: the HTTP
//! transport, upload progress tracking, and the selection state machine that
//! keeps one shared snapshot consistent under concurrent requests.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod progress;
pub mod sse;
pub mod store;
pub mod transport;

pub use config::{load_settings, load_settings_from, ClientSettings, ProgressSettings};
pub use coordinator::{Coordinator, DashboardHandle, UploadHandle};
pub use error::{ClientError, ClientResult};
pub use progress::{UploadPhase, UploadProgress};
pub use store::{AppState, StateStore};
pub use transport::{HttpReportApi, ProgressSource, ReportApi, UploadAck, UploadFile};
