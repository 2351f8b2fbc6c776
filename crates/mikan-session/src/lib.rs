mod backfill;
mod config;
mod error;
mod events;
#[cfg(test)]
mod fake;
mod qr;
mod registry;
mod service;
mod session;
mod state;

pub use backfill::BackfillPolicy;
pub use config::{
    BRIDGE_DIR_ENV, CONFIG_ENV, Config, STORAGE_ENV, STORAGE_ROOT_ENV, SessionSettings,
    StorageBackend,
};
pub use error::{ConfigError, ErrorKind, Result, SessionError};
pub use events::SessionEvent;
pub use registry::{RestoreReport, SessionRegistry};
pub use service::{ApiResponse, SessionService};
pub use session::{ChatInfo, Session, SessionInfo};
pub use state::{Identity, PairingChallenge, SessionStatus};
