mod content;
mod events;
pub mod jid;
mod protocol;
mod session_id;

pub use content::*;
pub use events::*;
pub use protocol::*;
pub use session_id::{SessionId, SessionIdError};
