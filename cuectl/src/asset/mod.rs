//! Remote assets and the readiness poller.
mod poller;
mod transitions;
mod types;

pub use poller::{PollConfig, Poller};
pub use transitions::guess_mime_type;
pub use types::*;
