//! Worker supervision: process lifecycle, restart backoff, session roster.

mod manager;
mod restart;
mod session_index;

pub use manager::{
    EVENT_TOKEN_ENV, LaunchContext, SubbotError, SubbotSupervisor, SupervisorConfig,
};
pub use restart::RestartPolicy;
pub use session_index::{FsSessionIndex, SessionIndex};
