//! Hands-free recognition sessions
//!
//! [`SessionController`] drives the recognize -> translate -> relaunch loop,
//! resolving recognition errors through its error policy.

mod classify;
mod machine;
mod model;

pub use machine::{ControlCommand, SessionController};
pub use model::{SessionSnapshot, Utterance};

#[cfg(test)]
pub use model::SessionState;
