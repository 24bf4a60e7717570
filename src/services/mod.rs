//! Reboot workflow services
//!
//! Everything behind the HTTP surface: the orchestrator and the pieces it is
//! composed of. Stateful services take their collaborators as trait objects
//! or generics so they can be tested with mocks.

pub mod connectivity;
pub mod estimate;
pub mod monitor;
pub mod notification;
pub mod progress;
pub mod reboot;
pub mod run_log;
