//! Task module - inbound requests, validation and the run state machine.
//!
//! - All types use algebraic data types with exhaustive matching
//! - Invariants are documented and enforced in constructors
//! - Validation is pure; nothing here performs IO

pub mod request;
pub mod state;
mod validate;

pub use request::{AttachmentRef, Round, RunKey, TaskEnvelope, TaskRequest};
pub use state::{RunState, Stage, TransitionError};
pub use validate::{decode_envelope, validate};
