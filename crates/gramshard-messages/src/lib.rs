//! Typed message model and join/merge batching
//!
//! Every unit of work in the cluster travels as an [`Envelope`]: a typed,
//! serializable payload with a step identifier, an origin endpoint, and a
//! router-computed target. Training requests support merging with
//! same-target siblings ([`Payload::join`]); the [`JoinBuffer`] holds
//! join-eligible envelopes for a short batching window before they are
//! routed and sent.

mod envelope;
mod intercom;
mod join;
mod requests;

pub use envelope::{Envelope, Payload, Target};
pub use intercom::{Ack, DeltaPush, DotRequest, PartialDot, RowRequest, TrainingOutcome};
pub use join::{JoinBuffer, JoinOutcome};
pub use requests::{CbowRequest, SkipGramRequest};
