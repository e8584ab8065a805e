//! Content request pipeline
//!
//! [`ContentGate`] composes the metering components in request order and
//! turns their decisions into a [`ContentEnvelope`].

mod content;
mod envelope;
mod gate;

pub use content::{ContentSource, StaticContentSource};
pub use envelope::{ContentEnvelope, EnvelopeData};
pub use gate::{ContentGate, ContentRequest, GateDependencies};
