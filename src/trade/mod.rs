//! Trade proposals and their negotiation lifecycle

mod engine;
mod model;

pub use engine::{NegotiationEngine, NegotiationError};
pub use model::*;
