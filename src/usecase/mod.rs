//! Use cases built on the control plane
//!
//! - `kafka` - the control surface and the single-message consume adapter
//! - `events` - typed user and translation events

pub mod events;
pub mod kafka;

pub use events::{KafkaEventUseCase, TranslationEvent, UserEvent};
pub use kafka::KafkaUseCase;
