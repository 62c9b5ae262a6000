// Declare the modules to re-export
pub mod sync;

// Re-export the engine surface
pub use sync::errors::{DecodeError, HandshakeError, TransportError};
pub use sync::hub::BroadcastHub;
pub use sync::manager::{ConnectionManager, FeedConfig, SyncPhase};
pub use sync::model::{TopicUpdate, UpdateBatch};
pub use sync::negotiate::{NegotiatedSession, Negotiator};
