pub mod auth;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod registration;

pub use auth::{authenticate_device, generate_secret, hash_secret, token_fingerprint, verify_secret};
pub use error::IngestError;
pub use events::{DeviceEvent, EventQueue, RelaunchSink, spawn_event_drain};
pub use heartbeat::{HeartbeatOutcome, IngestConfig, Ingestor};
pub use registration::{Registration, RegistrationGate};
