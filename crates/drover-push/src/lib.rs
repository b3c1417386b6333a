pub mod client;
pub mod error;
pub mod signing;

pub use client::{PushAck, PushClient, StaticToken, TokenProvider};
pub use error::PushError;
pub use signing::{canonical_string, sign_command, verify_command, CommandSignature};
