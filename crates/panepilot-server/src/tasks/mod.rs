//! Background work that outlives the request that started it.

pub mod capture;
pub mod typing;

pub use capture::{spawn_capture, CaptureGuard, CapturePermit};
pub use typing::TypingRegistry;
