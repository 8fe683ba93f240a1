//! Core constants, error types, and the transform engine seams.

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::{
    HandshakeError, RotationError, SessionError, StoreError, TransformError, TransportError,
};
pub use traits::{Direction, TransformFactory, TransformSession};
