//! Reseed monitoring and session rotation.
//!
//! After every discrete transform operation the session's reseed counter
//! is compared against the engine's reseed interval. Past the threshold
//! the session pair MUST be rotated: both handles are torn down and a
//! full re-handshake re-derives secrets and replaces the cached state
//! wholesale. The check runs independently for the encode and decode
//! sessions because their usage rates can diverge.

use tracing::{debug, warn};

use crate::core::{RotationError, TransformFactory, TransformSession, RESEED_THRESHOLD};
use crate::handshake::perform_handshake;
use crate::session::SessionContext;
use crate::transport::Transport;

/// Decides when a session's DRBG is close enough to exhaustion to force
/// a rotation.
#[derive(Debug, Clone, Copy)]
pub struct ReseedMonitor {
    threshold: f64,
}

impl ReseedMonitor {
    /// Monitor with the protocol's standard threshold fraction.
    pub fn new() -> Self {
        Self {
            threshold: RESEED_THRESHOLD,
        }
    }

    /// Whether a session with this counter must be rotated before its
    /// next operation.
    pub fn due(&self, reseed_counter: u64, reseed_interval: u64) -> bool {
        reseed_counter as f64 > reseed_interval as f64 * self.threshold
    }
}

impl Default for ReseedMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Rotate a client's session pair.
///
/// Tears down both handles (failures are logged, not retried) and runs a
/// fresh handshake for the same client. After rotation nothing depends
/// on pre-rotation state: the cached blobs have been replaced and the
/// caller must re-restore before the next operation.
pub(crate) async fn rotate<F, T>(
    ctx: &SessionContext<F, T>,
    client_id: &str,
    mut encoder: F::Session,
    mut decoder: F::Session,
) -> Result<(), RotationError>
where
    F: TransformFactory,
    T: Transport,
{
    debug!(client_id, "reseed threshold reached, rotating sessions");

    if let Err(error) = encoder.uninstantiate() {
        warn!(client_id, %error, "encoder uninstantiate failed during rotation");
    }
    if let Err(error) = decoder.uninstantiate() {
        warn!(client_id, %error, "decoder uninstantiate failed during rotation");
    }

    perform_handshake(ctx, client_id).await?;
    Ok(())
}
