//! Handles back to the mediation point blocking a requesting process.

use crate::error::ReplyError;
use crate::permissions::ReplyPermission;

/// A blocked request delivered by the kernel listener.
///
/// Each request accepts exactly one reply. A failed reply must leave the
/// request untouched so that a corrected reply can still be sent.
pub trait ListenerRequest: Send + Sync {
    /// Send the allowed permission back to the kernel.
    fn reply(&self, allowed: &ReplyPermission) -> Result<(), ReplyError>;
}
