//! Room membership service.
//!
//! The relay admits anyone with the room URL; the membership service keeps
//! the persistent participant list. Joining it is fire-and-forget from the
//! call's point of view: negotiation never waits for it, and a failure is
//! only reported.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::RoomId;

/// Membership service capability
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Register the local user as a member of `room`
    async fn join_room(&self, room: &RoomId) -> Result<()>;
}
