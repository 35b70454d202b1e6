use super::ledger::ensure_distinct;
use crate::error::ServiceResult;
use crate::repository::BlockRepository;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Block edges, written only by the blocking actor
#[derive(Clone)]
pub struct BlockService {
    blocks: Arc<dyn BlockRepository>,
}

impl BlockService {
    pub fn new(blocks: Arc<dyn BlockRepository>) -> Self {
        Self { blocks }
    }

    /// Idempotent; returns true if a new block was recorded.
    pub async fn block(&self, blocker_id: Uuid, blocked_id: Uuid) -> ServiceResult<bool> {
        ensure_distinct(blocker_id, blocked_id)?;
        let created = self.blocks.create_block(blocker_id, blocked_id).await?;
        if created {
            info!(blocker_id = %blocker_id, blocked_id = %blocked_id, "block created");
        }
        Ok(created)
    }

    /// Removes only the caller's own edge; a block in the other direction
    /// stays in force.
    pub async fn unblock(&self, blocker_id: Uuid, blocked_id: Uuid) -> ServiceResult<bool> {
        ensure_distinct(blocker_id, blocked_id)?;
        let removed = self.blocks.delete_block(blocker_id, blocked_id).await?;
        if removed {
            info!(blocker_id = %blocker_id, blocked_id = %blocked_id, "block removed");
        }
        Ok(removed)
    }

    pub async fn is_blocked_between(&self, actor_a: Uuid, actor_b: Uuid) -> ServiceResult<bool> {
        self.blocks.has_block_between(actor_a, actor_b).await
    }
}
