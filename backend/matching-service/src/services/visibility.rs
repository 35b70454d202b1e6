use crate::domain::{ActorProfile, CertificationStatus};
use crate::error::ServiceResult;
use crate::repository::{ActorDirectory, BlockRepository};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Why a candidate may or may not be shown to a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityVerdict {
    Visible,
    Blocked,
    ShadowRestricted,
    Private,
    CertifiedViewersOnly,
}

impl VisibilityVerdict {
    pub fn is_visible(&self) -> bool {
        matches!(self, VisibilityVerdict::Visible)
    }
}

/// Evaluate the visibility rules for one pair; first failing rule wins.
///
/// `blocked` is whether a block exists in either direction. Pure function,
/// no I/O: callers batch the block lookup.
pub fn evaluate(viewer: &ActorProfile, candidate: &ActorProfile, blocked: bool) -> VisibilityVerdict {
    if blocked {
        return VisibilityVerdict::Blocked;
    }
    // An actor always sees their own profile
    if viewer.id == candidate.id {
        return VisibilityVerdict::Visible;
    }
    if candidate.shadow_restricted {
        return VisibilityVerdict::ShadowRestricted;
    }
    if !candidate.is_public {
        return VisibilityVerdict::Private;
    }
    if candidate.certified_viewers_only && viewer.certification != CertificationStatus::Approved {
        return VisibilityVerdict::CertifiedViewersOnly;
    }
    VisibilityVerdict::Visible
}

pub fn is_visible(viewer: &ActorProfile, candidate: &ActorProfile, blocked: bool) -> bool {
    evaluate(viewer, candidate, blocked).is_visible()
}

/// Visibility by actor id, fetching flags and block state
#[derive(Clone)]
pub struct VisibilityService {
    directory: Arc<dyn ActorDirectory>,
    blocks: Arc<dyn BlockRepository>,
}

impl VisibilityService {
    pub fn new(directory: Arc<dyn ActorDirectory>, blocks: Arc<dyn BlockRepository>) -> Self {
        Self { directory, blocks }
    }

    /// `None` when either actor is unknown
    pub async fn verdict(
        &self,
        viewer_id: Uuid,
        candidate_id: Uuid,
    ) -> ServiceResult<Option<VisibilityVerdict>> {
        let profiles = self.directory.get_profiles(&[viewer_id, candidate_id]).await?;
        let viewer = profiles.iter().find(|p| p.id == viewer_id);
        let candidate = profiles.iter().find(|p| p.id == candidate_id);

        let (Some(viewer), Some(candidate)) = (viewer, candidate) else {
            return Ok(None);
        };

        let blocked = viewer_id != candidate_id
            && self.blocks.has_block_between(viewer_id, candidate_id).await?;
        Ok(Some(evaluate(viewer, candidate, blocked)))
    }

    pub async fn is_visible(&self, viewer_id: Uuid, candidate_id: Uuid) -> ServiceResult<bool> {
        Ok(self
            .verdict(viewer_id, candidate_id)
            .await?
            .map_or(false, |v| v.is_visible()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn profile() -> ActorProfile {
        ActorProfile::new(Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn test_block_wins_over_everything() {
        let viewer = profile();
        let candidate = profile();
        assert_eq!(evaluate(&viewer, &candidate, true), VisibilityVerdict::Blocked);
        assert!(!is_visible(&candidate, &viewer, true));
    }

    #[test]
    fn test_shadow_restricted_hidden_except_from_self() {
        let viewer = profile();
        let mut candidate = profile();
        candidate.shadow_restricted = true;

        assert_eq!(
            evaluate(&viewer, &candidate, false),
            VisibilityVerdict::ShadowRestricted
        );
        assert!(is_visible(&candidate, &candidate, false));
    }

    #[test]
    fn test_rules_apply_in_order() {
        let viewer = profile();
        let mut candidate = profile();
        candidate.is_public = false;
        candidate.certified_viewers_only = true;
        assert_eq!(evaluate(&viewer, &candidate, false), VisibilityVerdict::Private);

        candidate.is_public = true;
        assert_eq!(
            evaluate(&viewer, &candidate, false),
            VisibilityVerdict::CertifiedViewersOnly
        );
    }

    #[test]
    fn test_certified_only_requires_approved_viewer() {
        let mut viewer = profile();
        let mut candidate = profile();
        candidate.certified_viewers_only = true;

        for status in [
            CertificationStatus::None,
            CertificationStatus::Pending,
            CertificationStatus::Rejected,
        ] {
            viewer.certification = status;
            assert!(!is_visible(&viewer, &candidate, false));
        }

        viewer.certification = CertificationStatus::Approved;
        assert!(is_visible(&viewer, &candidate, false));
    }
}
