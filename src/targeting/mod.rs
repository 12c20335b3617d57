//! Targeting engine: selects registry entities matching a campaign's
//! criteria, excluding already-engaged ones. No side effects.

use crate::domain::{Campaign, Entity, TargetingCriteria};
use crate::registry::EntityRegistry;
use futures::StreamExt;
use std::sync::Arc;

/// Returns true when the entity satisfies every criterion (intersection
/// semantics). Empty set filters are unconstrained.
pub fn matches_criteria(criteria: &TargetingCriteria, entity: &Entity) -> bool {
    if entity.category != criteria.category {
        return false;
    }
    if let Some(revenue) = criteria.revenue {
        if !revenue.contains(entity.profile.estimated_revenue) {
            return false;
        }
    }
    if let Some(fleet) = criteria.fleet_size {
        if !fleet.contains(f64::from(entity.profile.fleet_size)) {
            return false;
        }
    }
    if !criteria.regions.is_empty()
        && !criteria
            .regions
            .iter()
            .any(|r| r.eq_ignore_ascii_case(&entity.profile.region))
    {
        return false;
    }
    if !criteria.capabilities.is_empty() {
        let overlaps = entity.profile.capabilities.iter().any(|c| {
            criteria
                .capabilities
                .iter()
                .any(|want| want.eq_ignore_ascii_case(c))
        });
        if !overlaps {
            return false;
        }
    }
    if let Some(min_rating) = criteria.min_rating {
        if entity.profile.rating < min_rating {
            return false;
        }
    }
    true
}

/// Selects the campaign's eligible targets from the registry.
///
/// Entities beyond `new` (already engaged) or with an outreach action in
/// flight are excluded. Results are ordered by entity id: the registry
/// query is id-ordered, so selection is deterministic for a fixed pool.
pub async fn select_targets(
    campaign: &Campaign,
    registry: &Arc<dyn EntityRegistry>,
) -> Vec<Entity> {
    let criteria = campaign.criteria.clone();
    let candidates = registry.query(Box::new(move |entity| {
        !entity.is_engaged() && matches_criteria(&criteria, entity)
    }));

    candidates
        .filter(|entity| futures::future::ready(!registry.is_locked(entity.id)))
        .collect()
        .await
}
