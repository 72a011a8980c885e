//! Greedy partitioning of a requirement across peer offers.

use medfleet_core::{AgentId, Requirement};

/// Split `required` over `offers`, walking peers in response order.
///
/// Each peer contributes `min(offer, remaining)` per item. Returns the
/// non-empty contributions only when they sum exactly to `required`;
/// otherwise `None`, never a partial plan.
pub fn plan_split(
    required: &Requirement,
    offers: &[(AgentId, Requirement)],
) -> Option<Vec<(AgentId, Requirement)>> {
    let mut remaining = required.clone();
    let mut plan = Vec::new();

    for (peer, offer) in offers {
        if remaining.is_empty() {
            break;
        }
        let part: Requirement = remaining
            .iter()
            .map(|(kind, need)| (kind.clone(), need.min(offer.get(kind))))
            .collect();
        if part.is_empty() {
            continue;
        }
        remaining = remaining.saturating_sub(&part);
        plan.push((peer.clone(), part));
    }

    remaining.is_empty().then_some(plan)
}

/// Item-wise `min(required, free)`: what a unit can cover itself
pub fn own_share(required: &Requirement, free: &Requirement) -> Requirement {
    required
        .iter()
        .map(|(kind, need)| (kind.clone(), need.min(free.get(kind))))
        .collect()
}
