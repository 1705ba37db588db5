use super::domain::{PartyId, RequestStatus, ServiceRequest, TransitionAction};

/// Why a transition was refused. The request is left untouched either way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionRejection {
    #[error("cannot move request from {from} to {requested}")]
    InvalidTransition {
        from: RequestStatus,
        requested: RequestStatus,
    },
    #[error("{actor} is not allowed to {action} this request")]
    Unauthorized {
        actor: PartyId,
        action: TransitionAction,
    },
}

/// Which side of the request an action must come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Requester,
    /// The assigned provider, or any non-requester when none is assigned and
    /// the action claims the request.
    Provider { may_claim: bool },
}

/// Legal edges of the lifecycle and the party allowed to take each one.
fn edge(from: RequestStatus, action: TransitionAction) -> Option<Role> {
    use RequestStatus::*;
    use TransitionAction::*;

    match (from, action) {
        (Pending, Accept) => Some(Role::Provider { may_claim: true }),
        (Pending, Reject) => Some(Role::Provider { may_claim: false }),
        (Pending, Cancel) => Some(Role::Requester),
        (Accepted, Start) => Some(Role::Provider { may_claim: false }),
        (Accepted, Cancel) => Some(Role::Provider { may_claim: false }),
        (InProgress, Complete) => Some(Role::Provider { may_claim: false }),
        _ => None,
    }
}

/// A validated transition, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub action: TransitionAction,
    pub actor: PartyId,
    /// Provider assigned after the transition.
    pub provider_id: Option<PartyId>,
    /// Counterparty to notify, if the request has one.
    pub notify: Option<PartyId>,
}

/// Checks legality first, then the acting party.
pub fn plan_transition(
    request: &ServiceRequest,
    action: TransitionAction,
    actor: &PartyId,
) -> Result<TransitionPlan, TransitionRejection> {
    let from = request.status;
    let to = action.target();
    let role = edge(from, action).ok_or(TransitionRejection::InvalidTransition {
        from,
        requested: to,
    })?;

    let unauthorized = || TransitionRejection::Unauthorized {
        actor: actor.clone(),
        action,
    };

    let (provider_id, notify) = match role {
        Role::Requester => {
            if *actor != request.requester_id {
                return Err(unauthorized());
            }
            (request.provider_id.clone(), request.provider_id.clone())
        }
        Role::Provider { may_claim } => {
            match &request.provider_id {
                Some(assigned) if assigned == actor => {}
                None if may_claim && *actor != request.requester_id => {}
                _ => return Err(unauthorized()),
            }
            (Some(actor.clone()), Some(request.requester_id.clone()))
        }
    };

    Ok(TransitionPlan {
        from,
        to,
        action,
        actor: actor.clone(),
        provider_id,
        notify,
    })
}
