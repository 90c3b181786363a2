//! # Authorization Policy
//!
//! Every "may this actor do that" decision lives here. The checks are pure:
//! they look only at the actor and the target, never at a store.
//!
//! Rule order for content modification:
//! 1. blocked actors are refused
//! 2. the creator is allowed
//! 3. admins are allowed
//! 4. everyone else is refused

use domains::{Actor, AppError, Authored, DenyReason, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Converts a denial into [`AppError::Forbidden`].
    pub fn require(self) -> Result<(), AppError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => {
                tracing::warn!(%reason, "authorization denied");
                Err(AppError::Forbidden(reason))
            }
        }
    }
}

/// Creating content or liking: any actor that is not blocked.
pub fn can_act(actor: &Actor) -> Decision {
    if actor.blocked {
        return Decision::Deny(DenyReason::Blocked);
    }
    Decision::Allow
}

/// Edit, delete and tag changes on posts and comments.
pub fn can_modify(actor: &Actor, entity: &impl Authored) -> Decision {
    if actor.blocked {
        return Decision::Deny(DenyReason::Blocked);
    }
    if entity.creator() == actor.id || actor.is_admin() {
        return Decision::Allow;
    }
    Decision::Deny(DenyReason::NotOwnerOrAdmin)
}

/// Liking is open to everyone but the creator.
pub fn can_like(actor: &Actor, entity: &impl Authored) -> Decision {
    if actor.blocked {
        return Decision::Deny(DenyReason::Blocked);
    }
    if entity.creator() == actor.id {
        return Decision::Deny(DenyReason::SelfLike);
    }
    Decision::Allow
}

/// Admin-only actions; ownership is irrelevant.
pub fn can_administer(actor: &Actor) -> Decision {
    if actor.blocked {
        return Decision::Deny(DenyReason::Blocked);
    }
    if !actor.is_admin() {
        return Decision::Deny(DenyReason::AdminOnly);
    }
    Decision::Allow
}

/// Block, unblock and promote: admin-only, and never aimed at oneself.
pub fn can_administer_user(actor: &Actor, target: UserId) -> Decision {
    match can_administer(actor) {
        Decision::Allow if actor.id == target => Decision::Deny(DenyReason::SelfTarget),
        decision => decision,
    }
}

/// Account removal: the account holder or an admin.
pub fn can_delete_account(actor: &Actor, target: UserId) -> Decision {
    if actor.blocked {
        return Decision::Deny(DenyReason::Blocked);
    }
    if actor.id == target || actor.is_admin() {
        return Decision::Allow;
    }
    Decision::Deny(DenyReason::NotOwnerOrAdmin)
}
