//! Approval state machine.
//!
//! pending → checked → approved | rejected. Pure functions over the record's
//! status and actor bookkeeping; the store applies them and persists the
//! result, the adapters never see transition logic.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::record::{JobFileRecord, LifecycleStatus};

/// pending → checked.
pub fn mark_checked(
    record: &mut JobFileRecord,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if record.status != LifecycleStatus::Pending {
        return Err(StoreError::InvalidTransition {
            action: "check",
            from: record.status,
        });
    }
    record.status = LifecycleStatus::Checked;
    record.actors.checked_by = Some(actor.to_string());
    record.actors.checked_at = Some(now);
    Ok(())
}

/// checked | approved → pending. Clears the check (and any approval) so the
/// record goes through review again.
pub fn mark_unchecked(record: &mut JobFileRecord, actor: &str) -> Result<(), StoreError> {
    if !matches!(
        record.status,
        LifecycleStatus::Checked | LifecycleStatus::Approved
    ) {
        return Err(StoreError::InvalidTransition {
            action: "uncheck",
            from: record.status,
        });
    }
    record.status = LifecycleStatus::Pending;
    record.actors.clear_signoff();
    record.actors.last_updated_by = Some(actor.to_string());
    Ok(())
}

/// checked → approved. Any prior rejection fields are cleared.
pub fn mark_approved(
    record: &mut JobFileRecord,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if record.status != LifecycleStatus::Checked {
        return Err(StoreError::InvalidTransition {
            action: "approve",
            from: record.status,
        });
    }
    record.status = LifecycleStatus::Approved;
    record.actors.approved_by = Some(actor.to_string());
    record.actors.approved_at = Some(now);
    record.actors.rejected_by = None;
    record.actors.rejected_at = None;
    record.actors.rejection_reason = None;
    Ok(())
}

/// checked → rejected. The reason is mandatory and must not be blank.
pub fn mark_rejected(
    record: &mut JobFileRecord,
    actor: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if reason.trim().is_empty() {
        return Err(StoreError::EmptyReason);
    }
    if record.status != LifecycleStatus::Checked {
        return Err(StoreError::InvalidTransition {
            action: "reject",
            from: record.status,
        });
    }
    record.status = LifecycleStatus::Rejected;
    record.actors.rejected_by = Some(actor.to_string());
    record.actors.rejected_at = Some(now);
    record.actors.rejection_reason = Some(reason.trim().to_string());
    Ok(())
}

/// Pre-save hook: any content edit invalidates prior sign-off.
///
/// A full save of a record currently checked or approved resets it to pending
/// and clears all checked/approved/rejected fields. Rejected records reopen
/// the same way; editing is the only path out of rejection. Returns whether
/// the record was reopened, so callers can log it. This is the one transition
/// triggered implicitly by `save` rather than by an explicit call.
pub fn reopen_on_edit(record: &mut JobFileRecord) -> bool {
    if record.status == LifecycleStatus::Pending {
        return false;
    }
    record.status = LifecycleStatus::Pending;
    record.actors.clear_signoff();
    true
}
