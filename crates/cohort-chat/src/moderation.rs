//! Report submission and the community-admin review workflow.

use chrono::Utc;
use tracing::info;

use cohort_shared::report::{ReportAction, ReportReason, ReportStatus};
use cohort_shared::{ChatError, ChatResult, MessageId, ReportId, UserId};
use cohort_store::{Database, Report, ReportDetails, StoreError};

use crate::events::{Outcome, ServerEvent, Targets};
use crate::membership::{capabilities_in, expel, require_community_admin};
use crate::messages::remove_message;

pub fn submit_report(
    db: &mut Database,
    user: &UserId,
    message_id: MessageId,
    reason: ReportReason,
) -> ChatResult<Outcome<Report>> {
    let message = db.get_message(message_id)?;
    let group = db.get_group(message.group_id)?;
    if !capabilities_in(db, user, &group)?.can_read {
        return Err(ChatError::forbidden("cannot access this group"));
    }
    if &message.sender.id == user {
        return Err(ChatError::invalid("you cannot report your own message"));
    }

    let report = Report {
        id: ReportId::new(),
        message_id,
        reported_user_id: message.sender.id.clone(),
        reported_by_id: user.clone(),
        group_id: group.id,
        reason,
        status: ReportStatus::Pending,
        created_at: Utc::now(),
    };
    db.insert_report(&report)?;
    info!(report = %report.id, message = %message_id, by = %user, reason = reason.as_str(), "report submitted");

    let event = ServerEvent::NewReport {
        report_id: report.id,
        group_id: group.id,
    };
    Ok(Outcome::quiet(report).notify(Targets::users(&group.admins), event))
}

pub fn list_reports(db: &Database, admin: &UserId) -> ChatResult<Vec<ReportDetails>> {
    require_community_admin(db, admin)?;
    Ok(db.list_report_details()?)
}

/// Apply an admin decision to a report.
///
/// Deleting the message or removing the user consumes the report; warning
/// and dismissing keep it as reviewed.
pub fn resolve_report(
    db: &mut Database,
    admin: &UserId,
    report_id: ReportId,
    action: ReportAction,
) -> ChatResult<Outcome<()>> {
    require_community_admin(db, admin)?;
    let report = db.get_report(report_id)?;

    let outcome = match action {
        ReportAction::Dismiss => {
            db.set_report_status(report_id, ReportStatus::Reviewed)?;
            Outcome::quiet(())
        }
        ReportAction::Warn => {
            let group = db.get_group(report.group_id)?;
            db.set_report_status(report_id, ReportStatus::Reviewed)?;
            Outcome::quiet(()).notify(
                Targets::user(&report.reported_user_id),
                ServerEvent::Warned {
                    group_id: group.id,
                    group_name: group.name,
                    reason: report.reason,
                },
            )
        }
        ReportAction::DeleteMessage => {
            let outcome = match db.get_message(report.message_id) {
                Ok(message) => remove_message(db, &message)?,
                Err(StoreError::NotFound(_)) => Outcome::quiet(()),
                Err(e) => return Err(e.into()),
            };
            db.delete_report(report_id)?;
            outcome
        }
        ReportAction::RemoveUser => {
            let group = db.get_group(report.group_id)?;
            let outcome = expel(db, &group, &report.reported_user_id)?;
            db.delete_report(report_id)?;
            outcome
        }
    };

    info!(report = %report_id, action = ?action, by = %admin, "report resolved");
    Ok(outcome)
}
