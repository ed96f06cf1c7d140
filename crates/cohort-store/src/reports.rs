use rusqlite::params;

use cohort_shared::report::{ReportReason, ReportStatus};
use cohort_shared::{ReportId, UserId, UserSummary};

use crate::codec::{parse_enum, parse_id, parse_ts, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Report, ReportDetails};

const REPORT_COLUMNS: &str =
    "r.id, r.message_id, r.reported_user_id, r.reported_by_id, r.group_id, r.reason, r.status, r.created_at";

impl Database {
    pub fn insert_report(&self, report: &Report) -> Result<()> {
        self.conn().execute(
            "INSERT INTO reports
                (id, message_id, reported_user_id, reported_by_id, group_id, reason, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                report.id.to_string(),
                report.message_id.to_string(),
                report.reported_user_id.as_str(),
                report.reported_by_id.as_str(),
                report.group_id.to_string(),
                report.reason.as_str(),
                report.status.as_str(),
                ts(&report.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_report(&self, id: ReportId) -> Result<Report> {
        self.conn()
            .query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM reports r WHERE r.id = ?1"),
                params![id.to_string()],
                row_to_report,
            )
            .map_err(|e| StoreError::or_not_found(e, "Report"))
    }

    /// Every report, newest first, with names and message text resolved.
    pub fn list_report_details(&self) -> Result<Vec<ReportDetails>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {REPORT_COLUMNS},
                    m.content,
                    COALESCE(ru.name, r.reported_user_id),
                    COALESCE(rb.name, r.reported_by_id),
                    g.name
             FROM reports r
             JOIN chat_groups g ON g.id = r.group_id
             LEFT JOIN messages m ON m.id = r.message_id
             LEFT JOIN users ru ON ru.id = r.reported_user_id
             LEFT JOIN users rb ON rb.id = r.reported_by_id
             ORDER BY r.created_at DESC"
        ))?;

        let rows = stmt.query_map([], |row| {
            let report = row_to_report(row)?;
            let reported_user = UserSummary {
                id: report.reported_user_id.clone(),
                name: row.get(9)?,
            };
            let reported_by = UserSummary {
                id: report.reported_by_id.clone(),
                name: row.get(10)?,
            };
            Ok(ReportDetails {
                message_content: row.get(8)?,
                reported_user,
                reported_by,
                group_name: row.get(11)?,
                report,
            })
        })?;

        let mut details = Vec::new();
        for row in rows {
            details.push(row?);
        }
        Ok(details)
    }

    pub fn set_report_status(&self, id: ReportId, status: ReportStatus) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE reports SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("Report"));
        }
        Ok(())
    }

    pub fn delete_report(&self, id: ReportId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM reports WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_report(row: &rusqlite::Row<'_>) -> rusqlite::Result<Report> {
    let id: String = row.get(0)?;
    let message_id: String = row.get(1)?;
    let reported_user_id: String = row.get(2)?;
    let reported_by_id: String = row.get(3)?;
    let group_id: String = row.get(4)?;
    let reason: String = row.get(5)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(Report {
        id: parse_id(0, &id)?,
        message_id: parse_id(1, &message_id)?,
        reported_user_id: UserId(reported_user_id),
        reported_by_id: UserId(reported_by_id),
        group_id: parse_id(4, &group_id)?,
        reason: parse_enum(5, &reason, ReportReason::parse)?,
        status: parse_enum(6, &status, ReportStatus::parse)?,
        created_at: parse_ts(7, &created_at)?,
    })
}
