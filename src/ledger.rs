//! The posting-owned application list. Source of truth for every
//! application and its status.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::info;

use crate::db::Database;
use crate::error::{is_unique_violation, PortalError, Result};
use crate::models::{
    kind_from_sql, status_from_sql, Actor, Application, ApplicationStatus, ApplicationWithStudent,
    Capability, PostingKind, StudentSummary,
};

const UNKNOWN: &str = "unknown";

/// Transport-level audit data captured with each submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub client_ip: String,
    pub user_agent: String,
}

impl RequestMeta {
    /// Client IP comes from `x-forwarded-for` (first hop), else `x-real-ip`.
    pub fn from_headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut forwarded_for = None;
        let mut real_ip = None;
        let mut user_agent = None;

        for (name, value) in headers {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match name.as_ref().to_ascii_lowercase().as_str() {
                "x-forwarded-for" => {
                    forwarded_for = value
                        .split(',')
                        .map(str::trim)
                        .find(|hop| !hop.is_empty())
                        .map(str::to_string);
                }
                "x-real-ip" => real_ip = Some(value.to_string()),
                "user-agent" => user_agent = Some(value.to_string()),
                _ => {}
            }
        }

        Self {
            client_ip: forwarded_for
                .or(real_ip)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            user_agent: user_agent.unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewApplication {
    pub cover_letter: String,
    pub additional_info: Option<String>,
    pub eligibility_acknowledged: bool,
}

pub struct Ledger<'a> {
    conn: &'a Connection,
}

impl Database {
    pub fn ledger(&self) -> Ledger<'_> {
        Ledger { conn: self.conn() }
    }
}

const APPLICATION_COLUMNS: &str = "a.id, a.posting_id, a.student_id, a.status, a.cover_letter,
    a.additional_info, a.eligibility_acknowledged, a.submission_ip, a.user_agent,
    a.submitted_at, a.updated_at";

impl<'a> Ledger<'a> {
    fn posting_exists(&self, kind: PostingKind, posting_id: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM postings WHERE id = ?1 AND kind = ?2",
                params![posting_id, kind.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Inserts a new `Applied` entry, refusing a second one for the same student.
    ///
    /// The lookup below is only a fast path; the `UNIQUE (posting_id,
    /// student_id)` index is what actually closes the race between two
    /// concurrent submissions.
    pub fn submit(
        &self,
        kind: PostingKind,
        posting_id: i64,
        student_id: i64,
        payload: &NewApplication,
        meta: &RequestMeta,
    ) -> Result<Application> {
        if !self.posting_exists(kind, posting_id)? {
            return Err(PortalError::NotFound(format!("{} #{}", kind, posting_id)));
        }
        if self.find_by_student(posting_id, student_id)?.is_some() {
            return Err(PortalError::AlreadyApplied { posting_id, student_id });
        }

        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT INTO applications (posting_id, student_id, status, cover_letter, additional_info,
                                       eligibility_acknowledged, submission_ip, user_agent,
                                       submitted_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                posting_id,
                student_id,
                ApplicationStatus::Applied.as_str(),
                payload.cover_letter,
                payload.additional_info,
                payload.eligibility_acknowledged,
                meta.client_ip,
                meta.user_agent,
                now,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(PortalError::AlreadyApplied { posting_id, student_id });
            }
            Err(e) => return Err(e.into()),
        }

        let id = self.conn.last_insert_rowid();
        info!(application_id = id, posting_id, student_id, ip = %meta.client_ip, "application recorded");

        self.get(posting_id, id)?
            .ok_or_else(|| PortalError::NotFound(format!("application #{}", id)))
    }

    pub fn find_by_student(&self, posting_id: i64, student_id: i64) -> Result<Option<Application>> {
        let sql = format!(
            "SELECT {} FROM applications a WHERE a.posting_id = ?1 AND a.student_id = ?2",
            APPLICATION_COLUMNS
        );
        let app = self
            .conn
            .query_row(&sql, params![posting_id, student_id], Self::row_to_application)
            .optional()?;
        Ok(app)
    }

    pub fn get(&self, posting_id: i64, application_id: i64) -> Result<Option<Application>> {
        let sql = format!(
            "SELECT {} FROM applications a WHERE a.posting_id = ?1 AND a.id = ?2",
            APPLICATION_COLUMNS
        );
        let app = self
            .conn
            .query_row(&sql, params![posting_id, application_id], Self::row_to_application)
            .optional()?;
        Ok(app)
    }

    /// Sets the status of one application. Returns the updated entry and the
    /// status it had before. Concurrent writers resolve last-write-wins.
    pub fn update_status(
        &self,
        kind: PostingKind,
        posting_id: i64,
        application_id: i64,
        status: ApplicationStatus,
    ) -> Result<(Application, ApplicationStatus)> {
        // Take the write lock up front so the read below cannot go stale.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let sql = format!(
            "SELECT {} FROM applications a
             JOIN postings p ON p.id = a.posting_id
             WHERE a.posting_id = ?1 AND a.id = ?2 AND p.kind = ?3",
            APPLICATION_COLUMNS
        );
        let Some(mut app) = tx
            .query_row(
                &sql,
                params![posting_id, application_id, kind.as_str()],
                Self::row_to_application,
            )
            .optional()?
        else {
            return Err(PortalError::NotFound(format!(
                "application #{} on {} #{}",
                application_id, kind, posting_id
            )));
        };

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE applications SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, application_id],
        )?;
        tx.commit()?;

        let previous = app.status;
        app.status = status;
        app.updated_at = now;
        Ok((app, previous))
    }

    /// Applications in submission order with the applicant's summary attached.
    /// Staff only.
    pub fn list_applications(
        &self,
        actor: &Actor,
        kind: PostingKind,
        posting_id: i64,
    ) -> Result<Vec<ApplicationWithStudent>> {
        actor.require(Capability::ReviewApplications)?;
        if !self.posting_exists(kind, posting_id)? {
            return Err(PortalError::NotFound(format!("{} #{}", kind, posting_id)));
        }

        let sql = format!(
            "SELECT {}, s.name, s.email, s.student_number
             FROM applications a
             JOIN students s ON s.id = a.student_id
             WHERE a.posting_id = ?1
             ORDER BY a.id",
            APPLICATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([posting_id], |row| {
            Ok(ApplicationWithStudent {
                application: Self::row_to_application(row)?,
                student: StudentSummary {
                    name: row.get(11)?,
                    email: row.get(12)?,
                    student_number: row.get(13)?,
                },
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every application with its posting's kind, for the repair pass.
    pub fn all_applications(&self) -> Result<Vec<(PostingKind, Application)>> {
        let sql = format!(
            "SELECT {}, p.kind FROM applications a
             JOIN postings p ON p.id = a.posting_id
             ORDER BY a.id",
            APPLICATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((kind_from_sql(row.get(11)?, 11)?, Self::row_to_application(row)?))
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[cfg(test)]
    pub fn count_for(&self, posting_id: i64, student_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM applications WHERE posting_id = ?1 AND student_id = ?2",
            params![posting_id, student_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
        Ok(Application {
            id: row.get(0)?,
            posting_id: row.get(1)?,
            student_id: row.get(2)?,
            status: status_from_sql(row.get(3)?, 3)?,
            cover_letter: row.get(4)?,
            additional_info: row.get(5)?,
            eligibility_acknowledged: row.get(6)?,
            submission_ip: row.get(7)?,
            user_agent: row.get(8)?,
            submitted_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}
