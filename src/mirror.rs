//! Student-owned projection of the ledger.
//!
//! Each record copies enough of the posting and application for the student
//! to read their own status without touching postings. It may lag the ledger;
//! `reconcile` brings it back in line.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::db::Database;
use crate::error::{is_unique_violation, Result};
use crate::models::{
    kind_from_sql, status_from_sql, ApplicationStatus, PostingKind, StatusHistoryEntry,
    StudentApplicationRecord,
};

pub const STUDENT_ACTOR: &str = "Student";
pub const SUBMITTED_NOTE: &str = "Application submitted";

/// Posting and application data copied into the record at submission time.
#[derive(Debug, Clone)]
pub struct ApplicationSnapshot {
    pub kind: PostingKind,
    pub posting_id: i64,
    pub company_name: String,
    pub position: String,
    pub applied_date: String,
    pub cover_letter: String,
    pub additional_info: Option<String>,
}

#[derive(Debug)]
pub enum MirrorOutcome {
    Recorded(StudentApplicationRecord),
    NoOp,
}

pub struct Mirror<'a> {
    conn: &'a Connection,
}

impl Database {
    pub fn mirror(&self) -> Mirror<'_> {
        Mirror { conn: self.conn() }
    }
}

impl<'a> Mirror<'a> {
    /// Creates the record with a single `Applied` history entry. A record that
    /// already exists for the posting is left untouched.
    pub fn record_application(
        &self,
        student_id: i64,
        snapshot: &ApplicationSnapshot,
    ) -> Result<MirrorOutcome> {
        if self.find_record_id(student_id, snapshot.kind, snapshot.posting_id)?.is_some() {
            debug!(student_id, posting_id = snapshot.posting_id, "mirror record already present");
            return Ok(MirrorOutcome::NoOp);
        }

        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT INTO student_applications (student_id, kind, posting_id, company_name, position,
                                               applied_date, current_status, cover_letter,
                                               additional_info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                student_id,
                snapshot.kind.as_str(),
                snapshot.posting_id,
                snapshot.company_name,
                snapshot.position,
                snapshot.applied_date,
                ApplicationStatus::Applied.as_str(),
                snapshot.cover_letter,
                snapshot.additional_info,
            ],
        );
        match inserted {
            Ok(_) => {}
            // Lost a race with another writer creating the same record.
            Err(e) if is_unique_violation(&e) => return Ok(MirrorOutcome::NoOp),
            Err(e) => return Err(e.into()),
        }
        let record_id = tx.last_insert_rowid();
        append_history(
            &tx,
            record_id,
            ApplicationStatus::Applied,
            &snapshot.applied_date,
            STUDENT_ACTOR,
            Some(SUBMITTED_NOTE),
        )?;
        tx.commit()?;

        let record = self.load_record(record_id)?;
        Ok(record.map_or(MirrorOutcome::NoOp, MirrorOutcome::Recorded))
    }

    /// Sets `current_status` and appends one history entry. Returns false when
    /// the student has no record for the posting.
    pub fn apply_transition(
        &self,
        student_id: i64,
        kind: PostingKind,
        posting_id: i64,
        status: ApplicationStatus,
        updated_by: &str,
        notes: &str,
    ) -> Result<bool> {
        let Some(record_id) = self.find_record_id(student_id, kind, posting_id)? else {
            return Ok(false);
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE student_applications SET current_status = ?1 WHERE id = ?2",
            params![status.as_str(), record_id],
        )?;
        append_history(
            &tx,
            record_id,
            status,
            &Utc::now().to_rfc3339(),
            updated_by,
            Some(notes),
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn get_record(
        &self,
        student_id: i64,
        kind: PostingKind,
        posting_id: i64,
    ) -> Result<Option<StudentApplicationRecord>> {
        match self.find_record_id(student_id, kind, posting_id)? {
            Some(id) => self.load_record(id),
            None => Ok(None),
        }
    }

    /// The student's records, newest application first.
    pub fn list_records(
        &self,
        student_id: i64,
        kind: Option<PostingKind>,
    ) -> Result<Vec<StudentApplicationRecord>> {
        let mut sql = String::from("SELECT id FROM student_applications WHERE student_id = ?1");
        if kind.is_some() {
            sql.push_str(" AND kind = ?2");
        }
        sql.push_str(" ORDER BY applied_date DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let ids = if let Some(k) = kind {
            stmt.query_map(params![student_id, k.as_str()], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([student_id], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load_record(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn find_record_id(&self, student_id: i64, kind: PostingKind, posting_id: i64) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM student_applications
                 WHERE student_id = ?1 AND kind = ?2 AND posting_id = ?3",
                params![student_id, kind.as_str(), posting_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn load_record(&self, record_id: i64) -> Result<Option<StudentApplicationRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, student_id, kind, posting_id, company_name, position, applied_date,
                        current_status, cover_letter, additional_info
                 FROM student_applications WHERE id = ?1",
                [record_id],
                |row| {
                    Ok(StudentApplicationRecord {
                        id: row.get(0)?,
                        student_id: row.get(1)?,
                        kind: kind_from_sql(row.get(2)?, 2)?,
                        posting_id: row.get(3)?,
                        company_name: row.get(4)?,
                        position: row.get(5)?,
                        applied_date: row.get(6)?,
                        current_status: status_from_sql(row.get(7)?, 7)?,
                        cover_letter: row.get(8)?,
                        additional_info: row.get(9)?,
                        status_history: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut record) = record else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT status, updated_date, updated_by, notes
             FROM status_history WHERE record_id = ?1 ORDER BY id",
        )?;
        let history = stmt.query_map([record_id], |row| {
            Ok(StatusHistoryEntry {
                status: status_from_sql(row.get(0)?, 0)?,
                updated_date: row.get(1)?,
                updated_by: row.get(2)?,
                notes: row.get(3)?,
            })
        })?;
        record.status_history = history.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(record))
    }
}

fn append_history(
    conn: &Connection,
    record_id: i64,
    status: ApplicationStatus,
    updated_date: &str,
    updated_by: &str,
    notes: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO status_history (record_id, status, updated_date, updated_by, notes)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![record_id, status.as_str(), updated_date, updated_by, notes],
    )?;
    Ok(())
}
