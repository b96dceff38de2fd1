use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

use crate::error::{PortalError, Result};
use crate::models::{kind_from_sql, Posting, PostingKind, Requirements, StudentProfile};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS students (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_number TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                degree_level TEXT,
                program TEXT,
                branch TEXT,
                year TEXT,
                cgpa REAL,
                active_backlogs INTEGER NOT NULL DEFAULT 0,
                available_for_placement INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS postings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL CHECK (kind IN ('job', 'internship')),
                title TEXT NOT NULL,
                organization TEXT NOT NULL,
                cgpa_requirement TEXT,
                required_programs TEXT NOT NULL DEFAULT '[]',
                required_branches TEXT NOT NULL DEFAULT '{}',
                all_branches_applicable INTEGER NOT NULL DEFAULT 0,
                eligible_years TEXT NOT NULL DEFAULT '[]',
                other_requirements TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                posting_id INTEGER NOT NULL REFERENCES postings(id),
                student_id INTEGER NOT NULL REFERENCES students(id),
                status TEXT NOT NULL DEFAULT 'Applied' CHECK (status IN ('Applied', 'Reviewed', 'Interview Scheduled', 'Selected', 'Rejected')),
                cover_letter TEXT NOT NULL,
                additional_info TEXT,
                eligibility_acknowledged INTEGER NOT NULL DEFAULT 0,
                submission_ip TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (posting_id, student_id)
            );

            CREATE TABLE IF NOT EXISTS student_applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id INTEGER NOT NULL REFERENCES students(id),
                kind TEXT NOT NULL CHECK (kind IN ('job', 'internship')),
                posting_id INTEGER NOT NULL,
                company_name TEXT NOT NULL,
                position TEXT NOT NULL,
                applied_date TEXT NOT NULL,
                current_status TEXT NOT NULL CHECK (current_status IN ('Applied', 'Reviewed', 'Interview Scheduled', 'Selected', 'Rejected')),
                cover_letter TEXT NOT NULL,
                additional_info TEXT,
                UNIQUE (student_id, kind, posting_id)
            );

            CREATE TABLE IF NOT EXISTS status_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id INTEGER NOT NULL REFERENCES student_applications(id),
                status TEXT NOT NULL CHECK (status IN ('Applied', 'Reviewed', 'Interview Scheduled', 'Selected', 'Rejected')),
                updated_date TEXT NOT NULL,
                updated_by TEXT NOT NULL,
                notes TEXT
            );

            CREATE TRIGGER IF NOT EXISTS status_history_no_update
            BEFORE UPDATE ON status_history
            BEGIN
                SELECT RAISE(ABORT, 'status history is append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS status_history_no_delete
            BEFORE DELETE ON status_history
            BEGIN
                SELECT RAISE(ABORT, 'status history is append-only');
            END;

            CREATE INDEX IF NOT EXISTS idx_postings_kind ON postings(kind);
            CREATE INDEX IF NOT EXISTS idx_applications_student ON applications(student_id);
            CREATE INDEX IF NOT EXISTS idx_history_record ON status_history(record_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(PortalError::NotInitialized);
        }
        Ok(())
    }

    // --- Student operations ---

    pub fn add_student(&self, student: &StudentProfile) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO students (student_number, name, email, degree_level, program, branch,
                                   year, cgpa, active_backlogs, available_for_placement)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                student.student_number,
                student.name,
                student.email,
                student.degree_level,
                student.program,
                student.branch,
                student.year,
                student.cgpa,
                student.active_backlogs,
                student.available_for_placement,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_student_profile(&self, id: i64) -> Result<Option<StudentProfile>> {
        let student = self
            .conn
            .query_row(
                "SELECT id, student_number, name, email, degree_level, program, branch, year,
                        cgpa, active_backlogs, available_for_placement
                 FROM students WHERE id = ?1",
                [id],
                Self::row_to_student,
            )
            .optional()?;
        Ok(student)
    }

    fn row_to_student(row: &rusqlite::Row) -> rusqlite::Result<StudentProfile> {
        Ok(StudentProfile {
            id: row.get(0)?,
            student_number: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            degree_level: row.get(4)?,
            program: row.get(5)?,
            branch: row.get(6)?,
            year: row.get(7)?,
            cgpa: row.get(8)?,
            active_backlogs: row.get(9)?,
            available_for_placement: row.get(10)?,
        })
    }

    // --- Posting operations ---

    pub fn add_posting(
        &self,
        kind: PostingKind,
        title: &str,
        organization: &str,
        requirements: &Requirements,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO postings (kind, title, organization, cgpa_requirement, required_programs,
                                   required_branches, all_branches_applicable, eligible_years,
                                   other_requirements)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                kind.as_str(),
                title,
                organization,
                requirements.cgpa_requirement,
                serde_json::to_string(&requirements.required_programs)?,
                serde_json::to_string(&requirements.required_branches)?,
                requirements.all_branches_applicable,
                serde_json::to_string(&requirements.eligible_years)?,
                requirements.other_requirements,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// A posting of a different kind is reported as absent.
    pub fn get_posting(&self, kind: PostingKind, id: i64) -> Result<Option<Posting>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, kind, title, organization, cgpa_requirement, required_programs,
                        required_branches, all_branches_applicable, eligible_years,
                        other_requirements, created_at
                 FROM postings WHERE id = ?1 AND kind = ?2",
                params![id, kind.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        kind_from_sql(row.get(1)?, 1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, bool>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, Option<String>>(9)?,
                        row.get::<_, String>(10)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, kind, title, organization, cgpa, programs, branches, all, years, other, created_at)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(Posting {
            id,
            kind,
            title,
            organization,
            requirements: Requirements {
                cgpa_requirement: cgpa,
                required_programs: serde_json::from_str(&programs)?,
                required_branches: serde_json::from_str(&branches)?,
                all_branches_applicable: all,
                eligible_years: serde_json::from_str(&years)?,
                other_requirements: other,
            },
            created_at,
        }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn fresh_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    pub fn sample_student(number: &str) -> StudentProfile {
        StudentProfile {
            id: 0,
            student_number: number.to_string(),
            name: format!("Student {}", number),
            email: format!("{}@college.edu", number.to_lowercase()),
            degree_level: Some("btech".to_string()),
            program: Some("B.Tech".to_string()),
            branch: Some("Computer Science".to_string()),
            year: Some("3rd year".to_string()),
            cgpa: Some(8.1),
            active_backlogs: 0,
            available_for_placement: true,
        }
    }

    pub fn sample_requirements() -> Requirements {
        let mut requirements = Requirements {
            cgpa_requirement: Some("7.5 CGPA and above".to_string()),
            required_programs: vec!["B.Tech".to_string()],
            eligible_years: vec!["3rd Year".to_string(), "4th Year".to_string()],
            other_requirements: Some("No active backlogs".to_string()),
            ..Default::default()
        };
        requirements.required_branches.insert(
            "btech".to_string(),
            vec!["Computer Science and Engineering".to_string(), "Electronics".to_string()],
        );
        requirements
    }

    pub fn seed_student(db: &Database, number: &str) -> i64 {
        db.add_student(&sample_student(number)).unwrap()
    }

    pub fn seed_job(db: &Database) -> i64 {
        db.add_posting(PostingKind::Job, "Backend Engineer", "Acme Corp", &sample_requirements())
            .unwrap()
    }

    pub const COVER_LETTER: &str =
        "I would love to join the backend team and build reliable services at scale.";
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let db = fresh_db();
        db.init().unwrap();
        db.ensure_initialized().unwrap();
    }

    #[test]
    fn uninitialized_database_is_reported() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.ensure_initialized(), Err(PortalError::NotInitialized)));
        db.init().unwrap();
        db.ensure_initialized().unwrap();
    }

    #[test]
    fn unusable_database_directory_is_an_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let result = Database::open(&blocker.join("sub").join("placement.db"), Duration::from_millis(100));
        assert!(matches!(result, Err(PortalError::Io(_))));
    }

    #[test]
    fn posting_round_trips_requirements() {
        let db = fresh_db();
        let id = seed_job(&db);
        let posting = db.get_posting(PostingKind::Job, id).unwrap().unwrap();
        assert_eq!(posting.title, "Backend Engineer");
        assert_eq!(posting.requirements.eligible_years.len(), 2);
        assert_eq!(posting.requirements.required_branches["btech"].len(), 2);
    }

    #[test]
    fn posting_of_other_kind_is_absent() {
        let db = fresh_db();
        let id = seed_job(&db);
        assert!(db.get_posting(PostingKind::Internship, id).unwrap().is_none());
    }

    #[test]
    fn student_profile_lookup() {
        let db = fresh_db();
        let id = seed_student(&db, "S1");
        let profile = db.get_student_profile(id).unwrap().unwrap();
        assert_eq!(profile.student_number, "S1");
        assert!(profile.available_for_placement);
        assert!(db.get_student_profile(id + 100).unwrap().is_none());
    }
}
