use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calc::{
    compute_report, AttendanceCounters, Category, CategoryScores, CriteriaCatalog, Criterion,
    Curriculum, CurriculumSources, GradingConfig, ReportInput, ReportOutcome, ScoreSet,
    StudentContext, SubmitterRole, TahfidzEntry, ATTENDANCE_CRITERION,
};
use crate::legacy::LegacyNames;
use crate::setup::SetupError;

#[derive(Debug, Clone, Serialize)]
pub struct ReportError {
    pub code: &'static str,
    pub message: String,
}

impl ReportError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    fn update(e: impl std::fmt::Display) -> Self {
        Self::new("db_update_failed", e.to_string())
    }
}

impl From<SetupError> for ReportError {
    fn from(e: SetupError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

/// A report card row as stored. Score keys are migrated to current names on
/// read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCard {
    pub id: String,
    pub santri_id: String,
    pub term_id: String,
    pub scores: CategoryScores,
    pub tahfidz: Vec<TahfidzEntry>,
    pub uas_written: Option<f64>,
    pub uas_oral: Option<f64>,
    pub attendance: Option<AttendanceCounters>,
    pub teacher_notes: Option<String>,
    pub final_score: f64,
    pub predikat: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// What a caller sends when saving a card. `None` fields keep the stored
/// value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSubmission {
    #[serde(default)]
    pub scores: CategoryScores,
    #[serde(default)]
    pub tahfidz: Option<Vec<TahfidzEntry>>,
    #[serde(default)]
    pub uas_written: Option<f64>,
    #[serde(default)]
    pub uas_oral: Option<f64>,
    #[serde(default)]
    pub attendance: Option<AttendanceCounters>,
    #[serde(default)]
    pub teacher_notes: Option<String>,
    #[serde(default)]
    pub role: SubmitterRole,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedReport {
    pub report_id: String,
    pub created: bool,
    pub outcome: ReportOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportListRow {
    pub id: String,
    pub santri_id: String,
    pub santri_name: String,
    pub halaqah_id: Option<String>,
    pub term_id: String,
    pub final_score: f64,
    pub predikat: String,
    pub updated_at: Option<String>,
}

pub fn load_criteria(conn: &Connection) -> Result<Vec<Criterion>, ReportError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, category, name, sort_order, active, halaqah_id
             FROM criteria
             ORDER BY category, sort_order, name",
        )
        .map_err(ReportError::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ReportError::query)?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, category, name, sort_order, active, halaqah_id) in rows {
        // Rows with a category this build does not know are skipped.
        let Some(category) = Category::parse(&category) else {
            debug!(criterion = %id, category = %category, "skipping criterion with unknown category");
            continue;
        };
        out.push(Criterion {
            id,
            category,
            name,
            sort_order,
            active: active != 0,
            halaqah_id,
        });
    }
    Ok(out)
}

/// The stored per-halaqah list for `category`, if one was ever saved.
pub fn load_group_config(
    conn: &Connection,
    halaqah_id: &str,
    category: Category,
) -> Result<Option<Vec<String>>, ReportError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT names_json FROM halaqah_curriculum WHERE halaqah_id = ? AND category = ?",
            (halaqah_id, category.as_str()),
            |r| r.get(0),
        )
        .optional()
        .map_err(ReportError::query)?;
    match raw {
        None => Ok(None),
        Some(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| ReportError::query(format!("halaqah_curriculum names_json: {}", e))),
    }
}

fn parse_json_column<T: serde::de::DeserializeOwned + Default>(
    raw: Option<String>,
    column: &str,
) -> Result<T, ReportError> {
    match raw {
        None => Ok(T::default()),
        Some(s) if s.trim().is_empty() => Ok(T::default()),
        Some(s) => serde_json::from_str(&s)
            .map_err(|e| ReportError::query(format!("report_cards.{}: {}", column, e))),
    }
}

fn to_json_column<T: Serialize>(value: &T) -> Result<String, ReportError> {
    serde_json::to_string(value).map_err(ReportError::update)
}

/// Stored scores with the submitted ones laid over them. Nothing stored is
/// dropped, so a shift or curriculum change can be undone without losing
/// scores. Kehadiran is never copied from the submission.
fn overlay_scores(legacy: &LegacyNames, persisted: &ScoreSet, submitted: &ScoreSet) -> ScoreSet {
    let mut out = legacy.migrate_scores(persisted);
    for (name, v) in legacy.migrate_scores(submitted).iter() {
        if name == ATTENDANCE_CRITERION {
            continue;
        }
        out.insert(name, v);
    }
    out
}

pub struct ReportContext<'a> {
    pub conn: &'a Connection,
    pub santri_id: &'a str,
    pub term_id: &'a str,
}

impl<'a> ReportContext<'a> {
    pub fn new(conn: &'a Connection, santri_id: &'a str, term_id: &'a str) -> Self {
        Self {
            conn,
            santri_id,
            term_id,
        }
    }

    /// Halaqah and effective shift. A shift set on the santri overrides the
    /// halaqah's.
    pub fn load_student_context(&self) -> Result<StudentContext, ReportError> {
        let row: Option<(Option<String>, Option<String>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT s.halaqah_id, s.shift, h.shift
                 FROM santri s
                 LEFT JOIN halaqah h ON h.id = s.halaqah_id
                 WHERE s.id = ?",
                [self.santri_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()
            .map_err(ReportError::query)?;
        let Some((halaqah_id, own_shift, group_shift)) = row else {
            return Err(ReportError::new("not_found", "santri not found"));
        };
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        Ok(StudentContext {
            santri_id: self.santri_id.to_string(),
            halaqah_id,
            shift: non_empty(own_shift).or_else(|| non_empty(group_shift)),
        })
    }

    pub fn load_curriculum(
        &self,
        student: &StudentContext,
        legacy: &LegacyNames,
    ) -> Result<Curriculum, ReportError> {
        let criteria = load_criteria(self.conn)?;
        let catalog = CriteriaCatalog::new(&criteria, legacy);
        let halaqah_id = student.halaqah_id.as_deref();

        let mut curriculum = Curriculum::default();
        for category in Category::ALL {
            let group_config = match halaqah_id {
                Some(h) => load_group_config(self.conn, h, category)?.unwrap_or_default(),
                None => Vec::new(),
            };
            *curriculum.get_mut(category) = CurriculumSources {
                group_config,
                global_active: catalog.active_names(category, halaqah_id),
            };
        }
        Ok(curriculum)
    }

    pub fn load_report_card(&self, legacy: &LegacyNames) -> Result<Option<StoredCard>, ReportError> {
        type Row = (
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<f64>,
            Option<f64>,
            (Option<i64>, Option<i64>, Option<i64>, Option<i64>),
            Option<String>,
            f64,
            String,
            (Option<String>, Option<String>),
        );
        let row: Option<Row> = self
            .conn
            .query_row(
                "SELECT id, akhlak_json, kedisiplinan_json, tahsin_json, tahfidz_json,
                        uas_written, uas_oral, sick, excused, unexcused, effective_days,
                        teacher_notes, final_score, predikat, created_at, updated_at
                 FROM report_cards
                 WHERE santri_id = ? AND term_id = ?",
                (self.santri_id, self.term_id),
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                        r.get(6)?,
                        (r.get(7)?, r.get(8)?, r.get(9)?, r.get(10)?),
                        r.get(11)?,
                        r.get(12)?,
                        r.get(13)?,
                        (r.get(14)?, r.get(15)?),
                    ))
                },
            )
            .optional()
            .map_err(ReportError::query)?;
        let Some((
            id,
            akhlak,
            kedisiplinan,
            tahsin,
            tahfidz,
            uas_written,
            uas_oral,
            (sick, excused, unexcused, effective_days),
            teacher_notes,
            final_score,
            predikat,
            (created_at, updated_at),
        )) = row
        else {
            return Ok(None);
        };

        let akhlak: ScoreSet = parse_json_column(akhlak, "akhlak_json")?;
        let kedisiplinan: ScoreSet = parse_json_column(kedisiplinan, "kedisiplinan_json")?;
        let tahsin: ScoreSet = parse_json_column(tahsin, "tahsin_json")?;
        let tahfidz: Vec<TahfidzEntry> = parse_json_column(tahfidz, "tahfidz_json")?;

        let counter = |v: Option<i64>| v.and_then(|n| u32::try_from(n).ok()).unwrap_or(0);
        let attendance = if sick.is_some() || excused.is_some() || unexcused.is_some() {
            Some(AttendanceCounters {
                sick: counter(sick),
                excused: counter(excused),
                unexcused: counter(unexcused),
                effective_days: counter(effective_days),
            })
        } else {
            None
        };

        Ok(Some(StoredCard {
            id,
            santri_id: self.santri_id.to_string(),
            term_id: self.term_id.to_string(),
            scores: CategoryScores {
                akhlak: legacy.migrate_scores(&akhlak),
                kedisiplinan: legacy.migrate_scores(&kedisiplinan),
                tahsin: legacy.migrate_scores(&tahsin),
            },
            tahfidz,
            uas_written,
            uas_oral,
            attendance,
            teacher_notes,
            final_score,
            predikat,
            created_at,
            updated_at,
        }))
    }

    /// Runs the grading pipeline against the stored card and upserts the
    /// result. One row per santri and term.
    pub fn compute_and_save(
        &self,
        submission: ReportSubmission,
        config: &GradingConfig,
    ) -> Result<SavedReport, ReportError> {
        let student = self.load_student_context()?;
        let curriculum = self.load_curriculum(&student, &config.legacy)?;
        let stored = self.load_report_card(&config.legacy)?;

        let persisted = stored
            .as_ref()
            .map(|c| c.scores.clone())
            .unwrap_or_default();
        let tahfidz = submission
            .tahfidz
            .or_else(|| stored.as_ref().map(|c| c.tahfidz.clone()))
            .unwrap_or_default();
        let uas_written = submission
            .uas_written
            .or_else(|| stored.as_ref().and_then(|c| c.uas_written));
        let uas_oral = submission
            .uas_oral
            .or_else(|| stored.as_ref().and_then(|c| c.uas_oral));
        let persisted_attendance = stored.as_ref().and_then(|c| c.attendance);
        let attendance = submission
            .attendance
            .or(persisted_attendance)
            .map(|mut a| {
                if a.effective_days == 0 {
                    a.effective_days = config.effective_days;
                }
                a
            });
        let teacher_notes = submission
            .teacher_notes
            .or_else(|| stored.as_ref().and_then(|c| c.teacher_notes.clone()));

        let input = ReportInput {
            student,
            curriculum,
            submitted: submission.scores,
            persisted,
            tahfidz,
            uas_written,
            uas_oral,
            attendance,
            persisted_attendance,
            role: submission.role,
        };
        let outcome = compute_report(&input, config);

        let legacy = &config.legacy;
        let akhlak = overlay_scores(legacy, &input.persisted.akhlak, &input.submitted.akhlak);
        let tahsin = overlay_scores(legacy, &input.persisted.tahsin, &input.submitted.tahsin);
        let mut kedisiplinan = overlay_scores(
            legacy,
            &input.persisted.kedisiplinan,
            &input.submitted.kedisiplinan,
        );
        if let Some(v) = outcome.scores.kedisiplinan.get(ATTENDANCE_CRITERION) {
            kedisiplinan.insert(ATTENDANCE_CRITERION, v);
        }

        let now = Utc::now().to_rfc3339();
        let (report_id, created) = match stored.as_ref() {
            Some(c) => (c.id.clone(), false),
            None => (Uuid::new_v4().to_string(), true),
        };
        let a = input.attendance;
        let avg = outcome.averages;

        self.conn
            .execute(
                "INSERT INTO report_cards(
                    id, santri_id, term_id,
                    akhlak_json, kedisiplinan_json, tahsin_json, tahfidz_json,
                    uas_written, uas_oral, sick, excused, unexcused, effective_days,
                    akhlak_avg, kedisiplinan_avg, tahsin_avg, tahfidz_avg, kognitif_avg,
                    final_score, predikat, teacher_notes, created_at, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(santri_id, term_id) DO UPDATE SET
                    akhlak_json = excluded.akhlak_json,
                    kedisiplinan_json = excluded.kedisiplinan_json,
                    tahsin_json = excluded.tahsin_json,
                    tahfidz_json = excluded.tahfidz_json,
                    uas_written = excluded.uas_written,
                    uas_oral = excluded.uas_oral,
                    sick = excluded.sick,
                    excused = excluded.excused,
                    unexcused = excluded.unexcused,
                    effective_days = excluded.effective_days,
                    akhlak_avg = excluded.akhlak_avg,
                    kedisiplinan_avg = excluded.kedisiplinan_avg,
                    tahsin_avg = excluded.tahsin_avg,
                    tahfidz_avg = excluded.tahfidz_avg,
                    kognitif_avg = excluded.kognitif_avg,
                    final_score = excluded.final_score,
                    predikat = excluded.predikat,
                    teacher_notes = excluded.teacher_notes,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    report_id,
                    self.santri_id,
                    self.term_id,
                    to_json_column(&akhlak)?,
                    to_json_column(&kedisiplinan)?,
                    to_json_column(&tahsin)?,
                    to_json_column(&input.tahfidz)?,
                    input.uas_written,
                    input.uas_oral,
                    a.map(|a| a.sick),
                    a.map(|a| a.excused),
                    a.map(|a| a.unexcused),
                    a.map(|a| a.effective_days),
                    avg.akhlak,
                    avg.kedisiplinan,
                    avg.tahsin,
                    avg.tahfidz,
                    avg.kognitif,
                    outcome.final_score,
                    outcome.predikat,
                    teacher_notes,
                    now,
                    now,
                ],
            )
            .map_err(ReportError::update)?;

        info!(
            santri = self.santri_id,
            term = self.term_id,
            created,
            final_score = outcome.final_score,
            predikat = %outcome.predikat,
            "report card saved"
        );
        Ok(SavedReport {
            report_id,
            created,
            outcome,
        })
    }

    pub fn delete_report_card(&self) -> Result<(), ReportError> {
        let n = self
            .conn
            .execute(
                "DELETE FROM report_cards WHERE santri_id = ? AND term_id = ?",
                (self.santri_id, self.term_id),
            )
            .map_err(ReportError::update)?;
        if n == 0 {
            return Err(ReportError::new("not_found", "report card not found"));
        }
        info!(santri = self.santri_id, term = self.term_id, "report card deleted");
        Ok(())
    }
}

pub fn list_report_cards(
    conn: &Connection,
    term_id: Option<&str>,
    halaqah_id: Option<&str>,
) -> Result<Vec<ReportListRow>, ReportError> {
    let mut stmt = conn
        .prepare(
            "SELECT rc.id, rc.santri_id, s.name, s.halaqah_id, rc.term_id,
                    rc.final_score, rc.predikat, rc.updated_at
             FROM report_cards rc
             JOIN santri s ON s.id = rc.santri_id
             WHERE (?1 IS NULL OR rc.term_id = ?1)
               AND (?2 IS NULL OR s.halaqah_id = ?2)
             ORDER BY rc.term_id, s.name, rc.santri_id",
        )
        .map_err(ReportError::query)?;
    let rows = stmt
        .query_map((term_id, halaqah_id), |r| {
            Ok(ReportListRow {
                id: r.get(0)?,
                santri_id: r.get(1)?,
                santri_name: r.get(2)?,
                halaqah_id: r.get(3)?,
                term_id: r.get(4)?,
                final_score: r.get(5)?,
                predikat: r.get(6)?,
                updated_at: r.get(7)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ReportError::query)?;
    Ok(rows)
}
