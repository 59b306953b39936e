//! Report-card grading engine.
//!
//! Everything under `calc` is pure: no I/O, no shared state. The workspace
//! layer (`crate::report`) loads configuration and stored cards, calls
//! [`compute_report`], and persists whatever comes back.

mod aggregate;
mod curriculum;
mod final_score;
mod grade;
mod pipeline;
mod score_set;
mod tahfidz;

use serde::{Deserialize, Serialize};

use aggregate::{EMPTY_AKHLAK_AVERAGE, EMPTY_KEDISIPLINAN_AVERAGE, EMPTY_TAHSIN_AVERAGE};
pub use aggregate::{
    kedisiplinan_criteria, AttendanceCounters, SubmitterRole, ATTENDANCE_CRITERION,
};
pub use curriculum::{CriteriaCatalog, Criterion, CurriculumSources, DEFAULT_DAY_SHIFT};
pub use final_score::CategoryWeights;
pub use grade::{GradeBand, GradeScale};
pub use pipeline::{
    compute_report, CategoryScores, Curriculum, GradingConfig, ReportInput, ReportOutcome,
    StudentContext,
};
pub use score_set::{round_off_2_decimals, ScoreSet};
pub use tahfidz::TahfidzEntry;

/// Criterion-based categories. Tahfidz (per unit) and the UAS exams are not
/// criterion-based and feed the Kognitif composite instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Akhlak,
    Kedisiplinan,
    Tahsin,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Akhlak, Category::Kedisiplinan, Category::Tahsin];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "akhlak" => Some(Self::Akhlak),
            "kedisiplinan" => Some(Self::Kedisiplinan),
            "tahsin" => Some(Self::Tahsin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Akhlak => "akhlak",
            Self::Kedisiplinan => "kedisiplinan",
            Self::Tahsin => "tahsin",
        }
    }

    /// Average reported for this category when no criterion is scored.
    pub fn empty_average(self) -> f64 {
        match self {
            Self::Akhlak => EMPTY_AKHLAK_AVERAGE,
            Self::Kedisiplinan => EMPTY_KEDISIPLINAN_AVERAGE,
            Self::Tahsin => EMPTY_TAHSIN_AVERAGE,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
