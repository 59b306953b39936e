use serde::{Deserialize, Serialize};

use super::aggregate::{
    build_kedisiplinan_set, category_average, kedisiplinan_criteria, merge_scores,
    AttendanceCounters, KedisiplinanInput, SubmitterRole,
};
use super::curriculum::{CurriculumResolver, CurriculumSources, DEFAULT_DAY_SHIFT};
use super::final_score::{final_score, kognitif_average, CategoryWeights, KognitifInputs};
use super::grade::GradeScale;
use super::score_set::{round_off_2_decimals, ScoreSet};
use super::tahfidz::{summarize_tahfidz, TahfidzEntry, TahfidzSummary};
use super::Category;
use crate::legacy::LegacyNames;

/// Everything configurable about grading, as loaded from workspace settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GradingConfig {
    pub weights: CategoryWeights,
    pub grade_scale: GradeScale,
    pub uas_oral_enabled: bool,
    pub day_shift: String,
    pub effective_days: u32,
    pub legacy: LegacyNames,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            weights: CategoryWeights::default(),
            grade_scale: GradeScale::default(),
            uas_oral_enabled: true,
            day_shift: DEFAULT_DAY_SHIFT.to_string(),
            effective_days: 0,
            legacy: LegacyNames::builtin(),
        }
    }
}

impl GradingConfig {
    pub fn resolver(&self) -> CurriculumResolver<'_> {
        CurriculumResolver::new(&self.legacy, &self.day_shift)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentContext {
    pub santri_id: String,
    #[serde(default)]
    pub halaqah_id: Option<String>,
    #[serde(default)]
    pub shift: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curriculum {
    #[serde(default)]
    pub akhlak: CurriculumSources,
    #[serde(default)]
    pub kedisiplinan: CurriculumSources,
    #[serde(default)]
    pub tahsin: CurriculumSources,
}

impl Curriculum {
    pub fn get(&self, category: Category) -> &CurriculumSources {
        match category {
            Category::Akhlak => &self.akhlak,
            Category::Kedisiplinan => &self.kedisiplinan,
            Category::Tahsin => &self.tahsin,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut CurriculumSources {
        match category {
            Category::Akhlak => &mut self.akhlak,
            Category::Kedisiplinan => &mut self.kedisiplinan,
            Category::Tahsin => &mut self.tahsin,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryScores {
    #[serde(default)]
    pub akhlak: ScoreSet,
    #[serde(default)]
    pub kedisiplinan: ScoreSet,
    #[serde(default)]
    pub tahsin: ScoreSet,
}

impl CategoryScores {
    pub fn get(&self, category: Category) -> &ScoreSet {
        match category {
            Category::Akhlak => &self.akhlak,
            Category::Kedisiplinan => &self.kedisiplinan,
            Category::Tahsin => &self.tahsin,
        }
    }
}

/// Inputs for one report card computation. Exam scores, Tahfidz entries and
/// attendance are already final here: merging them with a stored card is the
/// caller's job. Criterion scores are merged by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ReportInput {
    pub student: StudentContext,
    pub curriculum: Curriculum,
    pub submitted: CategoryScores,
    pub persisted: CategoryScores,
    pub tahfidz: Vec<TahfidzEntry>,
    pub uas_written: Option<f64>,
    pub uas_oral: Option<f64>,
    pub attendance: Option<AttendanceCounters>,
    /// Counters stored with the card before this submission, if any.
    pub persisted_attendance: Option<AttendanceCounters>,
    pub role: SubmitterRole,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCriteria {
    pub akhlak: Vec<String>,
    pub kedisiplinan: Vec<String>,
    pub tahsin: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAverages {
    pub akhlak: f64,
    pub kedisiplinan: f64,
    pub tahsin: f64,
    pub tahfidz: f64,
    pub kognitif: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutcome {
    pub criteria: ResolvedCriteria,
    pub scores: CategoryScores,
    pub tahfidz: TahfidzSummary,
    pub attendance_score: Option<f64>,
    pub presence_percent: Option<f64>,
    /// Unrounded; feeds the final score.
    pub averages: CategoryAverages,
    pub final_score: f64,
    pub predikat: String,
    pub weights_total: f64,
}

/// Keys of the stored set followed by submitted keys it didn't have. Used as
/// the last-resort criteria list when nothing is configured.
fn stored_keys(persisted: &ScoreSet, submitted: &ScoreSet) -> ScoreSet {
    let mut out = persisted.clone();
    for (name, v) in submitted.iter() {
        if !out.contains(name) {
            out.insert(name, v);
        }
    }
    out
}

pub fn compute_report(input: &ReportInput, config: &GradingConfig) -> ReportOutcome {
    let resolver = config.resolver();
    let shift = input.student.shift.as_deref();
    let resolve = |category: Category| {
        let stored = stored_keys(input.persisted.get(category), input.submitted.get(category));
        resolver.resolve(
            category,
            &input.curriculum.get(category).group_config,
            &input.curriculum.get(category).global_active,
            &stored,
        )
    };

    let akhlak_criteria = resolve(Category::Akhlak);
    let tahsin_criteria = resolve(Category::Tahsin);
    let kedisiplinan_base = resolve(Category::Kedisiplinan);

    let akhlak = merge_scores(
        &resolver,
        &akhlak_criteria,
        &input.submitted.akhlak,
        &input.persisted.akhlak,
    );
    let tahsin = merge_scores(
        &resolver,
        &tahsin_criteria,
        &input.submitted.tahsin,
        &input.persisted.tahsin,
    );
    let kedisiplinan = build_kedisiplinan_set(
        &resolver,
        &KedisiplinanInput {
            attendance: input.attendance.as_ref(),
            persisted_attendance: input.persisted_attendance.as_ref(),
            shift,
            base_criteria: &kedisiplinan_base,
            submitted: &input.submitted.kedisiplinan,
            persisted: &input.persisted.kedisiplinan,
            role: input.role,
        },
    );
    let kedisiplinan_reported =
        kedisiplinan_criteria(&resolver, kedisiplinan_base, shift, &kedisiplinan);

    let tahfidz = summarize_tahfidz(&input.tahfidz);
    let tahfidz_score = tahfidz.score;
    let akhlak_avg = category_average(Category::Akhlak, &akhlak);
    let kedisiplinan_avg = category_average(Category::Kedisiplinan, &kedisiplinan);
    let tahsin_avg = category_average(Category::Tahsin, &tahsin);
    let kognitif_avg = kognitif_average(
        &KognitifInputs {
            tahfidz: tahfidz_score,
            tahsin: tahsin_avg,
            uas_written: input.uas_written,
            uas_oral: input.uas_oral,
        },
        config.uas_oral_enabled,
    );

    let final_raw = final_score(akhlak_avg, kedisiplinan_avg, kognitif_avg, &config.weights);
    let final_rounded = round_off_2_decimals(final_raw);
    let predikat = config.grade_scale.band(final_rounded).to_string();

    ReportOutcome {
        criteria: ResolvedCriteria {
            akhlak: akhlak_criteria,
            kedisiplinan: kedisiplinan_reported,
            tahsin: tahsin_criteria,
        },
        scores: CategoryScores {
            akhlak,
            kedisiplinan,
            tahsin,
        },
        tahfidz,
        attendance_score: input.attendance.map(|a| a.attendance_score()),
        presence_percent: input
            .attendance
            .filter(|a| a.effective_days > 0)
            .map(|a| round_off_2_decimals(a.presence_percent())),
        averages: CategoryAverages {
            akhlak: akhlak_avg,
            kedisiplinan: kedisiplinan_avg,
            tahsin: tahsin_avg,
            tahfidz: tahfidz_score,
            kognitif: kognitif_avg,
        },
        final_score: final_rounded,
        predikat,
        weights_total: config.weights.total(),
    }
}
