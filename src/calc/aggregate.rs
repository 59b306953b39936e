use serde::{Deserialize, Serialize};

use super::curriculum::CurriculumResolver;
use super::score_set::{ScoreSet, SCORE_MAX, SCORE_MIN};
use super::Category;

pub const EMPTY_AKHLAK_AVERAGE: f64 = 0.0;
pub const EMPTY_KEDISIPLINAN_AVERAGE: f64 = 0.0;
pub const EMPTY_TAHSIN_AVERAGE: f64 = 0.0;

/// Attendance-derived Kedisiplinan criterion. Admin-only.
pub const ATTENDANCE_CRITERION: &str = "Kehadiran";
/// Congregational prayer; not scored on the day shift.
pub const PRAYER_CRITERION: &str = "Shalat Berjamaah";

const SICK_PENALTY: f64 = 1.0;
const EXCUSED_PENALTY: f64 = 2.0;
const UNEXCUSED_PENALTY: f64 = 4.0;

pub fn category_average(category: Category, scores: &ScoreSet) -> f64 {
    scores.average_or(category.empty_average())
}

/// Scores for `criteria`, in that order: the submitted value, else the
/// persisted one. Criteria with neither stay unscored; anything not in
/// `criteria` is dropped.
pub fn merge_scores(
    resolver: &CurriculumResolver<'_>,
    criteria: &[String],
    submitted: &ScoreSet,
    persisted: &ScoreSet,
) -> ScoreSet {
    let submitted = resolver.legacy().migrate_scores(submitted);
    let persisted = resolver.legacy().migrate_scores(persisted);
    let mut out = ScoreSet::new();
    for name in criteria {
        if let Some(v) = submitted.get(name).or_else(|| persisted.get(name)) {
            out.insert(name.clone(), v);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceCounters {
    #[serde(default)]
    pub sick: u32,
    #[serde(default)]
    pub excused: u32,
    #[serde(default)]
    pub unexcused: u32,
    #[serde(default)]
    pub effective_days: u32,
}

impl AttendanceCounters {
    /// `max(SCORE_MIN, 100 - (sick*1 + excused*2 + unexcused*4))`.
    pub fn attendance_score(&self) -> f64 {
        let deduction = f64::from(self.sick) * SICK_PENALTY
            + f64::from(self.excused) * EXCUSED_PENALTY
            + f64::from(self.unexcused) * UNEXCUSED_PENALTY;
        (SCORE_MAX - deduction).max(SCORE_MIN)
    }

    /// Same sick/excused/unexcused counts. The effective-days denominator
    /// does not affect the attendance score and is ignored.
    pub fn same_absences(&self, other: &AttendanceCounters) -> bool {
        self.sick == other.sick && self.excused == other.excused && self.unexcused == other.unexcused
    }

    pub fn absent_days(&self) -> u32 {
        self.sick
            .saturating_add(self.excused)
            .saturating_add(self.unexcused)
    }

    /// Share of effective days attended, 0..=100. Zero when no effective days
    /// are configured.
    pub fn presence_percent(&self) -> f64 {
        if self.effective_days == 0 {
            return 0.0;
        }
        let present = self.effective_days.saturating_sub(self.absent_days());
        100.0 * f64::from(present) / f64::from(self.effective_days)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitterRole {
    #[default]
    Teacher,
    Admin,
}

pub struct KedisiplinanInput<'a> {
    pub attendance: Option<&'a AttendanceCounters>,
    /// Counters stored with the card before this submission.
    pub persisted_attendance: Option<&'a AttendanceCounters>,
    pub shift: Option<&'a str>,
    /// Resolved Kedisiplinan criteria, before the shift rule.
    pub base_criteria: &'a [String],
    pub submitted: &'a ScoreSet,
    pub persisted: &'a ScoreSet,
    pub role: SubmitterRole,
}

/// Builds the Kedisiplinan score set.
///
/// Shift only decides whether congregational prayer is present; every other
/// score survives a shift change. Kehadiran is never taken from a teacher
/// submission: a persisted value is kept unless the attendance counters
/// changed, in which case it is derived again. Admins may set it directly.
pub fn build_kedisiplinan_set(
    resolver: &CurriculumResolver<'_>,
    input: &KedisiplinanInput<'_>,
) -> ScoreSet {
    let legacy = resolver.legacy();
    let submitted = legacy.migrate_scores(input.submitted);
    let persisted = legacy.migrate_scores(input.persisted);
    let criteria = resolver.apply_shift_rule(
        Category::Kedisiplinan,
        input.base_criteria.to_vec(),
        input.shift,
    );

    let derived = input.attendance.map(AttendanceCounters::attendance_score);
    let attendance_changed = match (input.attendance, input.persisted_attendance) {
        (Some(now), Some(before)) => !now.same_absences(before),
        (Some(_), None) => true,
        (None, _) => false,
    };
    let kehadiran = match input.role {
        SubmitterRole::Teacher if attendance_changed => derived,
        SubmitterRole::Teacher => persisted.get(ATTENDANCE_CRITERION).or(derived),
        SubmitterRole::Admin => submitted
            .get(ATTENDANCE_CRITERION)
            .or(derived)
            .or_else(|| persisted.get(ATTENDANCE_CRITERION)),
    };

    let mut out = ScoreSet::new();
    let mut placed = false;
    for name in &criteria {
        if name == ATTENDANCE_CRITERION {
            placed = true;
            if let Some(v) = kehadiran {
                out.insert(name.clone(), v);
            }
            continue;
        }
        if let Some(v) = submitted.get(name).or_else(|| persisted.get(name)) {
            out.insert(name.clone(), v);
        }
    }
    if !placed && !legacy.is_retired(ATTENDANCE_CRITERION) {
        if let Some(v) = kehadiran {
            out.insert(ATTENDANCE_CRITERION, v);
        }
    }
    out
}

/// Kedisiplinan criteria as reported: the shift rule applied to `base`, then
/// Kehadiran appended when `scored` carries it.
pub fn kedisiplinan_criteria(
    resolver: &CurriculumResolver<'_>,
    base: Vec<String>,
    shift: Option<&str>,
    scored: &ScoreSet,
) -> Vec<String> {
    let mut criteria = resolver.apply_shift_rule(Category::Kedisiplinan, base, shift);
    if scored.contains(ATTENDANCE_CRITERION)
        && !criteria.iter().any(|name| name == ATTENDANCE_CRITERION)
    {
        criteria.push(ATTENDANCE_CRITERION.to_string());
    }
    criteria
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::DEFAULT_DAY_SHIFT;
    use crate::legacy::LegacyNames;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn attendance_score_deducts_and_floors() {
        let a = AttendanceCounters {
            sick: 2,
            excused: 1,
            unexcused: 0,
            effective_days: 120,
        };
        assert_eq!(a.attendance_score(), 96.0);

        let heavy = AttendanceCounters {
            unexcused: 40,
            ..AttendanceCounters::default()
        };
        assert_eq!(heavy.attendance_score(), SCORE_MIN);
        assert_eq!(AttendanceCounters::default().attendance_score(), 100.0);
    }

    #[test]
    fn presence_percent_handles_zero_days() {
        assert_eq!(AttendanceCounters::default().presence_percent(), 0.0);
        let a = AttendanceCounters {
            sick: 3,
            excused: 3,
            unexcused: 0,
            effective_days: 120,
        };
        assert!((a.presence_percent() - 95.0).abs() < 1e-9);
    }

    #[test]
    fn category_average_uses_per_category_sentinel() {
        assert_eq!(category_average(Category::Tahsin, &ScoreSet::new()), 0.0);
        let s: ScoreSet = [("Adab", 80.0), ("Kejujuran", 90.0)].into_iter().collect();
        assert_eq!(category_average(Category::Akhlak, &s), 85.0);
    }

    #[test]
    fn merge_prefers_submitted_then_persisted() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let submitted: ScoreSet = [("Adab", 90.0), ("Tidak Aktif", 50.0)].into_iter().collect();
        let persisted: ScoreSet = [("Adab", 60.0), ("Kejujuran", 70.0)].into_iter().collect();
        let out = merge_scores(
            &resolver,
            &names(&["Kejujuran", "Adab", "Sopan Santun"]),
            &submitted,
            &persisted,
        );
        assert_eq!(out.names(), names(&["Kejujuran", "Adab"]));
        assert_eq!(out.get("Adab"), Some(90.0));
        assert_eq!(out.get("Kejujuran"), Some(70.0));
    }

    #[test]
    fn teacher_submission_cannot_overwrite_persisted_kehadiran() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let attendance = AttendanceCounters {
            sick: 2,
            excused: 1,
            unexcused: 0,
            effective_days: 120,
        };
        let submitted: ScoreSet = [("Kehadiran", 100.0), ("Kerapian", 85.0)]
            .into_iter()
            .collect();
        let persisted: ScoreSet = [("Kehadiran", 88.0)].into_iter().collect();
        let base = names(&["Kehadiran", "Kerapian"]);
        let out = build_kedisiplinan_set(
            &resolver,
            &KedisiplinanInput {
                attendance: Some(&attendance),
                persisted_attendance: Some(&attendance),
                shift: Some("Siang"),
                base_criteria: &base,
                submitted: &submitted,
                persisted: &persisted,
                role: SubmitterRole::Teacher,
            },
        );
        assert_eq!(out.get("Kehadiran"), Some(88.0));
        assert_eq!(out.get("Kerapian"), Some(85.0));

        // Nothing persisted yet: derived from attendance, still not the teacher's value.
        let out = build_kedisiplinan_set(
            &resolver,
            &KedisiplinanInput {
                attendance: Some(&attendance),
                persisted_attendance: None,
                shift: Some("Siang"),
                base_criteria: &base,
                submitted: &submitted,
                persisted: &ScoreSet::new(),
                role: SubmitterRole::Teacher,
            },
        );
        assert_eq!(out.get("Kehadiran"), Some(96.0));
    }

    #[test]
    fn changed_attendance_rederives_kehadiran_for_teacher() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let before = AttendanceCounters {
            sick: 2,
            excused: 1,
            unexcused: 0,
            effective_days: 120,
        };
        let now = AttendanceCounters {
            unexcused: 10,
            ..AttendanceCounters::default()
        };
        let submitted: ScoreSet = [("Kehadiran", 100.0)].into_iter().collect();
        let persisted: ScoreSet = [("Kehadiran", 96.0)].into_iter().collect();
        let base = names(&["Kehadiran"]);
        let out = build_kedisiplinan_set(
            &resolver,
            &KedisiplinanInput {
                attendance: Some(&now),
                persisted_attendance: Some(&before),
                shift: Some("Siang"),
                base_criteria: &base,
                submitted: &submitted,
                persisted: &persisted,
                role: SubmitterRole::Teacher,
            },
        );
        assert_eq!(out.get("Kehadiran"), Some(60.0));

        // Only the denominator moved: the stored score stands.
        let widened = AttendanceCounters {
            effective_days: 200,
            ..before
        };
        let out = build_kedisiplinan_set(
            &resolver,
            &KedisiplinanInput {
                attendance: Some(&widened),
                persisted_attendance: Some(&before),
                shift: Some("Siang"),
                base_criteria: &base,
                submitted: &submitted,
                persisted: &persisted,
                role: SubmitterRole::Teacher,
            },
        );
        assert_eq!(out.get("Kehadiran"), Some(96.0));
    }

    #[test]
    fn reported_kedisiplinan_criteria_include_scored_kehadiran() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let scored: ScoreSet = [("Kehadiran", 90.0)].into_iter().collect();
        assert_eq!(
            kedisiplinan_criteria(&resolver, names(&["Kerapian"]), Some("Siang"), &scored),
            names(&["Kerapian", "Kehadiran"])
        );
        assert_eq!(
            kedisiplinan_criteria(
                &resolver,
                names(&["Kehadiran", "Kerapian"]),
                Some("Pagi"),
                &scored
            ),
            names(&["Kehadiran", "Kerapian", PRAYER_CRITERION])
        );
        assert_eq!(
            kedisiplinan_criteria(&resolver, names(&["Kerapian"]), Some("Siang"), &ScoreSet::new()),
            names(&["Kerapian"])
        );
    }

    #[test]
    fn admin_may_set_kehadiran() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let submitted: ScoreSet = [("Kehadiran", 70.0)].into_iter().collect();
        let persisted: ScoreSet = [("Kehadiran", 88.0)].into_iter().collect();
        let out = build_kedisiplinan_set(
            &resolver,
            &KedisiplinanInput {
                attendance: None,
                persisted_attendance: None,
                shift: Some("Siang"),
                base_criteria: &[],
                submitted: &submitted,
                persisted: &persisted,
                role: SubmitterRole::Admin,
            },
        );
        assert_eq!(out.get("Kehadiran"), Some(70.0));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn shift_change_only_touches_prayer() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let persisted: ScoreSet = [("Sholat Berjamaah", 90.0), ("Kerapian", 80.0)]
            .into_iter()
            .collect();
        let base = names(&["Kerapian"]);
        let empty = ScoreSet::new();
        let input = |shift: Option<&'static str>| KedisiplinanInput {
            attendance: None,
            persisted_attendance: None,
            shift,
            base_criteria: &base,
            submitted: &empty,
            persisted: &persisted,
            role: SubmitterRole::Teacher,
        };

        let day = build_kedisiplinan_set(&resolver, &input(Some("Siang")));
        assert_eq!(day.names(), names(&["Kerapian"]));
        assert!(!day.contains("Sholat Berjamaah"));

        let morning = build_kedisiplinan_set(&resolver, &input(Some("Pagi")));
        assert_eq!(morning.get("Kerapian"), Some(80.0));
        assert_eq!(morning.get(PRAYER_CRITERION), Some(90.0));
    }
}
