use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::aggregate::PRAYER_CRITERION;
use super::{Category, ScoreSet};
use crate::legacy::LegacyNames;

/// Shift value that excludes congregational-prayer scoring.
pub const DEFAULT_DAY_SHIFT: &str = "Siang";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub id: String,
    pub category: Category,
    pub name: String,
    pub sort_order: i64,
    pub active: bool,
    /// `None` for global criteria, otherwise the owning halaqah.
    pub halaqah_id: Option<String>,
}

/// The two configuration inputs the resolver works from, for one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumSources {
    #[serde(default)]
    pub group_config: Vec<String>,
    #[serde(default)]
    pub global_active: Vec<String>,
}

/// View over persisted criterion rows.
pub struct CriteriaCatalog<'a> {
    criteria: &'a [Criterion],
    legacy: &'a LegacyNames,
}

impl<'a> CriteriaCatalog<'a> {
    pub fn new(criteria: &'a [Criterion], legacy: &'a LegacyNames) -> Self {
        Self { criteria, legacy }
    }

    /// Active names visible to `halaqah_id` (global rows plus that halaqah's
    /// own rows), ordered by `(sort_order, name)`. A name visible twice after
    /// legacy migration keeps its first row.
    pub fn active_names(&self, category: Category, halaqah_id: Option<&str>) -> Vec<String> {
        let mut rows: Vec<&Criterion> = self
            .criteria
            .iter()
            .filter(|c| c.active && c.category == category)
            .filter(|c| match c.halaqah_id.as_deref() {
                None => true,
                Some(owner) => Some(owner) == halaqah_id,
            })
            .collect();
        rows.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut out: Vec<String> = Vec::with_capacity(rows.len());
        for c in rows {
            let name = self.legacy.canonical(&c.name);
            if name.is_empty() {
                continue;
            }
            if out.iter().any(|o| o == name.as_ref()) {
                warn!(
                    category = %category,
                    criterion = %name,
                    criterion_id = %c.id,
                    "criterion name visible twice; keeping the first"
                );
                continue;
            }
            out.push(name.into_owned());
        }
        out
    }
}

/// Decides which criteria apply to a santri for a category.
#[derive(Debug, Clone, Copy)]
pub struct CurriculumResolver<'a> {
    legacy: &'a LegacyNames,
    day_shift: &'a str,
}

impl<'a> CurriculumResolver<'a> {
    pub fn new(legacy: &'a LegacyNames, day_shift: &'a str) -> Self {
        Self { legacy, day_shift }
    }

    pub fn legacy(&self) -> &'a LegacyNames {
        self.legacy
    }

    pub fn is_day_shift(&self, shift: Option<&str>) -> bool {
        shift
            .map(|s| s.trim().eq_ignore_ascii_case(self.day_shift.trim()))
            .unwrap_or(false)
    }

    /// Group config first (reordered to global order, group-only names after),
    /// then the global list, then whatever keys the stored scores carry.
    /// Legacy renames are applied to every source up front and the deny-list
    /// is applied last.
    pub fn resolve(
        &self,
        category: Category,
        group_config: &[String],
        global_active: &[String],
        stored: &ScoreSet,
    ) -> Vec<String> {
        let group = self.legacy.migrate_names(group_config);
        let global = self.legacy.migrate_names(global_active);

        let (source, resolved) = if !group.is_empty() {
            if global.is_empty() {
                ("group", group)
            } else {
                let mut ordered: Vec<String> = global
                    .iter()
                    .filter(|name| group.contains(name))
                    .cloned()
                    .collect();
                ordered.extend(group.iter().filter(|name| !global.contains(name)).cloned());
                ("group", ordered)
            }
        } else if !global.is_empty() {
            ("global", global)
        } else {
            ("stored", self.legacy.migrate_names(&stored.names()))
        };

        let out: Vec<String> = resolved
            .into_iter()
            .filter(|name| !self.legacy.is_retired(name))
            .collect();
        trace!(category = %category, source, count = out.len(), "resolved criteria");
        out
    }

    /// [`Self::resolve`] plus the Kedisiplinan shift rule.
    pub fn resolve_for_shift(
        &self,
        category: Category,
        sources: &CurriculumSources,
        stored: &ScoreSet,
        shift: Option<&str>,
    ) -> Vec<String> {
        let resolved = self.resolve(category, &sources.group_config, &sources.global_active, stored);
        self.apply_shift_rule(category, resolved, shift)
    }

    /// Day shift drops congregational prayer; every other shift scores it.
    /// Only that one criterion is touched.
    pub fn apply_shift_rule(
        &self,
        category: Category,
        mut criteria: Vec<String>,
        shift: Option<&str>,
    ) -> Vec<String> {
        if category != Category::Kedisiplinan {
            return criteria;
        }
        if self.is_day_shift(shift) {
            criteria.retain(|name| name != PRAYER_CRITERION);
        } else if !criteria.iter().any(|name| name == PRAYER_CRITERION)
            && !self.legacy.is_retired(PRAYER_CRITERION)
        {
            criteria.push(PRAYER_CRITERION.to_string());
        }
        criteria
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn criterion(name: &str, sort_order: i64, halaqah_id: Option<&str>) -> Criterion {
        Criterion {
            id: format!("id-{}", name),
            category: Category::Tahsin,
            name: name.to_string(),
            sort_order,
            active: true,
            halaqah_id: halaqah_id.map(|s| s.to_string()),
        }
    }

    #[test]
    fn group_config_is_reordered_to_global_order_with_custom_names_last() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let out = resolver.resolve(
            Category::Tahsin,
            &names(&["Custom B", "Sifat", "Custom A", "Makharij"]),
            &names(&["Makharij", "Sifat", "Ghunnah"]),
            &ScoreSet::new(),
        );
        assert_eq!(out, names(&["Makharij", "Sifat", "Custom B", "Custom A"]));
    }

    #[test]
    fn group_config_matching_global_round_trips_to_global_order() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let global = names(&["Makharij", "Sifat", "Ghunnah", "Waqaf"]);
        let group = names(&["Waqaf", "Ghunnah", "Makharij", "Sifat"]);
        let out = resolver.resolve(Category::Tahsin, &group, &global, &ScoreSet::new());
        assert_eq!(out, global);
    }

    #[test]
    fn falls_back_to_global_then_stored_keys() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let global = names(&["Makharij", "Sifat"]);
        assert_eq!(
            resolver.resolve(Category::Tahsin, &[], &global, &ScoreSet::new()),
            global
        );

        let stored: ScoreSet = [("Ghunnah", 80.0), ("Makharij", 70.0)].into_iter().collect();
        assert_eq!(
            resolver.resolve(Category::Tahsin, &[], &[], &stored),
            names(&["Ghunnah", "Makharij"])
        );
        assert!(resolver
            .resolve(Category::Tahsin, &[], &[], &ScoreSet::new())
            .is_empty());
    }

    #[test]
    fn legacy_names_are_migrated_without_duplicates() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let stored: ScoreSet = [("Tilawah Mandiri", 85.0)].into_iter().collect();
        let out = resolver.resolve(Category::Tahsin, &[], &[], &stored);
        assert_eq!(out, names(&["Tilawah & Hafalan Mandiri"]));

        let out = resolver.resolve(
            Category::Tahsin,
            &names(&["Tilawah Mandiri", "Tilawah & Hafalan Mandiri"]),
            &names(&["Tilawah & Hafalan Mandiri", "Makharij"]),
            &ScoreSet::new(),
        );
        assert_eq!(out, names(&["Tilawah & Hafalan Mandiri"]));
    }

    #[test]
    fn retired_names_never_resurface() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let stored: ScoreSet = [("Panjang Pendek", 85.0), ("Makharij", 70.0)]
            .into_iter()
            .collect();
        assert_eq!(
            resolver.resolve(Category::Tahsin, &[], &[], &stored),
            names(&["Makharij"])
        );
        assert_eq!(
            resolver.resolve(
                Category::Tahsin,
                &names(&["Panjang Pendek"]),
                &names(&["Makharij"]),
                &ScoreSet::new()
            ),
            Vec::<String>::new()
        );
    }

    #[test]
    fn day_shift_drops_prayer_even_from_legacy_spelling() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let stored: ScoreSet = [("Sholat Berjamaah", 90.0), ("Kerapian", 80.0)]
            .into_iter()
            .collect();
        let sources = CurriculumSources::default();
        let out =
            resolver.resolve_for_shift(Category::Kedisiplinan, &sources, &stored, Some("siang"));
        assert_eq!(out, names(&["Kerapian"]));

        let out =
            resolver.resolve_for_shift(Category::Kedisiplinan, &sources, &stored, Some("Pagi"));
        assert_eq!(out, names(&["Shalat Berjamaah", "Kerapian"]));
    }

    #[test]
    fn non_day_shift_adds_prayer_once() {
        let legacy = LegacyNames::builtin();
        let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
        let out = resolver.apply_shift_rule(
            Category::Kedisiplinan,
            names(&["Kehadiran", "Kerapian"]),
            None,
        );
        assert_eq!(out, names(&["Kehadiran", "Kerapian", PRAYER_CRITERION]));
        let again = resolver.apply_shift_rule(Category::Kedisiplinan, out.clone(), None);
        assert_eq!(again, out);
        // Other categories are untouched.
        let tahsin = resolver.apply_shift_rule(Category::Tahsin, names(&["Makharij"]), None);
        assert_eq!(tahsin, names(&["Makharij"]));
    }

    #[test]
    fn catalog_orders_and_scopes_criteria() {
        let legacy = LegacyNames::builtin();
        let rows = vec![
            criterion("Sifat", 2, None),
            criterion("Makharij", 1, None),
            criterion("Ghunnah Khusus", 3, Some("h1")),
            criterion("Lain", 3, Some("h2")),
            Criterion {
                active: false,
                ..criterion("Nonaktif", 0, None)
            },
        ];
        let catalog = CriteriaCatalog::new(&rows, &legacy);
        assert_eq!(
            catalog.active_names(Category::Tahsin, Some("h1")),
            names(&["Makharij", "Sifat", "Ghunnah Khusus"])
        );
        assert_eq!(
            catalog.active_names(Category::Tahsin, None),
            names(&["Makharij", "Sifat"])
        );
        assert!(catalog.active_names(Category::Akhlak, Some("h1")).is_empty());
    }

    #[test]
    fn catalog_collapses_legacy_collisions() {
        let legacy = LegacyNames::builtin();
        let rows = vec![
            criterion("Tilawah & Hafalan Mandiri", 1, None),
            criterion("Tilawah Mandiri", 2, Some("h1")),
        ];
        let catalog = CriteriaCatalog::new(&rows, &legacy);
        assert_eq!(
            catalog.active_names(Category::Tahsin, Some("h1")),
            names(&["Tilawah & Hafalan Mandiri"])
        );
    }

    proptest! {
        #[test]
        fn resolve_is_idempotent(
            group in prop::collection::vec("[A-E]", 0..6),
            global in prop::collection::vec("[A-G]", 0..6),
        ) {
            let legacy = LegacyNames::builtin();
            let resolver = CurriculumResolver::new(&legacy, DEFAULT_DAY_SHIFT);
            let first = resolver.resolve(Category::Tahsin, &group, &global, &ScoreSet::new());
            let second = resolver.resolve(Category::Tahsin, &group, &global, &ScoreSet::new());
            prop_assert_eq!(&first, &second);

            let mut dedup = first.clone();
            dedup.sort();
            dedup.dedup();
            prop_assert_eq!(dedup.len(), first.len());
        }
    }
}
