use std::borrow::Cow;
use std::collections::HashSet;

use crate::calc::ScoreSet;

/// Bumped whenever an entry is added to the built-in tables below.
pub const LEGACY_NAMES_VERSION: u32 = 2;

/// Built-in renames (old name -> current name).
const BUILTIN_RENAMES: &[(&str, &str)] = &[
    // v1
    ("Tilawah Mandiri", "Tilawah & Hafalan Mandiri"),
    // v2
    ("Sholat Berjamaah", "Shalat Berjamaah"),
];

/// Criteria that were permanently removed and must never come back, even from
/// historical report cards.
const BUILTIN_RETIRED: &[&str] = &[
    // v1
    "Panjang Pendek",
];

/// Rename table + deny-list for criterion names.
///
/// Every place that reads criterion names (configuration, global criteria,
/// stored scores) goes through one of these so that old spellings are read as
/// their modern names and retired items are dropped uniformly.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyNames {
    version: u32,
    renames: Vec<(String, String)>,
    retired: Vec<String>,
}

impl Default for LegacyNames {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LegacyNames {
    pub fn builtin() -> Self {
        Self {
            version: LEGACY_NAMES_VERSION,
            renames: BUILTIN_RENAMES
                .iter()
                .map(|(old, new)| (old.to_string(), new.to_string()))
                .collect(),
            retired: BUILTIN_RETIRED.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// An empty table. Only useful in tests.
    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            version: 0,
            renames: Vec::new(),
            retired: Vec::new(),
        }
    }

    /// Adds workspace-configured entries on top of the built-ins. A configured
    /// rename never overrides a built-in one for the same old name.
    pub fn with_extra<'a, R, D>(mut self, renames: R, retired: D) -> Self
    where
        R: IntoIterator<Item = (&'a str, &'a str)>,
        D: IntoIterator<Item = &'a str>,
    {
        for (old, new) in renames {
            let old = old.trim();
            let new = new.trim();
            if old.is_empty() || new.is_empty() || old == new {
                continue;
            }
            if self.renames.iter().any(|(o, _)| o == old) {
                continue;
            }
            self.renames.push((old.to_string(), new.to_string()));
        }
        for name in retired {
            let name = name.trim();
            if name.is_empty() || self.retired.iter().any(|r| r == name) {
                continue;
            }
            self.retired.push(name.to_string());
        }
        self
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Current name for `name`. Rename chains (a -> b -> c) are followed, and a
    /// cycle stops at the first repeated name.
    pub fn canonical<'a>(&self, name: &'a str) -> Cow<'a, str> {
        let mut current: Cow<'a, str> = Cow::Borrowed(name.trim());
        let mut seen: HashSet<String> = HashSet::new();
        while let Some((_, new)) = self.renames.iter().find(|(old, _)| old == current.as_ref()) {
            if !seen.insert(current.to_string()) {
                break;
            }
            current = Cow::Owned(new.clone());
        }
        current
    }

    pub fn is_retired(&self, name: &str) -> bool {
        self.retired.iter().any(|r| r == name)
    }

    /// Canonicalizes a list of names, dropping duplicates created by the
    /// renames (first occurrence wins). Retired names are kept: deny-listing is
    /// applied by the resolver as its last step.
    pub fn migrate_names<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(names.len());
        for n in names {
            let canonical = self.canonical(n.as_ref());
            if canonical.is_empty() || out.iter().any(|o| o == canonical.as_ref()) {
                continue;
            }
            out.push(canonical.into_owned());
        }
        out
    }

    /// Re-keys a stored score set under current names and drops retired items.
    /// When both a legacy key and its modern key are present the modern value
    /// wins, whatever the insertion order.
    pub fn migrate_scores(&self, scores: &ScoreSet) -> ScoreSet {
        let mut out = ScoreSet::new();
        for (name, value) in scores.iter() {
            let canonical = self.canonical(name);
            if self.is_retired(&canonical) {
                continue;
            }
            let is_modern = canonical.as_ref() == name.trim();
            if out.contains(&canonical) && !is_modern {
                continue;
            }
            out.insert(canonical.into_owned(), value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_follows_builtin_renames() {
        let legacy = LegacyNames::builtin();
        assert_eq!(legacy.canonical("Tilawah Mandiri"), "Tilawah & Hafalan Mandiri");
        assert_eq!(legacy.canonical("Sholat Berjamaah"), "Shalat Berjamaah");
        assert_eq!(legacy.canonical("Adab"), "Adab");
    }

    #[test]
    fn canonical_stops_on_cycles() {
        let legacy = LegacyNames::empty().with_extra([("A", "B"), ("B", "A")], std::iter::empty());
        // a -> b -> a: stops once a repeats.
        let c = legacy.canonical("A");
        assert!(c == "A" || c == "B");
    }

    #[test]
    fn migrate_names_collapses_renamed_duplicates() {
        let legacy = LegacyNames::builtin();
        let out = legacy.migrate_names(&["Tilawah Mandiri", "Makharij", "Tilawah & Hafalan Mandiri"]);
        assert_eq!(out, vec!["Tilawah & Hafalan Mandiri", "Makharij"]);
    }

    #[test]
    fn migrate_scores_prefers_modern_key() {
        let legacy = LegacyNames::builtin();
        let mut stored = ScoreSet::new();
        stored.insert("Tilawah & Hafalan Mandiri", 90.0);
        stored.insert("Tilawah Mandiri", 60.0);
        stored.insert("Panjang Pendek", 70.0);
        let migrated = legacy.migrate_scores(&stored);
        assert_eq!(migrated.len(), 1);
        assert_eq!(migrated.get("Tilawah & Hafalan Mandiri"), Some(90.0));
    }

    #[test]
    fn extra_entries_do_not_override_builtins() {
        let legacy = LegacyNames::builtin().with_extra(
            [("Tilawah Mandiri", "Something Else"), ("Tajwid Dasar", "Tajwid")],
            ["Waqaf Ibtida", "Panjang Pendek"],
        );
        assert_eq!(legacy.canonical("Tilawah Mandiri"), "Tilawah & Hafalan Mandiri");
        assert_eq!(legacy.canonical("Tajwid Dasar"), "Tajwid");
        assert!(legacy.is_retired("Waqaf Ibtida"));
        assert_eq!(legacy.version(), LEGACY_NAMES_VERSION);
    }
}
