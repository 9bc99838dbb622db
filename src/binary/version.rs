//! Version alias resolution.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Maps version aliases (`"16"`, `"3"`) to full published versions.
///
/// Resolution order: exact alias, then an already-full version, then the
/// highest published version under a `major.minor` prefix. Anything else is
/// unresolved and returned to the caller unchanged.
#[derive(Debug, Clone, Default)]
pub struct VersionMap {
    aliases: BTreeMap<String, String>,
}

impl VersionMap {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            aliases: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Full version for `input`, or `None` when nothing matches.
    pub fn normalize(&self, input: &str) -> Option<String> {
        let input = input.trim();
        if let Some(full) = self.aliases.get(input) {
            return Some(full.clone());
        }
        if self.aliases.values().any(|v| v == input) {
            return Some(input.to_string());
        }
        let prefix = format!("{}.", input);
        self.aliases
            .values()
            .filter(|v| v.starts_with(&prefix))
            .max_by(|a, b| compare_versions(a, b))
            .cloned()
    }

    /// Like [`normalize`](Self::normalize) but passes unmapped input through,
    /// so a later download fails with a descriptive 404 instead of a silent
    /// substitution.
    pub fn resolve(&self, engine: &str, input: &str) -> String {
        match self.normalize(input) {
            Some(full) => full,
            None => {
                tracing::warn!(
                    "{} version '{}' is not in the version map, using it as-is",
                    engine,
                    input
                );
                input.trim().to_string()
            }
        }
    }

    /// Distinct full versions, newest first.
    pub fn versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.aliases.values().cloned().collect();
        versions.sort_by(|a, b| compare_versions(b, a));
        versions.dedup();
        versions
    }

    /// Newest full version in the map.
    pub fn latest(&self) -> Option<String> {
        self.versions().into_iter().next()
    }
}

/// Numeric component-wise comparison (`16.10.0` > `16.9.0`). Non-numeric
/// components compare as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.split(['.', '-'])
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (pa, pb) = (parse(a), parse(b));
    for i in 0..pa.len().max(pb.len()) {
        let x = pa.get(i).copied().unwrap_or(0);
        let y = pb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Leading `major` component.
pub fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

/// Leading `major.minor` components (or just `major` when there is no minor).
pub fn major_minor(version: &str) -> String {
    version.split('.').take(2).collect::<Vec<_>>().join(".")
}
