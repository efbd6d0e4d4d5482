// src/sync/select.rs

//! Source selection: minimize the archives a transfer has to open.
//!
//! Every ROM may be available from several archives. Collapsing each
//! ROM's provider list to the archive that serves the most ROMs keeps
//! the number of distinct opens per game at or below what any
//! independent per-ROM pick would need.

use std::collections::{BTreeMap, HashMap};

use crate::index::MemberRef;

/// Greedily collapse provider lists until every ROM has one provider.
///
/// Repeatedly picks the archive appearing in the most still-ambiguous
/// lists and pins those lists to it. Ties go to the lexicographically
/// smallest archive name, so selection is deterministic.
pub(crate) fn collapse(sources: &mut HashMap<String, Vec<MemberRef>>) {
    while let Some(winner) = popular_source(sources) {
        for providers in sources.values_mut() {
            if providers.len() == 1 {
                continue;
            }
            if let Some(chosen) = providers.iter().find(|p| p.archive == winner).cloned() {
                *providers = vec![chosen];
            }
        }
    }
}

/// The archive occurring in the most provider lists that still have a
/// choice to make, or `None` once every list is settled.
fn popular_source(sources: &HashMap<String, Vec<MemberRef>>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for providers in sources.values() {
        if providers.len() > 1 {
            for provider in providers {
                *counts.entry(provider.archive.as_str()).or_default() += 1;
            }
        }
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(archive, _)| archive.to_string())
}
