//! Find which foreign-key rows already exist

use super::context::ResolvedFks;
use super::{ImportContext, Importer};
use crate::db;
use crate::db::named::IdentifierRowKey;
use crate::models::{CreditKey, FkCandidates, GroupTree, IdentifierKey, NamedKind, StoryArcKey};
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// `(person_id, role_id)` of a credit whose named parts are resolved
pub(super) fn credit_row_key(fks: &ResolvedFks, key: &CreditKey) -> Option<(i64, Option<i64>)> {
    let person = fks.named_id(NamedKind::CreditPerson, &key.person)?;
    let role = match &key.role {
        Some(role) => Some(fks.named_id(NamedKind::CreditRole, role)?),
        None => None,
    };
    Some((person, role))
}

pub(super) fn story_arc_row_key(fks: &ResolvedFks, key: &StoryArcKey) -> Option<(i64, Option<i64>)> {
    Some((fks.named_id(NamedKind::StoryArc, &key.arc)?, key.number))
}

pub(super) fn identifier_row_key(fks: &ResolvedFks, key: &IdentifierKey) -> Option<IdentifierRowKey> {
    let source = match &key.source {
        Some(source) => Some(fks.named_id(NamedKind::IdentifierSource, source)?),
        None => None,
    };
    Some((source, key.id_type.clone(), key.key.clone()))
}

fn distinct_publishers<'a>(trees: impl Iterator<Item = &'a GroupTree>) -> Vec<String> {
    trees
        .map(|t| t.publisher.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl Importer {
    /// Load every existing group row under the given trees' publishers
    pub(super) async fn lookup_groups<'a>(
        &self,
        trees: impl Iterator<Item = &'a GroupTree>,
        fks: &mut ResolvedFks,
    ) -> Result<()> {
        let publishers = distinct_publishers(trees);
        if publishers.is_empty() {
            return Ok(());
        }
        let db = self.db();
        fks.publishers.extend(db::groups::publisher_ids(db, &publishers).await?);
        fks.imprints.extend(db::groups::imprint_ids(db, &publishers).await?);
        fks.series.extend(db::groups::series_rows(db, &publishers).await?);
        fks.volumes.extend(db::groups::volume_rows(db, &publishers).await?);
        Ok(())
    }

    pub(super) async fn lookup_named(
        &self,
        kind: NamedKind,
        names: &BTreeSet<String>,
        fks: &mut ResolvedFks,
    ) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = names.iter().cloned().collect();
        let found = db::named::named_ids(self.db(), kind, &names).await?;
        fks.named.entry(kind).or_default().extend(found);
        Ok(())
    }

    /// Resolve credits, story arc numbers and identifiers whose named parts
    /// are already resolved
    pub(super) async fn lookup_compound(&self, candidates: &FkCandidates, fks: &mut ResolvedFks) -> Result<()> {
        let db = self.db();

        let person_ids: Vec<i64> = candidates
            .credits
            .iter()
            .filter_map(|k| fks.named_id(NamedKind::CreditPerson, &k.person))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !person_ids.is_empty() {
            let existing = db::named::credit_ids(db, &person_ids).await?;
            for key in &candidates.credits {
                if let Some(id) = credit_row_key(fks, key).and_then(|k| existing.get(&k)) {
                    fks.credits.insert(key.clone(), *id);
                }
            }
        }

        let arc_ids: Vec<i64> = candidates
            .story_arc_numbers
            .iter()
            .filter_map(|k| fks.named_id(NamedKind::StoryArc, &k.arc))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !arc_ids.is_empty() {
            let existing = db::named::story_arc_number_ids(db, &arc_ids).await?;
            for key in &candidates.story_arc_numbers {
                if let Some(id) = story_arc_row_key(fks, key).and_then(|k| existing.get(&k)) {
                    fks.story_arc_numbers.insert(key.clone(), *id);
                }
            }
        }

        let keys: Vec<String> = candidates
            .identifiers
            .keys()
            .map(|k| k.key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !keys.is_empty() {
            let existing = db::named::identifier_ids(db, &keys).await?;
            for key in candidates.identifiers.keys() {
                if let Some(id) = identifier_row_key(fks, key).and_then(|k| existing.get(&k)) {
                    fks.identifiers.insert(key.clone(), *id);
                }
            }
        }

        Ok(())
    }

    /// Split candidates into existing rows (resolved now) and missing rows
    /// (created next). Existing series and volumes whose declared count is
    /// lower than a candidate's are queued for a raise.
    pub(super) async fn query_missing_fks(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.candidates.is_empty() {
            return Ok(());
        }
        let mut status = Status::new(StatusType::QueryMissingFks, Some(ctx.candidates.len()));
        self.state.status.start(&mut status).await;

        let result = async {
            let mut fks = ResolvedFks::default();
            let candidates = &ctx.candidates;
            let mut missing = FkCandidates::default();

            self.lookup_groups(candidates.groups.keys(), &mut fks).await?;
            let mut series_raises: BTreeMap<i64, i64> = BTreeMap::new();
            let mut volume_raises: BTreeMap<i64, i64> = BTreeMap::new();
            for (tree, counts) in &candidates.groups {
                if let (Some(series), Some(declared)) =
                    (fks.series.get(&tree.series_key()), counts.series_volume_count)
                {
                    if series.count.map_or(true, |c| c < declared) {
                        let raise = series_raises.entry(series.id).or_insert(declared);
                        *raise = (*raise).max(declared);
                    }
                }
                match fks.volumes.get(tree) {
                    Some(volume) => {
                        if let Some(declared) = counts.volume_issue_count {
                            if volume.count.map_or(true, |c| c < declared) {
                                let raise = volume_raises.entry(volume.id).or_insert(declared);
                                *raise = (*raise).max(declared);
                            }
                        }
                    }
                    None => {
                        missing.groups.insert(tree.clone(), *counts);
                    }
                }
            }
            status.increment(candidates.groups.len());
            self.state.status.update(&mut status, false).await;

            if !candidates.folders.is_empty() {
                let paths: Vec<String> = candidates.folders.iter().cloned().collect();
                fks.folders
                    .extend(db::folders::folder_ids(self.db(), ctx.library_id(), &paths).await?);
                missing.folders = candidates
                    .folders
                    .iter()
                    .filter(|p| !fks.folders.contains_key(*p))
                    .cloned()
                    .collect();
                status.increment(candidates.folders.len());
                self.state.status.update(&mut status, false).await;
            }

            for (kind, names) in &candidates.named {
                self.lookup_named(*kind, names, &mut fks).await?;
                let absent: BTreeSet<String> = names
                    .iter()
                    .filter(|n| fks.named_id(*kind, n).is_none())
                    .cloned()
                    .collect();
                if !absent.is_empty() {
                    missing.named.insert(*kind, absent);
                }
                status.increment(names.len());
                self.state.status.update(&mut status, false).await;
            }

            self.lookup_compound(candidates, &mut fks).await?;
            missing.credits = candidates
                .credits
                .iter()
                .filter(|k| !fks.credits.contains_key(*k))
                .cloned()
                .collect();
            missing.story_arc_numbers = candidates
                .story_arc_numbers
                .iter()
                .filter(|k| !fks.story_arc_numbers.contains_key(*k))
                .cloned()
                .collect();
            missing.identifiers = candidates
                .identifiers
                .iter()
                .filter(|(k, _)| !fks.identifiers.contains_key(*k))
                .map(|(k, url)| (k.clone(), url.clone()))
                .collect();

            info!(
                library_id = ctx.library_id(),
                candidates = candidates.len(),
                missing = missing.len(),
                count_raises = series_raises.len() + volume_raises.len(),
                "Queried foreign keys"
            );

            ctx.fks = fks;
            ctx.missing.candidates = missing;
            ctx.missing.series_count_raises = series_raises.into_iter().collect();
            ctx.missing.volume_count_raises = volume_raises.into_iter().collect();
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.state.status.finish(&status).await;
        result?;
        ctx.check_abort()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_keys_need_named_parts() {
        let mut fks = ResolvedFks::default();
        fks.named
            .entry(NamedKind::CreditPerson)
            .or_default()
            .insert("Alan Moore".to_string(), 4);

        let writer = CreditKey {
            person: "Alan Moore".to_string(),
            role: Some("Writer".to_string()),
        };
        let uncredited = CreditKey {
            person: "Alan Moore".to_string(),
            role: None,
        };
        assert_eq!(credit_row_key(&fks, &writer), None);
        assert_eq!(credit_row_key(&fks, &uncredited), Some((4, None)));

        fks.named
            .entry(NamedKind::CreditRole)
            .or_default()
            .insert("Writer".to_string(), 9);
        assert_eq!(credit_row_key(&fks, &writer), Some((4, Some(9))));
    }

    #[test]
    fn test_identifier_without_source() {
        let fks = ResolvedFks::default();
        let key = IdentifierKey {
            source: None,
            id_type: "issue".to_string(),
            key: "123".to_string(),
        };
        assert_eq!(
            identifier_row_key(&fks, &key),
            Some((None, "issue".to_string(), "123".to_string()))
        );
    }
}
