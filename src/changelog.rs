use std::collections::BTreeSet;

use tracing::debug;

use crate::domain::DbId;
use crate::error::KiraError;
use crate::graph::{
    Attribute, Entity, Graph, InboundReferenceLookup, KnowledgeStore, Relation, Value,
};
use crate::report::LineLog;

pub const UNKNOWN_AUTHOR: &str = "Unknown author";

/// A missing checksum on either side is never a change.
pub fn sequence_changed(old: Option<&str>, new: Option<&str>) -> bool {
    matches!(
        (old, new),
        (Some(old), Some(new)) if !old.is_empty() && !new.is_empty() && old != new
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainDiff {
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

impl ChainDiff {
    pub fn between(old: &[String], new: &[String]) -> Self {
        Self {
            removed: old
                .iter()
                .filter(|chain| !new.contains(chain))
                .cloned()
                .collect(),
            added: new
                .iter()
                .filter(|chain| !old.contains(chain))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Appends one log entry per removed or added chain. Returns whether anything was logged.
pub fn log_chain_changes<S>(
    store: &S,
    entity: &mut Entity,
    new_chains: &[String],
    date: &str,
    sequence_log: &mut LineLog,
) -> Result<bool, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    let old_chains = entity.texts(Attribute::Chain);
    let diff = ChainDiff::between(&old_chains, new_chains);
    if diff.is_empty() {
        return Ok(false);
    }

    let description = describe_entity(store, entity)?;
    let id = entity.id_label();
    let changes = diff
        .removed
        .iter()
        .map(|chain| (chain, "removed"))
        .chain(diff.added.iter().map(|chain| (chain, "added")));
    for (chain, action) in changes {
        let entry = format!("{chain} for {id} {action} on {date}");
        sequence_log.line(&format!("{entry} for {description}"))?;
        append_change_log(entity, &entry);
        debug!(id = %id, chain = %chain, action, "chain change logged");
    }
    Ok(true)
}

fn append_change_log(entity: &mut Entity, entry: &str) {
    let full = match entity.text(Attribute::ChainChangeLog) {
        Some(existing) => format!("{existing};{entry}"),
        None => entry.to_string(),
    };
    entity.set(Attribute::ChainChangeLog, vec![Value::Text(full)]);
}

/// `id - name (species)` as used in the sequence report.
pub fn describe_entity<S>(store: &S, entity: &Entity) -> Result<String, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    let mut description = entity.id_label();
    if let Some(name) = entity.text(Attribute::Name) {
        description.push_str(" - ");
        description.push_str(name);
    }
    if let Some(species_id) = entity.reference(Attribute::Species) {
        match store.fetch(species_id) {
            Ok(species) => description.push_str(&format!(" ({})", species.display_name)),
            Err(KiraError::InstanceNotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(description)
}

/// Sequence features that depend on `target`, directly or through a modified residue.
pub fn dependent_features<L>(lookup: &L, target: DbId) -> Result<Vec<Entity>, KiraError>
where
    L: InboundReferenceLookup + ?Sized,
{
    let mut candidates = lookup.referrers(target, Relation::ReferenceEntity)?;
    for relation in [Relation::ReferenceSequence, Relation::SecondReferenceSequence] {
        for residue in lookup.referrers(target, relation)? {
            if let Some(residue_id) = residue.id {
                candidates.extend(lookup.referrers(residue_id, Relation::HasModifiedResidue)?);
            }
        }
    }

    let mut seen = BTreeSet::new();
    candidates.retain(|feature| match feature.id {
        Some(id) => seen.insert(id),
        None => false,
    });
    Ok(candidates)
}

pub fn author_of<S>(store: &S, entity: &Entity) -> Result<String, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    if let Some(created) = entity.reference(Attribute::Created) {
        if let Some(author) = edit_author(store, created)? {
            return Ok(author);
        }
    }
    if let Some(modified) = entity.references(Attribute::Modified).first() {
        if let Some(author) = edit_author(store, *modified)? {
            return Ok(author);
        }
    }
    Ok(UNKNOWN_AUTHOR.to_string())
}

fn edit_author<S>(store: &S, edit_id: DbId) -> Result<Option<String>, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    let edit = match store.fetch(edit_id) {
        Ok(edit) => edit,
        Err(KiraError::InstanceNotFound(_)) => return Ok(None),
        Err(err) => return Err(err),
    };
    let Some(person_id) = edit.reference(Attribute::Author) else {
        return Ok(None);
    };
    match store.fetch(person_id) {
        Ok(person) if !person.display_name.is_empty() => Ok(Some(person.display_name)),
        Ok(_) | Err(KiraError::InstanceNotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Writes one coordinate-report line per dependent feature of a changed entity.
pub fn report_dependents<G>(
    graph: &G,
    entity: &Entity,
    coordinate_log: &mut LineLog,
) -> Result<usize, KiraError>
where
    G: Graph + ?Sized,
{
    let Some(id) = entity.id else {
        return Ok(0);
    };
    let accession = entity.text(Attribute::Identifier).unwrap_or_default();
    let features = dependent_features(graph, id)?;
    for feature in &features {
        let author = author_of(graph, feature)?;
        coordinate_log.line(
            &[
                id.to_string(),
                accession.to_string(),
                feature.id_label(),
                feature.display_name.clone(),
                author,
            ]
            .join("\t"),
        )?;
    }
    Ok(features.len())
}
