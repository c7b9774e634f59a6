use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::DbId;
use crate::error::KiraError;
use crate::graph::{
    Attribute, Class, Graph, KnowledgeStore, Value, find_first, has_guarding_referrers,
};
use crate::index::{AccessionIndex, IdentityIndex};
use crate::resolver::StatusResolver;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    pub mismatched_parents_updated: usize,
    pub provisional: BTreeSet<String>,
    pub deleted: BTreeSet<DbId>,
    pub no_referrer: BTreeSet<DbId>,
    pub skip_deletion: BTreeSet<DbId>,
    pub duplicate_isoforms: BTreeMap<String, Vec<DbId>>,
}

impl CleanupOutcome {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// Runs the four post-feed passes in order against the leftover index entries.
pub fn run_cleanup<G, R>(
    graph: &mut G,
    resolver: &R,
    index: &mut IdentityIndex,
    mismatched: &BTreeMap<String, String>,
    audit_edit: DbId,
) -> Result<CleanupOutcome, KiraError>
where
    G: Graph + ?Sized,
    R: StatusResolver + ?Sized,
{
    let mut outcome = CleanupOutcome::default();
    info!(count = mismatched.len(), "updating mismatched isoforms");
    outcome.mismatched_parents_updated = repair_mismatched_isoforms(graph, mismatched, audit_edit)?;
    info!(remaining = index.masters.len(), "retiring obsolete masters");
    retire_obsolete_masters(graph, resolver, &mut index.masters, &mut outcome)?;
    info!(remaining = index.isoforms.len(), "retiring obsolete isoforms");
    retire_obsolete_isoforms(graph, &mut index.isoforms, &mut outcome)?;
    outcome.duplicate_isoforms = find_duplicate_isoforms(&*graph)?;
    Ok(outcome)
}

/// Adds the master named by the mismatched isoform id as a second parent.
pub fn repair_mismatched_isoforms<G>(
    graph: &mut G,
    mismatched: &BTreeMap<String, String>,
    audit_edit: DbId,
) -> Result<usize, KiraError>
where
    G: Graph + ?Sized,
{
    let mut updated = 0;
    for (variant, accession) in mismatched {
        let Some(mut isoform) = find_first(&*graph, Class::Isoform, Attribute::VariantIdentifier, variant)?
        else {
            continue;
        };
        let Some(parent) = isoform.reference(Attribute::IsoformParent) else {
            continue;
        };
        let Some(other) = find_first(&*graph, Class::Master, Attribute::Identifier, accession)?
            .and_then(|master| master.id)
        else {
            continue;
        };

        let mut parents = vec![parent];
        if other != parent {
            parents.push(other);
        }
        if isoform.references(Attribute::IsoformParent) == parents {
            continue;
        }
        info!(
            variant = %variant,
            id = %isoform.id_label(),
            accession = %accession,
            "mismatched parent"
        );
        isoform.set(
            Attribute::IsoformParent,
            parents.into_iter().map(Value::Ref).collect(),
        );
        isoform.push(Attribute::Modified, Value::Ref(audit_edit));
        graph.update(&isoform)?;
        updated += 1;
    }
    Ok(updated)
}

pub fn retire_obsolete_masters<G, R>(
    graph: &mut G,
    resolver: &R,
    masters: &mut AccessionIndex,
    outcome: &mut CleanupOutcome,
) -> Result<(), KiraError>
where
    G: Graph + ?Sized,
    R: StatusResolver + ?Sized,
{
    let accessions = masters.keys().cloned().collect::<Vec<_>>();
    for accession in accessions {
        if resolver.is_provisional_accession(&accession)? {
            debug!(accession = %accession, "provisional accession dropped from obsolete set");
            outcome.provisional.insert(accession.clone());
            masters.remove(&accession);
            continue;
        }

        let mut any_deleted = false;
        for master in
            graph.find_by_attribute(Class::Master, Attribute::Identifier, &Value::text(&accession))?
        {
            let Some(id) = master.id else {
                continue;
            };
            if has_guarding_referrers(&*graph, id)? {
                continue;
            }
            info!(accession = %accession, id = %id, "deleting obsolete master");
            graph.delete(id)?;
            outcome.deleted.insert(id);
            outcome.no_referrer.insert(id);
            any_deleted = true;
        }
        if any_deleted {
            masters.remove(&accession);
        }
    }
    Ok(())
}

pub fn retire_obsolete_isoforms<G>(
    graph: &mut G,
    isoforms: &mut AccessionIndex,
    outcome: &mut CleanupOutcome,
) -> Result<(), KiraError>
where
    G: Graph + ?Sized,
{
    let variants = isoforms.keys().cloned().collect::<Vec<_>>();
    for variant in variants {
        let Some(isoform) =
            find_first(&*graph, Class::Isoform, Attribute::VariantIdentifier, &variant)?
        else {
            info!(variant = %variant, "not a variant identifier for any isoform");
            continue;
        };
        let Some(id) = isoform.id else {
            continue;
        };
        let Some(parent_id) = isoform.reference(Attribute::IsoformParent) else {
            warn!(variant = %variant, id = %id, "isoform without parent, deletion skipped");
            outcome.skip_deletion.insert(id);
            continue;
        };
        let parent_identifier = match graph.fetch(parent_id) {
            Ok(parent) => parent.text(Attribute::Identifier).map(str::to_string),
            Err(KiraError::InstanceNotFound(_)) => None,
            Err(err) => return Err(err),
        };
        if parent_identifier.is_none() {
            continue;
        }
        if has_guarding_referrers(&*graph, id)? {
            continue;
        }
        info!(variant = %variant, id = %id, "deleting obsolete isoform");
        graph.delete(id)?;
        outcome.deleted.insert(id);
        outcome.no_referrer.insert(id);
        isoforms.remove(&variant);
    }
    Ok(())
}

/// Variant ids carried by more than one UniProt isoform.
pub fn find_duplicate_isoforms<S>(store: &S) -> Result<BTreeMap<String, Vec<DbId>>, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    let mut uniprot_databases = BTreeMap::new();
    let mut groups: BTreeMap<String, Vec<DbId>> = BTreeMap::new();
    for isoform in store.find_by_class(Class::Isoform)? {
        let Some(id) = isoform.id else {
            continue;
        };
        let Some(database) = isoform.reference(Attribute::ReferenceDatabase) else {
            continue;
        };
        let is_uniprot = match uniprot_databases.get(&database) {
            Some(flag) => *flag,
            None => {
                let flag = is_uniprot_database(store, database)?;
                uniprot_databases.insert(database, flag);
                flag
            }
        };
        if !is_uniprot {
            continue;
        }
        let Some(variant) = isoform.text(Attribute::VariantIdentifier) else {
            info!(id = %id, "isoform has no variant identifier");
            continue;
        };
        groups.entry(variant.to_string()).or_default().push(id);
    }

    groups.retain(|_, ids| ids.len() > 1);
    for (variant, ids) in &groups {
        warn!(variant = %variant, ids = ?ids, "multiple instances for variant identifier");
    }
    Ok(groups)
}

fn is_uniprot_database<S>(store: &S, id: DbId) -> Result<bool, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    match store.fetch(id) {
        Ok(database) => Ok(database
            .texts(Attribute::Name)
            .iter()
            .chain(std::iter::once(&database.display_name))
            .any(|name| name.to_lowercase().contains("uniprot"))),
        Err(KiraError::InstanceNotFound(_)) => Ok(false),
        Err(err) => Err(err),
    }
}
