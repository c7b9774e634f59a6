use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::diff::{ChangeLogs, FieldValues, apply_values, values_differ};
use crate::domain::{DbId, GENE_LINKED_SPECIES, Record, resolve_species};
use crate::error::KiraError;
use crate::graph::{Attribute, Class, Entity, Graph, Value, find_first};
use crate::index::IdentityIndex;
use crate::report::LineLog;
use crate::resolver::StatusResolver;

/// Fixed identities every write in a run refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub audit_edit: DbId,
    pub uniprot_database: DbId,
    pub ensembl_database: DbId,
    /// Date stamped on chain change-log entries.
    pub change_date: String,
}

pub struct ReconcileLogs {
    pub sequence: LineLog,
    pub gene: LineLog,
    pub coordinates: LineLog,
}

impl ReconcileLogs {
    pub fn in_memory() -> Self {
        Self {
            sequence: LineLog::in_memory(),
            gene: LineLog::in_memory(),
            coordinates: LineLog::in_memory(),
        }
    }

    pub fn flush(&mut self) -> Result<(), KiraError> {
        self.sequence.flush()?;
        self.gene.flush()?;
        self.coordinates.flush()
    }
}

/// Cross-record facts collected during the feed pass and consumed by cleanup and reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bookkeeping {
    /// Secondary accession to every primary that lists it, in feed order.
    pub secondary_to_primaries: BTreeMap<String, Vec<String>>,
    /// Isoform id to the accession of the record that declared it.
    pub mismatched_isoforms: BTreeMap<String, String>,
    /// Store id of every non-first master sharing an accession.
    pub duplicates: BTreeMap<DbId, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub records_seen: usize,
    pub records_processed: usize,
    pub records_skipped: usize,
    pub new_masters: usize,
    pub new_isoforms: usize,
    pub new_gene_records: usize,
    pub entities_updated: usize,
}

pub struct Reconciler {
    index: IdentityIndex,
    context: RunContext,
    logs: ReconcileLogs,
    species_cache: BTreeMap<String, DbId>,
    bookkeeping: Bookkeeping,
    stats: ReconcileStats,
}

impl Reconciler {
    pub fn new(index: IdentityIndex, context: RunContext, logs: ReconcileLogs) -> Self {
        Self {
            index,
            context,
            logs,
            species_cache: BTreeMap::new(),
            bookkeeping: Bookkeeping::default(),
            stats: ReconcileStats::default(),
        }
    }

    pub fn into_parts(mut self) -> Result<(IdentityIndex, Bookkeeping, ReconcileStats), KiraError> {
        self.logs.flush()?;
        Ok((self.index, self.bookkeeping, self.stats))
    }

    pub fn reconcile<G, R>(
        &mut self,
        graph: &mut G,
        resolver: &R,
        record: &Record,
    ) -> Result<(), KiraError>
    where
        G: Graph + ?Sized,
        R: StatusResolver + ?Sized,
    {
        self.stats.records_seen += 1;
        let accession = record.primary_accession.as_str();
        for secondary in &record.secondary_accessions {
            let primaries = self
                .bookkeeping
                .secondary_to_primaries
                .entry(secondary.clone())
                .or_default();
            if !primaries.iter().any(|primary| primary == accession) {
                primaries.push(accession.to_string());
            }
        }

        let species_name = resolve_species(&record.organism);
        if species_name.is_none() && !self.index.masters.contains_key(accession) {
            debug!(accession, organism = %record.organism, "unsupported species, record skipped");
            self.stats.records_skipped += 1;
            return Ok(());
        }
        self.stats.records_processed += 1;

        let species = match species_name {
            Some(name) => Some(self.species_id(graph, name)?),
            None => None,
        };
        let gene_records = if species_name == Some(GENE_LINKED_SPECIES) {
            Some(self.link_gene_records(graph, resolver, record, species)?)
        } else {
            None
        };
        let mut fields = record_fields(record, species, gene_records.as_deref());

        if self.index.masters.contains_key(accession) {
            self.update_masters(graph, record, &mut fields)
        } else {
            self.create_master(graph, record, &fields)
        }
    }

    fn create_master<G>(
        &mut self,
        graph: &mut G,
        record: &Record,
        fields: &[FieldValues],
    ) -> Result<(), KiraError>
    where
        G: Graph + ?Sized,
    {
        let accession = &record.primary_accession;
        let mut master = Entity::new(Class::Master)
            .with(
                Attribute::ReferenceDatabase,
                Value::Ref(self.context.uniprot_database),
            )
            .with(Attribute::Identifier, Value::text(accession))
            .with(Attribute::Created, Value::Ref(self.context.audit_edit));
        master.display_name = display_name(&master);
        let id = graph.create(&master)?;
        master.id = Some(id);
        info!(accession = %accession, id = %id, "new master record");
        self.stats.new_masters += 1;

        self.apply_and_persist(graph, &mut master, fields, true)?;
        self.reconcile_isoforms(graph, record, id, fields)
    }

    fn update_masters<G>(
        &mut self,
        graph: &mut G,
        record: &Record,
        fields: &mut Vec<FieldValues>,
    ) -> Result<(), KiraError>
    where
        G: Graph + ?Sized,
    {
        let accession = record.primary_accession.as_str();
        let masters =
            graph.find_by_attribute(Class::Master, Attribute::Identifier, &Value::text(accession))?;
        let mut primary: Option<Entity> = None;
        for mut master in masters {
            let Some(id) = master.id else {
                continue;
            };
            if primary.is_some() {
                warn!(accession, id = %id, "duplicate master, left untouched");
                self.bookkeeping.duplicates.insert(id, accession.to_string());
                continue;
            }
            debug!(accession, id = %id, "updating master record");
            self.apply_and_persist(graph, &mut master, fields, false)?;
            primary = Some(master);
        }

        let Some(master) = primary else {
            return Ok(());
        };
        let Some(master_id) = master.id else {
            return Ok(());
        };
        if let Some(species) = master.reference(Attribute::Species) {
            inherit_species(fields, species);
        }
        self.reconcile_isoforms(graph, record, master_id, fields)?;
        self.index.masters.remove(accession);
        Ok(())
    }

    fn reconcile_isoforms<G>(
        &mut self,
        graph: &mut G,
        record: &Record,
        master_id: DbId,
        fields: &[FieldValues],
    ) -> Result<(), KiraError>
    where
        G: Graph + ?Sized,
    {
        let accession = record.primary_accession.as_str();
        for variant in &record.isoform_ids {
            if !variant.contains(accession) {
                debug!(variant = %variant, accession, "isoform id does not match accession");
                self.bookkeeping
                    .mismatched_isoforms
                    .insert(variant.clone(), accession.to_string());
                continue;
            }

            let existing = graph.find_by_attribute(
                Class::Isoform,
                Attribute::VariantIdentifier,
                &Value::text(variant),
            )?;
            if existing.is_empty() {
                let mut isoform = Entity::new(Class::Isoform)
                    .with(
                        Attribute::ReferenceDatabase,
                        Value::Ref(self.context.uniprot_database),
                    )
                    .with(Attribute::Identifier, Value::text(accession))
                    .with(Attribute::VariantIdentifier, Value::text(variant))
                    .with(Attribute::IsoformParent, Value::Ref(master_id))
                    .with(Attribute::Created, Value::Ref(self.context.audit_edit));
                isoform.display_name = display_name(&isoform);
                let id = graph.create(&isoform)?;
                isoform.id = Some(id);
                info!(variant = %variant, id = %id, "new isoform");
                self.stats.new_isoforms += 1;
                self.apply_and_persist(graph, &mut isoform, fields, true)?;
                continue;
            }

            for mut isoform in existing {
                let parent_changed =
                    !isoform.references_target(Attribute::IsoformParent, master_id);
                if parent_changed {
                    isoform.set(Attribute::IsoformParent, vec![Value::Ref(master_id)]);
                }
                self.persist_with(graph, &mut isoform, fields, false, parent_changed)?;
            }
            self.index.isoforms.remove(variant);
        }
        Ok(())
    }

    fn apply_and_persist<G>(
        &mut self,
        graph: &mut G,
        entity: &mut Entity,
        fields: &[FieldValues],
        is_new: bool,
    ) -> Result<bool, KiraError>
    where
        G: Graph + ?Sized,
    {
        self.persist_with(graph, entity, fields, is_new, false)
    }

    /// Applies `fields`, then writes only when something changed.
    fn persist_with<G>(
        &mut self,
        graph: &mut G,
        entity: &mut Entity,
        fields: &[FieldValues],
        is_new: bool,
        already_changed: bool,
    ) -> Result<bool, KiraError>
    where
        G: Graph + ?Sized,
    {
        let mut logs = ChangeLogs {
            date: &self.context.change_date,
            sequence: &mut self.logs.sequence,
            coordinates: &mut self.logs.coordinates,
        };
        let changed = apply_values(&*graph, entity, fields, &mut logs)? || already_changed;
        if !changed {
            return Ok(false);
        }
        if !is_new {
            entity.push(Attribute::Modified, Value::Ref(self.context.audit_edit));
            self.stats.entities_updated += 1;
        }
        entity.display_name = display_name(entity);
        graph.update(entity)?;
        Ok(true)
    }

    /// Species entities are looked up by name once per run, created when missing.
    fn species_id<G>(&mut self, graph: &mut G, name: &str) -> Result<DbId, KiraError>
    where
        G: Graph + ?Sized,
    {
        if let Some(id) = self.species_cache.get(name) {
            return Ok(*id);
        }
        let id = match find_first(&*graph, Class::Species, Attribute::Name, name)?
            .and_then(|species| species.id)
        {
            Some(id) => id,
            None => {
                let mut species = Entity::new(Class::Species).with(Attribute::Name, Value::text(name));
                species.display_name = name.to_string();
                let id = graph.create(&species)?;
                info!(species = name, id = %id, "new species");
                id
            }
        };
        self.species_cache.insert(name.to_string(), id);
        Ok(id)
    }

    fn link_gene_records<G, R>(
        &mut self,
        graph: &mut G,
        resolver: &R,
        record: &Record,
        species: Option<DbId>,
    ) -> Result<Vec<DbId>, KiraError>
    where
        G: Graph + ?Sized,
        R: StatusResolver + ?Sized,
    {
        let accession = &record.primary_accession;
        let gene_ids = record.distinct_gene_ids();
        let multiple = gene_ids.len() > 1;
        if multiple {
            self.logs.gene.line(&format!(
                "Multiple gene ids -- {accession}\t{}\t[{}]",
                record.display_name(),
                gene_ids.join(", ")
            ))?;
        }

        let mut linked = Vec::with_capacity(gene_ids.len());
        for gene_id in &gene_ids {
            if let Some(&db_id) = self.index.gene_records.get(gene_id) {
                self.logs.gene.line(&format!(
                    "Checking existing reference DNA sequence for {gene_id} with db_id {db_id}"
                ))?;
                let mut gene = graph.fetch(db_id)?;
                if self.diff_gene_record(&mut gene, gene_id, &record.gene_names, species) {
                    self.logs.gene.line(&format!(
                        "Updating existing reference DNA sequence for {gene_id} with db_id {db_id}"
                    ))?;
                    gene.push(Attribute::Modified, Value::Ref(self.context.audit_edit));
                    gene.display_name = display_name(&gene);
                    graph.update(&gene)?;
                    self.stats.entities_updated += 1;
                }
                linked.push(db_id);
                continue;
            }

            if multiple && !primary_assembly(resolver, gene_id) {
                self.logs.gene.line(&format!(
                    "{gene_id} is not a primary/canonical gene -- skipping creation of ReferenceDNASequence"
                ))?;
                continue;
            }

            let mut gene = Entity::new(Class::GeneRecord)
                .with(
                    Attribute::ReferenceDatabase,
                    Value::Ref(self.context.ensembl_database),
                )
                .with(Attribute::Identifier, Value::text(gene_id))
                .with(Attribute::Created, Value::Ref(self.context.audit_edit));
            gene.set(
                Attribute::GeneName,
                record.gene_names.iter().map(Value::text).collect(),
            );
            if let Some(species) = species {
                gene.set(Attribute::Species, vec![Value::Ref(species)]);
            }
            gene.display_name = display_name(&gene);
            let db_id = graph.create(&gene)?;
            self.logs.gene.line(&format!(
                "Reference DNA sequence with db_id {db_id} created for {gene_id}"
            ))?;
            self.index.gene_records.insert(gene_id.clone(), db_id);
            self.stats.new_gene_records += 1;
            linked.push(db_id);
        }
        Ok(linked)
    }

    fn diff_gene_record(
        &self,
        gene: &mut Entity,
        gene_id: &str,
        gene_names: &[String],
        species: Option<DbId>,
    ) -> bool {
        let mut changed = false;
        let database = Value::Ref(self.context.ensembl_database);
        if gene.first(Attribute::ReferenceDatabase) != Some(&database) {
            gene.set(Attribute::ReferenceDatabase, vec![database]);
            changed = true;
        }
        let names = gene_names.iter().map(Value::text).collect::<Vec<_>>();
        if values_differ(gene.values(Attribute::GeneName), &names) {
            gene.set(Attribute::GeneName, names);
            changed = true;
        }
        if let Some(species) = species {
            if gene.reference(Attribute::Species) != Some(species) {
                gene.set(Attribute::Species, vec![Value::Ref(species)]);
                changed = true;
            }
        }
        if gene.text(Attribute::Identifier) != Some(gene_id) {
            gene.set(Attribute::Identifier, vec![Value::text(gene_id)]);
            changed = true;
        }
        changed
    }
}

/// Lookup failures count as non-primary.
fn primary_assembly<R>(resolver: &R, gene_id: &str) -> bool
where
    R: StatusResolver + ?Sized,
{
    match resolver.is_primary_assembly(gene_id) {
        Ok(primary) => primary,
        Err(err) => {
            warn!(gene_id, error = %err, "assembly lookup failed, treating gene as non-primary");
            false
        }
    }
}

/// Candidate attribute values for a master or isoform built from one record.
pub fn record_fields(
    record: &Record,
    species: Option<DbId>,
    gene_records: Option<&[DbId]>,
) -> Vec<FieldValues> {
    let mut fields = vec![
        FieldValues::texts(Attribute::SecondaryIdentifier, record.secondary_identifiers()),
        FieldValues::texts(Attribute::Description, [record.description.as_str()]),
        FieldValues::new(
            Attribute::SequenceLength,
            record
                .sequence_length
                .map(|length| Value::Int(i64::from(length)))
                .into_iter()
                .collect(),
        ),
        FieldValues::new(
            Attribute::Species,
            species.map(Value::Ref).into_iter().collect(),
        ),
        FieldValues::texts(Attribute::Checksum, record.checksum.iter().cloned()),
        FieldValues::texts(Attribute::Name, [record.display_name()]),
        FieldValues::texts(Attribute::GeneName, record.gene_names.iter().cloned()),
        FieldValues::texts(Attribute::Comment, [record.comments.as_str()]),
        FieldValues::texts(Attribute::Keyword, record.keywords.iter().cloned()),
        FieldValues::texts(Attribute::Chain, record.chains.iter().cloned()),
    ];
    if let Some(gene_records) = gene_records {
        fields.push(FieldValues::new(
            Attribute::ReferenceGene,
            gene_records.iter().copied().map(Value::Ref).collect(),
        ));
    }
    fields
}

fn inherit_species(fields: &mut [FieldValues], species: DbId) {
    for field in fields.iter_mut() {
        if field.attribute == Attribute::Species && field.values.is_empty() {
            field.values.push(Value::Ref(species));
        }
    }
}

pub fn display_name(entity: &Entity) -> String {
    match entity.class {
        Class::Master | Class::Isoform => {
            let identifier = entity
                .text(Attribute::VariantIdentifier)
                .or_else(|| entity.text(Attribute::Identifier))
                .unwrap_or_default();
            match entity.text(Attribute::Name) {
                Some(name) => format!("UniProt:{identifier} {name}"),
                None => format!("UniProt:{identifier}"),
            }
        }
        Class::GeneRecord => {
            let identifier = entity.text(Attribute::Identifier).unwrap_or_default();
            match entity.text(Attribute::GeneName) {
                Some(name) => format!("ENSEMBL:{identifier} {name}"),
                None => format!("ENSEMBL:{identifier}"),
            }
        }
        _ => entity.display_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_fields_skip_absent_optionals() {
        let record = Record {
            primary_accession: "P69905".to_string(),
            entry_name: "HBA_HUMAN".to_string(),
            secondary_accessions: vec!["P01922".to_string()],
            gene_names: vec!["HBA1".to_string()],
            ..Record::default()
        };
        let fields = record_fields(&record, None, None);
        let field = |attribute| {
            fields
                .iter()
                .find(|field| field.attribute == attribute)
                .map(|field| field.values.clone())
        };

        assert_eq!(field(Attribute::SequenceLength), Some(vec![]));
        assert_eq!(field(Attribute::Species), Some(vec![]));
        assert_eq!(field(Attribute::ReferenceGene), None);
        assert_eq!(
            field(Attribute::SecondaryIdentifier),
            Some(vec![Value::text("HBA_HUMAN"), Value::text("P01922")])
        );
        assert_eq!(field(Attribute::Name), Some(vec![Value::text("HBA1")]));
    }

    #[test]
    fn inherited_species_only_fills_gaps() {
        let mut fields = vec![FieldValues::new(Attribute::Species, vec![])];
        inherit_species(&mut fields, DbId(4));
        assert_eq!(fields[0].values, vec![Value::Ref(DbId(4))]);

        let mut fields = vec![FieldValues::new(Attribute::Species, vec![Value::Ref(DbId(1))])];
        inherit_species(&mut fields, DbId(4));
        assert_eq!(fields[0].values, vec![Value::Ref(DbId(1))]);
    }

    #[test]
    fn display_names_by_class() {
        let isoform = Entity::new(Class::Isoform)
            .with(Attribute::Identifier, Value::text("P69905"))
            .with(Attribute::VariantIdentifier, Value::text("P69905-2"))
            .with(Attribute::Name, Value::text("HBA1"));
        assert_eq!(display_name(&isoform), "UniProt:P69905-2 HBA1");

        let gene = Entity::new(Class::GeneRecord)
            .with(Attribute::Identifier, Value::text("ENSG00000206172"));
        assert_eq!(display_name(&gene), "ENSEMBL:ENSG00000206172");
    }
}
