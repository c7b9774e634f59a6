use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::cleanup::run_cleanup;
use crate::config::{Curator, ResolvedConfig};
use crate::domain::{DbId, Record};
use crate::error::KiraError;
use crate::graph::{Attribute, Class, Entity, Graph, KnowledgeStore, Value, find_first};
use crate::index::{IdentityIndex, IndexSizes};
use crate::reconcile::{ReconcileLogs, Reconciler, RunContext};
use crate::report::{
    COORDINATE_REPORT, ClassificationCounts, DuplicateAccessionReport, GENE_REPORT, GcOutcome,
    LineLog, ProvisionalAccessionReport, SEQUENCE_REPORT, WikiReport, classify, final_gc,
    write_report,
};
use crate::resolver::StatusResolver;

pub const UNIPROT_DATABASE: &str = "UniProt";
pub const ENSEMBL_DATABASE: &str = "ENSEMBL";

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_instances: usize,
    pub index: IndexSizes,
    pub feed_records: usize,
    pub processed_records: usize,
    pub skipped_records: usize,
    pub malformed_entries: usize,
    pub new_masters: usize,
    pub new_isoforms: usize,
    pub new_gene_records: usize,
    pub entities_updated: usize,
    pub mismatched_isoforms: usize,
    pub obsolete_deleted: usize,
    pub duplicates: usize,
    pub provisional: usize,
    pub duplicate_isoforms: usize,
    pub report: ClassificationCounts,
    pub final_gc: GcOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexResult {
    pub total_instances: usize,
    pub index: IndexSizes,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<G, R> {
    graph: G,
    resolver: R,
}

impl<G: Graph, R: StatusResolver> App<G, R> {
    pub fn new(graph: G, resolver: R) -> Self {
        Self { graph, resolver }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn into_graph(self) -> G {
        self.graph
    }

    pub fn index(&self, sink: &dyn ProgressSink) -> Result<IndexResult, KiraError> {
        sink.event(ProgressEvent {
            message: "phase=Index; scanning knowledge store".to_string(),
            elapsed: None,
        });
        let start = Instant::now();
        let index = IdentityIndex::build(&self.graph)?;
        sink.event(ProgressEvent {
            message: "phase=Index; done".to_string(),
            elapsed: Some(start.elapsed()),
        });
        Ok(IndexResult {
            total_instances: self.graph.find_by_class(Class::Master)?.len(),
            index: index.sizes(),
        })
    }

    /// Reconciles `records` against the store, then runs cleanup, reports and the final GC.
    pub fn run<I>(
        &mut self,
        config: &ResolvedConfig,
        records: I,
        skip_list: &BTreeSet<String>,
        now: NaiveDateTime,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, KiraError>
    where
        I: IntoIterator<Item = Result<Record, KiraError>>,
    {
        let started = Instant::now();
        let directory = config.update_directory.as_path();

        self.graph.begin_transaction()?;
        let context = RunContext {
            audit_edit: audit_edit(&mut self.graph, &config.curator, now)?,
            uniprot_database: reference_database(&self.graph, UNIPROT_DATABASE)?,
            ensembl_database: reference_database(&self.graph, ENSEMBL_DATABASE)?,
            change_date: now.format("%a %b %d %Y").to_string(),
        };

        sink.event(ProgressEvent {
            message: "phase=Index; building identity index".to_string(),
            elapsed: None,
        });
        let index = IdentityIndex::build(&self.graph)?;
        let total_instances = self.graph.find_by_class(Class::Master)?.len();
        let index_sizes = index.sizes();

        let mut reconciler = Reconciler::new(index, context.clone(), open_logs(directory)?);
        let mut feed_records = 0usize;
        let mut malformed_entries = 0usize;
        sink.event(ProgressEvent {
            message: "phase=Reconcile; processing feed".to_string(),
            elapsed: None,
        });
        for item in records {
            let record = match item {
                Ok(record) => record,
                Err(KiraError::MalformedEntry { accession, reason }) => {
                    warn!(accession = %accession, reason = %reason, "malformed feed entry skipped");
                    malformed_entries += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            if feed_records > 0 && feed_records % config.commit_window == 0 {
                self.graph.commit()?;
                info!(records = feed_records, "records processed and committed");
                sink.event(ProgressEvent {
                    message: format!("phase=Reconcile; committed records={feed_records}"),
                    elapsed: Some(started.elapsed()),
                });
                self.graph.begin_transaction()?;
            }
            feed_records += 1;
            reconciler.reconcile(&mut self.graph, &self.resolver, &record)?;
        }
        let (mut index, bookkeeping, stats) = reconciler.into_parts()?;
        self.graph.commit()?;
        info!(records = feed_records, "all feed records processed and committed");

        sink.event(ProgressEvent {
            message: "phase=Cleanup; retiring obsolete instances".to_string(),
            elapsed: Some(started.elapsed()),
        });
        self.graph.begin_transaction()?;
        let cleanup = run_cleanup(
            &mut self.graph,
            &self.resolver,
            &mut index,
            &bookkeeping.mismatched_isoforms,
            context.audit_edit,
        )?;

        sink.event(ProgressEvent {
            message: "phase=Report; classifying obsolete instances".to_string(),
            elapsed: Some(started.elapsed()),
        });
        let duplicates = DuplicateAccessionReport::build(&bookkeeping.duplicates, &self.resolver)?;
        write_report(directory, &duplicates)?;
        write_report(directory, &ProvisionalAccessionReport::new(&cleanup.provisional))?;

        let mut classification = classify(
            &self.graph,
            &index.masters,
            &index.isoforms,
            &bookkeeping.secondary_to_primaries,
            skip_list,
        )?;
        classification.no_referrer.extend(cleanup.no_referrer.iter().copied());
        WikiReport {
            database_name: &config.database_name,
            browser_url: &config.instance_browser_url,
        }
        .write(directory, &classification)?;

        let gc = final_gc(
            &mut self.graph,
            &classification.no_referrer,
            &cleanup.skip_deletion,
            &cleanup.deleted,
        )?;
        self.graph.commit()?;
        sink.event(ProgressEvent {
            message: "phase=Done; update complete".to_string(),
            elapsed: Some(started.elapsed()),
        });

        Ok(RunSummary {
            total_instances,
            index: index_sizes,
            feed_records,
            processed_records: stats.records_processed,
            skipped_records: stats.records_skipped,
            malformed_entries,
            new_masters: stats.new_masters,
            new_isoforms: stats.new_isoforms,
            new_gene_records: stats.new_gene_records,
            entities_updated: stats.entities_updated,
            mismatched_isoforms: bookkeeping.mismatched_isoforms.len(),
            obsolete_deleted: cleanup.deleted_count() + gc.deleted,
            duplicates: duplicates.len(),
            provisional: cleanup.provisional.len(),
            duplicate_isoforms: cleanup.duplicate_isoforms.len(),
            report: classification.counts(),
            final_gc: gc,
        })
    }
}

fn open_logs(directory: &Utf8Path) -> Result<ReconcileLogs, KiraError> {
    Ok(ReconcileLogs {
        sequence: LineLog::create(&directory.join(SEQUENCE_REPORT))?,
        gene: LineLog::create(&directory.join(GENE_REPORT))?,
        coordinates: LineLog::append(&directory.join(COORDINATE_REPORT))?,
    })
}

/// Creates this run's audit edit, authored by the configured curator.
pub fn audit_edit<S>(store: &mut S, curator: &Curator, now: NaiveDateTime) -> Result<DbId, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    let person = curator_person(store, curator)?;
    let mut edit = Entity::new(Class::AuditEdit)
        .with(Attribute::Author, Value::Ref(person))
        .with(
            Attribute::Note,
            Value::text(format!("UniProt Update on {}", now.format("%Y%m%d"))),
        )
        .with(
            Attribute::DateTime,
            Value::text(now.format("%Y-%m-%d %H:%M:%S").to_string()),
        );
    edit.display_name = format!(
        "{}, {}, {}",
        curator.surname,
        curator.initials,
        now.format("%Y-%m-%d")
    );
    let id = store.create(&edit)?;
    info!(id = %id, "audit edit created");
    Ok(id)
}

fn curator_person<S>(store: &mut S, curator: &Curator) -> Result<DbId, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    let existing = store
        .find_by_attribute(
            Class::Person,
            Attribute::Surname,
            &Value::text(&curator.surname),
        )?
        .into_iter()
        .find(|person| person.text(Attribute::Initial) == Some(curator.initials.as_str()))
        .and_then(|person| person.id);
    if let Some(id) = existing {
        return Ok(id);
    }

    let mut person = Entity::new(Class::Person)
        .with(Attribute::Surname, Value::text(&curator.surname))
        .with(Attribute::Initial, Value::text(&curator.initials));
    person.display_name = format!("{}, {}", curator.surname, curator.initials);
    store.create(&person)
}

pub fn reference_database<S>(store: &S, name: &str) -> Result<DbId, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    find_first(store, Class::ReferenceDatabase, Attribute::Name, name)?
        .and_then(|database| database.id)
        .ok_or_else(|| KiraError::MissingReferenceDatabase(name.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    use super::*;
    use crate::store::MemoryStore;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 5)
            .and_then(|date| date.and_hms_opt(12, 30, 0))
            .unwrap()
    }

    #[test]
    fn audit_edit_reuses_curator() {
        let mut store = MemoryStore::new();
        let curator = Curator::default();
        let first = audit_edit(&mut store, &curator, noon()).unwrap();
        let second = audit_edit(&mut store, &curator, noon()).unwrap();

        let edit = store.fetch(first).unwrap();
        assert_eq!(edit.text(Attribute::Note), Some("UniProt Update on 20260105"));
        assert_eq!(edit.text(Attribute::DateTime), Some("2026-01-05 12:30:00"));
        assert_eq!(
            store.fetch(second).unwrap().reference(Attribute::Author),
            edit.reference(Attribute::Author)
        );
        assert_eq!(store.find_by_class(Class::Person).unwrap().len(), 1);
    }

    #[test]
    fn missing_reference_database_is_fatal() {
        let store = MemoryStore::new();
        let err = reference_database(&store, UNIPROT_DATABASE).unwrap_err();
        assert_matches!(err, KiraError::MissingReferenceDatabase(name) if name == "UniProt");
    }
}
