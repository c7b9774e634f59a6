use std::collections::BTreeSet;
use std::fs;
use std::io::BufReader;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{NaiveDate, NaiveDateTime};

use kira_uniprot_sync::app::{App, ProgressEvent, ProgressSink};
use kira_uniprot_sync::config::{Config, ConfigLoader, ResolvedConfig};
use kira_uniprot_sync::domain::DbId;
use kira_uniprot_sync::error::KiraError;
use kira_uniprot_sync::feed::SwissProtFeed;
use kira_uniprot_sync::graph::{Attribute, Class, Entity, KnowledgeStore, Value, find_first};
use kira_uniprot_sync::resolver::StatusResolver;
use kira_uniprot_sync::store::MemoryStore;

const FIXTURE: &str = include_str!("fixtures/uniprot_sprot.xml");
const MULTI_GENE_FIXTURE: &str = include_str!("fixtures/multi_gene.xml");

#[derive(Default)]
struct FakeResolver {
    provisional: BTreeSet<String>,
    non_primary: BTreeSet<String>,
    unreachable: BTreeSet<String>,
}

impl StatusResolver for FakeResolver {
    fn is_primary_assembly(&self, gene_id: &str) -> Result<bool, KiraError> {
        if self.unreachable.contains(gene_id) {
            return Err(KiraError::RetriesExhausted {
                attempts: 5,
                message: format!("lookup/id/{gene_id} timed out"),
            });
        }
        Ok(!self.non_primary.contains(gene_id))
    }

    fn is_provisional_accession(&self, accession: &str) -> Result<bool, KiraError> {
        Ok(self.provisional.contains(accession))
    }
}

struct Quiet;

impl ProgressSink for Quiet {
    fn event(&self, _event: ProgressEvent) {}
}

struct Seeded {
    replaced: DbId,
    retired: DbId,
    duplicate: DbId,
    provisional: DbId,
    guarded: DbId,
    skipped: DbId,
}

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 5)
        .and_then(|date| date.and_hms_opt(9, 15, 0))
        .unwrap()
}

fn resolver() -> FakeResolver {
    FakeResolver {
        provisional: BTreeSet::from(["A0A024RBG1".to_string()]),
        ..FakeResolver::default()
    }
}

fn records() -> SwissProtFeed<BufReader<&'static [u8]>> {
    SwissProtFeed::new(BufReader::new(FIXTURE.as_bytes()))
}

fn multi_gene_records() -> SwissProtFeed<BufReader<&'static [u8]>> {
    SwissProtFeed::new(BufReader::new(MULTI_GENE_FIXTURE.as_bytes()))
}

fn config(directory: &Utf8PathBuf) -> ResolvedConfig {
    let config: Config = serde_json::from_value(serde_json::json!({
        "update_directory": directory.as_str(),
        "commit_window": 1,
    }))
    .unwrap();
    ConfigLoader::resolve_config(config).unwrap()
}

fn master(store: &mut MemoryStore, database: DbId, accession: &str) -> DbId {
    let mut entity = Entity::new(Class::Master)
        .with(Attribute::ReferenceDatabase, Value::Ref(database))
        .with(Attribute::Identifier, Value::text(accession));
    entity.display_name = format!("UniProt:{accession}");
    store.create(&entity).unwrap()
}

fn feature(store: &mut MemoryStore, attribute: Attribute, target: DbId) -> DbId {
    store
        .create(&Entity::new(Class::SequenceFeature).with(attribute, Value::Ref(target)))
        .unwrap()
}

fn seed(store: &mut MemoryStore) -> Seeded {
    let uniprot = store
        .create(&Entity::new(Class::ReferenceDatabase).with(Attribute::Name, Value::text("UniProt")))
        .unwrap();
    store
        .create(&Entity::new(Class::ReferenceDatabase).with(Attribute::Name, Value::text("ENSEMBL")))
        .unwrap();

    let replaced = master(store, uniprot, "Q11111");
    let stable = store
        .create(
            &Entity::new(Class::StableIdentifier).with(Attribute::Identifier, Value::text("R-HSA-100")),
        )
        .unwrap();
    store
        .create(
            &Entity::new(Class::SequenceFeature)
                .with(Attribute::ReferenceEntity, Value::Ref(replaced))
                .with(Attribute::StableIdentifier, Value::Ref(stable)),
        )
        .unwrap();
    feature(store, Attribute::ReferenceEntity, replaced);

    let retired = master(store, uniprot, "P99999");
    master(store, uniprot, "P33333");
    let duplicate = master(store, uniprot, "P33333");
    let provisional = master(store, uniprot, "A0A024RBG1");

    let guarded = master(store, uniprot, "P55555");
    feature(store, Attribute::ReferenceSequence, guarded);

    let skipped = master(store, uniprot, "P77777");
    feature(store, Attribute::ReferenceEntity, skipped);

    Seeded {
        replaced,
        retired,
        duplicate,
        provisional,
        guarded,
        skipped,
    }
}

fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, path)
}

fn read(directory: &Utf8PathBuf, name: &str) -> String {
    fs::read_to_string(directory.join(name).as_std_path()).unwrap()
}

#[test]
fn full_update_reconciles_and_reclaims() {
    let (_temp, directory) = temp_dir();
    let config = config(&directory);
    let mut store = MemoryStore::open(&config.store_snapshot).unwrap();
    let seeded = seed(&mut store);
    let skip_list = BTreeSet::from(["P77777".to_string()]);

    let mut app = App::new(store, resolver());
    let summary = app
        .run(&config, records(), &skip_list, now(), &Quiet)
        .unwrap();

    assert_eq!(summary.feed_records, 3);
    assert_eq!(summary.malformed_entries, 1);
    assert_eq!(summary.processed_records, 2);
    assert_eq!(summary.skipped_records, 1);
    assert_eq!(summary.new_masters, 1);
    assert_eq!(summary.new_isoforms, 1);
    assert_eq!(summary.new_gene_records, 1);
    assert_eq!(summary.entities_updated, 1);
    assert_eq!(summary.mismatched_isoforms, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.provisional, 1);
    assert_eq!(summary.obsolete_deleted, 1);
    assert_eq!(summary.report.replaceable, 1);
    assert_eq!(summary.report.terminal, 0);
    assert_eq!(summary.report.skip_terminal, 1);
    assert_eq!(summary.final_gc.guarded, 1);
    assert_eq!(summary.final_gc.deleted, 0);

    let store = app.graph();
    assert!(!store.in_transaction());
    assert!(!store.contains(seeded.retired));
    for kept in [
        seeded.replaced,
        seeded.duplicate,
        seeded.provisional,
        seeded.guarded,
        seeded.skipped,
    ] {
        assert!(store.contains(kept), "instance {kept} should survive");
    }

    let created = find_first(store, Class::Master, Attribute::Identifier, "P12345")
        .unwrap()
        .unwrap();
    assert_eq!(created.display_name, "UniProt:P12345 GENEA");
    assert_eq!(created.first(Attribute::IsSequenceChanged), Some(&Value::Bool(false)));
    assert_eq!(created.references(Attribute::ReferenceGene).len(), 1);
    assert!(!created.has_value(Attribute::Modified));

    let isoform = find_first(store, Class::Isoform, Attribute::VariantIdentifier, "P12345-2")
        .unwrap()
        .unwrap();
    assert_eq!(isoform.references(Attribute::IsoformParent), vec![created.id.unwrap()]);
    assert!(
        find_first(store, Class::Isoform, Attribute::VariantIdentifier, "Q22222-1")
            .unwrap()
            .is_none()
    );
    assert!(
        find_first(store, Class::Master, Attribute::Identifier, "P44444")
            .unwrap()
            .is_none()
    );

    let duplicate = store.fetch(seeded.duplicate).unwrap();
    assert!(!duplicate.has_value(Attribute::Name));

    let wiki = read(&directory, "uniprot.wiki");
    assert!(wiki.contains("[https://www.uniprot.org/uniprot/P12345 P12345]"));
    assert!(wiki.contains("|Q11111\n"));
    assert!(wiki.contains("R-HSA-100|"));
    assert!(wiki.contains("||P77777\n"));
    assert!(!wiki.contains("A0A024RBG1"));
    assert!(!wiki.contains("P55555"));

    assert_eq!(
        read(&directory, "duplicated_db_id.txt"),
        format!(
            "ReferenceGeneProduct_Db_Id\tDuplicate_UniProt_Accession\nP33333\t{}\n",
            seeded.duplicate
        )
    );
    assert_eq!(
        read(&directory, "trembl_to_update.acc"),
        "TrEMBL_Accessions\nA0A024RBG1\n"
    );
    assert!(
        read(&directory, "sequence_uniprot_report.txt")
            .contains("chain:1-100 for")
    );
    assert!(
        read(&directory, "sequence_uniprot_report.txt")
            .contains("added on Mon Jan 05 2026")
    );
    assert!(
        read(&directory, "reference_DNA_sequence_report.txt")
            .contains("created for ENSG00000000001")
    );

    let reopened = MemoryStore::open(&config.store_snapshot).unwrap();
    assert!(!reopened.contains(seeded.retired));
    assert_eq!(reopened.len(), store.len());
}

#[test]
fn provisional_duplicates_are_left_out_of_report() {
    let (_temp, directory) = temp_dir();
    let config = config(&directory);
    let mut store = MemoryStore::new();
    let seeded = seed(&mut store);
    let resolver = FakeResolver {
        provisional: BTreeSet::from(["A0A024RBG1".to_string(), "P33333".to_string()]),
        ..FakeResolver::default()
    };

    let mut app = App::new(store, resolver);
    let summary = app
        .run(&config, records(), &BTreeSet::new(), now(), &Quiet)
        .unwrap();

    assert_eq!(summary.duplicates, 0);
    assert_eq!(
        read(&directory, "duplicated_db_id.txt"),
        "ReferenceGeneProduct_Db_Id\tDuplicate_UniProt_Accession\n"
    );
    assert!(app.graph().contains(seeded.duplicate));
}

#[test]
fn secondary_gene_ids_need_primary_assembly() {
    let (_temp, directory) = temp_dir();
    let config = config(&directory);
    let mut store = MemoryStore::new();
    seed(&mut store);
    let resolver = FakeResolver {
        non_primary: BTreeSet::from([
            "ENSG00000000011".to_string(),
            "ENSG00000000020".to_string(),
        ]),
        unreachable: BTreeSet::from(["ENSG00000000012".to_string()]),
        ..FakeResolver::default()
    };

    let mut app = App::new(store, resolver);
    let summary = app
        .run(&config, multi_gene_records(), &BTreeSet::new(), now(), &Quiet)
        .unwrap();

    assert_eq!(summary.new_masters, 2);
    assert_eq!(summary.new_gene_records, 2);

    let store = app.graph();
    let gene = |id: &str| {
        find_first(store, Class::GeneRecord, Attribute::Identifier, id)
            .unwrap()
            .and_then(|gene| gene.id)
    };
    let primary = gene("ENSG00000000010").unwrap();
    assert!(gene("ENSG00000000011").is_none());
    assert!(gene("ENSG00000000012").is_none());
    // A lone gene id is linked whatever its assembly.
    let lone = gene("ENSG00000000020").unwrap();

    let master = |accession: &str| {
        find_first(store, Class::Master, Attribute::Identifier, accession)
            .unwrap()
            .unwrap()
    };
    assert_eq!(master("P20000").references(Attribute::ReferenceGene), vec![primary]);
    assert_eq!(master("P30000").references(Attribute::ReferenceGene), vec![lone]);

    let report = read(&directory, "reference_DNA_sequence_report.txt");
    assert!(report.contains(
        "Multiple gene ids -- P20000\tGENED\t[ENSG00000000010, ENSG00000000011, ENSG00000000012]"
    ));
    for skipped in ["ENSG00000000011", "ENSG00000000012"] {
        assert!(report.contains(&format!(
            "{skipped} is not a primary/canonical gene -- skipping creation of ReferenceDNASequence"
        )));
    }
    assert!(report.contains(&format!(
        "Reference DNA sequence with db_id {primary} created for ENSG00000000010"
    )));
    assert!(report.contains(&format!(
        "Reference DNA sequence with db_id {lone} created for ENSG00000000020"
    )));
    assert!(!report.contains("Multiple gene ids -- P30000"));
}

#[test]
fn second_run_changes_nothing() {
    let (_temp, directory) = temp_dir();
    let config = config(&directory);
    let mut store = MemoryStore::new();
    seed(&mut store);
    let skip_list = BTreeSet::new();

    let mut app = App::new(store, resolver());
    app.run(&config, records(), &skip_list, now(), &Quiet).unwrap();
    let instances = app.graph().len();
    let summary = app.run(&config, records(), &skip_list, now(), &Quiet).unwrap();

    assert_eq!(summary.new_masters, 0);
    assert_eq!(summary.new_isoforms, 0);
    assert_eq!(summary.new_gene_records, 0);
    assert_eq!(summary.entities_updated, 0);
    assert_eq!(summary.obsolete_deleted, 0);
    assert_eq!(summary.duplicates, 1);
    // Only the second audit edit is new.
    assert_eq!(app.graph().len(), instances + 1);
    assert!(
        !read(&directory, "sequence_uniprot_report.txt").contains("chain:1-100")
    );
}

#[test]
fn dry_run_leaves_snapshot_untouched() {
    let (_temp, directory) = temp_dir();
    let config = config(&directory);
    let mut store = MemoryStore::open(&config.store_snapshot).unwrap();
    let seeded = seed(&mut store);
    store.save().unwrap();
    let before = read(&directory, "knowledge-store.json");

    let detached = MemoryStore::open(&config.store_snapshot).unwrap().detached();
    let mut app = App::new(detached, resolver());
    app.run(&config, records(), &BTreeSet::new(), now(), &Quiet)
        .unwrap();

    assert!(!app.graph().contains(seeded.retired));
    assert_eq!(read(&directory, "knowledge-store.json"), before);
}

#[test]
fn missing_reference_database_aborts_run() {
    let (_temp, directory) = temp_dir();
    let config = config(&directory);
    let mut store = MemoryStore::new();
    store
        .create(&Entity::new(Class::ReferenceDatabase).with(Attribute::Name, Value::text("UniProt")))
        .unwrap();

    let mut app = App::new(store, resolver());
    let err = app
        .run(&config, records(), &BTreeSet::new(), now(), &Quiet)
        .unwrap_err();
    assert_matches!(err, KiraError::MissingReferenceDatabase(name) if name == "ENSEMBL");
}

#[test]
fn index_reports_sizes() {
    let mut store = MemoryStore::new();
    seed(&mut store);
    let app = App::new(store, resolver());
    let result = app.index(&Quiet).unwrap();
    assert_eq!(result.total_instances, 7);
    assert_eq!(result.index.masters, 6);
    assert_eq!(result.index.isoforms, 0);
}
