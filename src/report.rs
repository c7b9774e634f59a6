use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::DbId;
use crate::error::KiraError;
use crate::fs_util::{create_file, write_bytes_atomic};
use crate::graph::{
    Attribute, Class, Entity, Graph, InboundReferenceLookup, KnowledgeStore, Relation, Value,
    has_guarding_referrers,
};
use crate::index::AccessionIndex;
use crate::resolver::StatusResolver;

pub const SEQUENCE_REPORT: &str = "sequence_uniprot_report.txt";
pub const GENE_REPORT: &str = "reference_DNA_sequence_report.txt";
pub const COORDINATE_REPORT: &str = "ewasCoordinatesReport.txt";
pub const WIKI_REPORT: &str = "uniprot.wiki";

const UNIPROT_ENTRY_URL: &str = "https://www.uniprot.org/uniprot";

/// Line-oriented report file. Lines are also kept in memory.
pub struct LineLog {
    writer: Option<BufWriter<File>>,
    lines: Vec<String>,
}

impl LineLog {
    pub fn create(path: &Utf8Path) -> Result<Self, KiraError> {
        Self::open(path, false)
    }

    pub fn append(path: &Utf8Path) -> Result<Self, KiraError> {
        Self::open(path, true)
    }

    pub fn in_memory() -> Self {
        Self {
            writer: None,
            lines: Vec::new(),
        }
    }

    fn open(path: &Utf8Path, append: bool) -> Result<Self, KiraError> {
        let file = create_file(path, append)?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            lines: Vec::new(),
        })
    }

    pub fn line(&mut self, text: &str) -> Result<(), KiraError> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{text}").map_err(|err| KiraError::Report(err.to_string()))?;
        }
        self.lines.push(text.to_string());
        Ok(())
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn flush(&mut self) -> Result<(), KiraError> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|err| KiraError::Report(err.to_string()))?;
        }
        Ok(())
    }
}

/// A whole-file report: one header line followed by the body lines.
pub trait Report {
    fn file_name(&self) -> &'static str;
    fn header(&self) -> &'static str;
    fn body(&self) -> Vec<String>;

    fn render(&self) -> String {
        let mut content = format!("{}\n", self.header());
        for line in self.body() {
            content.push_str(&line);
            content.push('\n');
        }
        content
    }
}

pub fn write_report(directory: &Utf8Path, report: &dyn Report) -> Result<Utf8PathBuf, KiraError> {
    let path = directory.join(report.file_name());
    write_bytes_atomic(&path, report.render().as_bytes())?;
    info!(path = %path, "report written");
    Ok(path)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateAccessionReport {
    rows: Vec<(String, DbId)>,
}

impl DuplicateAccessionReport {
    /// Accessions the resolver reports as provisional are left out.
    pub fn build<R>(duplicates: &BTreeMap<DbId, String>, resolver: &R) -> Result<Self, KiraError>
    where
        R: StatusResolver + ?Sized,
    {
        let mut provisional = BTreeSet::new();
        for accession in duplicates.values().collect::<BTreeSet<_>>() {
            if resolver.is_provisional_accession(accession)? {
                debug!(accession = %accession, "provisional duplicate left out of report");
                provisional.insert(accession);
            }
        }
        let mut rows = duplicates
            .iter()
            .filter(|(_, accession)| !provisional.contains(accession))
            .map(|(id, accession)| (accession.clone(), *id))
            .collect::<Vec<_>>();
        rows.sort();
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Report for DuplicateAccessionReport {
    fn file_name(&self) -> &'static str {
        "duplicated_db_id.txt"
    }

    fn header(&self) -> &'static str {
        "ReferenceGeneProduct_Db_Id\tDuplicate_UniProt_Accession"
    }

    fn body(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|(accession, id)| format!("{accession}\t{id}"))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionalAccessionReport {
    accessions: BTreeSet<String>,
}

impl ProvisionalAccessionReport {
    pub fn new(accessions: &BTreeSet<String>) -> Self {
        Self {
            accessions: accessions.clone(),
        }
    }
}

impl Report for ProvisionalAccessionReport {
    fn file_name(&self) -> &'static str {
        "trembl_to_update.acc"
    }

    fn header(&self) -> &'static str {
        "TrEMBL_Accessions"
    }

    fn body(&self) -> Vec<String> {
        self.accessions.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObsoleteRow {
    pub replacements: Vec<String>,
    pub accession: String,
    pub db_id: DbId,
    pub referrers: Vec<String>,
    pub species: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub replaceable: Vec<ObsoleteRow>,
    pub terminal: Vec<ObsoleteRow>,
    pub skip_replaceable: Vec<ObsoleteRow>,
    pub skip_terminal: Vec<ObsoleteRow>,
    #[serde(skip)]
    pub no_referrer: BTreeSet<DbId>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ClassificationCounts {
    pub replaceable: usize,
    pub terminal: usize,
    pub skip_replaceable: usize,
    pub skip_terminal: usize,
}

impl Classification {
    pub fn counts(&self) -> ClassificationCounts {
        ClassificationCounts {
            replaceable: self.replaceable.len(),
            terminal: self.terminal.len(),
            skip_replaceable: self.skip_replaceable.len(),
            skip_terminal: self.skip_terminal.len(),
        }
    }

    fn push(&mut self, row: ObsoleteRow, skip_list: &BTreeSet<String>) {
        let skipped = skip_list.contains(&row.accession);
        let bucket = match (row.replacements.is_empty(), skipped) {
            (false, false) => &mut self.replaceable,
            (false, true) => &mut self.skip_replaceable,
            (true, false) => &mut self.terminal,
            (true, true) => &mut self.skip_terminal,
        };
        bucket.push(row);
    }
}

/// Sorts still-obsolete masters, then isoforms, into the four report sections.
pub fn classify<G>(
    graph: &G,
    masters: &AccessionIndex,
    isoforms: &AccessionIndex,
    lineage: &BTreeMap<String, Vec<String>>,
    skip_list: &BTreeSet<String>,
) -> Result<Classification, KiraError>
where
    G: Graph + ?Sized,
{
    let mut classification = Classification::default();
    let candidates = masters
        .keys()
        .map(|accession| (Class::Master, Attribute::Identifier, accession))
        .chain(
            isoforms
                .keys()
                .map(|variant| (Class::Isoform, Attribute::VariantIdentifier, variant)),
        );

    for (class, attribute, accession) in candidates {
        let replacements = lineage.get(accession).cloned().unwrap_or_default();
        for instance in graph.find_by_attribute(class, attribute, &Value::text(accession))? {
            let Some(db_id) = instance.id else {
                continue;
            };
            let referrers = referrer_labels(graph, db_id)?;
            if referrers.is_empty() {
                debug!(accession = %accession, id = %db_id, "obsolete instance has no referrers");
                classification.no_referrer.insert(db_id);
                continue;
            }
            let row = ObsoleteRow {
                replacements: replacements.clone(),
                accession: accession.clone(),
                db_id,
                referrers,
                species: species_name(graph, &instance)?,
            };
            classification.push(row, skip_list);
        }
    }
    Ok(classification)
}

/// Referring sequence features, labelled by stable identifier when they have one.
fn referrer_labels<G>(graph: &G, target: DbId) -> Result<Vec<String>, KiraError>
where
    G: Graph + ?Sized,
{
    let mut labels = Vec::new();
    for referrer in graph.referrers(target, Relation::ReferenceEntity)? {
        if referrer.class != Class::SequenceFeature {
            continue;
        }
        let stable = match referrer.reference(Attribute::StableIdentifier) {
            Some(stable_id) => match graph.fetch(stable_id) {
                Ok(stable) => stable.text(Attribute::Identifier).map(str::to_string),
                Err(KiraError::InstanceNotFound(_)) => None,
                Err(err) => return Err(err),
            },
            None => None,
        };
        labels.push(stable.unwrap_or_else(|| referrer.id_label()));
    }
    Ok(labels)
}

fn species_name<S>(store: &S, entity: &Entity) -> Result<String, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    let Some(species_id) = entity.reference(Attribute::Species) else {
        return Ok(String::new());
    };
    match store.fetch(species_id) {
        Ok(species) => Ok(species.display_name),
        Err(KiraError::InstanceNotFound(_)) => Ok(String::new()),
        Err(err) => Err(err),
    }
}

/// MediaWiki rendering of a [`Classification`].
pub struct WikiReport<'a> {
    pub database_name: &'a str,
    pub browser_url: &'a str,
}

impl WikiReport<'_> {
    pub fn render(&self, classification: &Classification) -> String {
        let mut wiki = String::new();
        self.section(
            &mut wiki,
            "Obsolete UniProt Instances (with replacement UniProt)",
            true,
            &classification.replaceable,
        );
        wiki.push_str("|}\n\n-----\n");
        self.section(
            &mut wiki,
            "Obsolete UniProt Instances (deleted forever, no replacement)",
            false,
            &classification.terminal,
        );
        wiki.push_str("|}\n-----\n");
        self.section(
            &mut wiki,
            "SKIPLIST Obsolete UniProt Instances (with replacement UniProt)",
            true,
            &classification.skip_replaceable,
        );
        wiki.push_str("|}\n-----\n");
        self.section(
            &mut wiki,
            "SKIPLIST Obsolete UniProt Instances (deleted forever, no replacement)",
            false,
            &classification.skip_terminal,
        );
        wiki.push_str("|}\n");
        wiki
    }

    pub fn write(
        &self,
        directory: &Utf8Path,
        classification: &Classification,
    ) -> Result<Utf8PathBuf, KiraError> {
        let path = directory.join(WIKI_REPORT);
        write_bytes_atomic(&path, self.render(classification).as_bytes())?;
        info!(path = %path, "wiki report written");
        Ok(path)
    }

    fn section(&self, wiki: &mut String, caption: &str, replaceable: bool, rows: &[ObsoleteRow]) {
        wiki.push_str("{| class=\"wikitable\"\n");
        wiki.push_str(&format!("|+ {caption}\n|-\n"));
        if replaceable {
            wiki.push_str("! Replacement UniProt\n");
        }
        wiki.push_str("! Obsolete UniProt\n");
        wiki.push_str("! Reactome instances with obsolete UniProt\n");
        wiki.push_str("! EWAS associated with obsolete UniProt\n");
        wiki.push_str("! Species\n|-\n");
        for row in rows {
            wiki.push_str(&self.row(row, replaceable));
        }
    }

    fn row(&self, row: &ObsoleteRow, replaceable: bool) -> String {
        let mut line = String::new();
        if replaceable {
            let links = row
                .replacements
                .iter()
                .map(|accession| format!("[{UNIPROT_ENTRY_URL}/{accession} {accession}]"))
                .collect::<Vec<_>>();
            line.push_str(&format!("||{}\n", links.join("|")));
            line.push_str(&format!("|{}\n", row.accession));
        } else {
            line.push_str(&format!("||{}\n", row.accession));
        }
        line.push_str(&format!(
            "|[{}?DB={}&ID={}& {}]\n",
            self.browser_url, self.database_name, row.db_id, row.db_id
        ));
        line.push_str(&format!("||{}\n", row.referrers.join("|")));
        line.push_str(&format!("|{}\n|-\n", row.species));
        line
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct GcOutcome {
    pub deleted: usize,
    pub guarded: usize,
    pub skipped: usize,
}

/// Deletes no-referrer ids that are still unreferenced through every guard relation.
pub fn final_gc<G>(
    graph: &mut G,
    no_referrer: &BTreeSet<DbId>,
    skip_deletion: &BTreeSet<DbId>,
    already_deleted: &BTreeSet<DbId>,
) -> Result<GcOutcome, KiraError>
where
    G: Graph + ?Sized,
{
    let mut outcome = GcOutcome::default();
    for id in no_referrer {
        if skip_deletion.contains(id) || already_deleted.contains(id) {
            outcome.skipped += 1;
            continue;
        }
        if has_guarding_referrers(&*graph, *id)? {
            warn!(id = %id, "instance gained referrers, not deleted");
            outcome.guarded += 1;
            continue;
        }
        match graph.delete(*id) {
            Ok(()) => {
                info!(id = %id, "deleted obsolete instance with no referrers");
                outcome.deleted += 1;
            }
            Err(KiraError::InstanceNotFound(_)) => outcome.skipped += 1,
            Err(err) => return Err(err),
        }
    }
    Ok(outcome)
}
