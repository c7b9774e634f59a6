use std::io::BufRead;
use std::mem;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tracing::info;

use crate::domain::Record;
use crate::error::KiraError;
use crate::fs_util::open_maybe_gz;

pub const FEED_FILE_NAME: &str = "uniprot_sprot.xml";

const CHAIN_FEATURE_TYPES: [&str; 6] = [
    "initiator methionine",
    "chain",
    "peptide",
    "propeptide",
    "signal peptide",
    "transit peptide",
];

/// Finds the SwissProt XML in `directory`, plain or gzipped.
pub fn locate_feed(directory: &Utf8Path) -> Result<Utf8PathBuf, KiraError> {
    let plain = directory.join(FEED_FILE_NAME);
    if plain.as_std_path().is_file() {
        return Ok(plain);
    }
    let gzipped = directory.join(format!("{FEED_FILE_NAME}.gz"));
    if gzipped.as_std_path().is_file() {
        return Ok(gzipped);
    }
    Err(KiraError::FeedNotFound(directory.to_string()))
}

/// Streams one [`Record`] per `<entry>` element.
pub struct SwissProtFeed<R> {
    reader: R,
    parser: EntryParser,
    entry: String,
    line: String,
    finished: bool,
}

impl SwissProtFeed<Box<dyn BufRead>> {
    pub fn open(directory: &Utf8Path) -> Result<Self, KiraError> {
        let path = locate_feed(directory)?;
        info!(path = %path, "reading SwissProt feed");
        Ok(Self::new(open_maybe_gz(&path)?))
    }
}

impl<R: BufRead> SwissProtFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: EntryParser::new(),
            entry: String::new(),
            line: String::new(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for SwissProtFeed<R> {
    type Item = Result<Record, KiraError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => {
                    if self.entry.is_empty() && !self.line.contains("<entry") {
                        continue;
                    }
                    self.entry.push_str(&self.line);
                    if self.line.contains("</entry>") {
                        let entry = mem::take(&mut self.entry);
                        return Some(self.parser.parse(&entry));
                    }
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(KiraError::Filesystem(format!(
                        "read SwissProt feed: {err}"
                    ))));
                }
            }
        }
    }
}

/// Regex field extraction for a single `<entry>` block.
pub struct EntryParser {
    accession: Regex,
    organism: Regex,
    entry_name: Regex,
    protein: Regex,
    recommended_name: Regex,
    description_labels: [(Regex, &'static str); 4],
    any_tag: Regex,
    whitespace: Regex,
    sequence_length: Regex,
    checksum: Regex,
    gene: Regex,
    gene_name: Regex,
    gene_id: Regex,
    keyword: Regex,
    comment: Regex,
    isoform: Regex,
    chain: Regex,
    position: Regex,
    begin: Regex,
    end: Regex,
}

impl Default for EntryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryParser {
    pub fn new() -> Self {
        Self {
            accession: Regex::new(r"<accession>(.*?)</accession>").unwrap(),
            organism: Regex::new(r#"<name type="scientific">(.*?)</name>"#).unwrap(),
            entry_name: Regex::new(r"<name>([A-Za-z0-9_]*)</name>").unwrap(),
            protein: Regex::new(r"(?s)<protein[^>]*>(.*?)</protein>").unwrap(),
            recommended_name: Regex::new(
                r"(?s)<recommendedName[^>]*>\s*<fullName[^>]*>(.*?)</fullName>",
            )
            .unwrap(),
            description_labels: [
                (
                    Regex::new(r"<recommendedName[^>]*>").unwrap(),
                    " recommendedName: ",
                ),
                (
                    Regex::new(r"<alternativeName[^>]*>").unwrap(),
                    " alternativeName: ",
                ),
                (Regex::new(r"<shortName[^>]*>").unwrap(), " shortName: "),
                (Regex::new(r"<ecNumber[^>]*>").unwrap(), " ecNumber: "),
            ],
            any_tag: Regex::new(r"<[^>]*>").unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
            sequence_length: Regex::new(r#"<sequence[^>]*\blength="(\d+)""#).unwrap(),
            checksum: Regex::new(r#"<sequence[^>]*\bchecksum="([0-9A-F]+)""#).unwrap(),
            gene: Regex::new(r"(?s)<gene>(.*?)</gene>").unwrap(),
            gene_name: Regex::new(r"(?s)<name[^>]*>(.*?)</name>").unwrap(),
            gene_id: Regex::new(r#"<property type="gene ID" value="(ENSG[^"]*)""#).unwrap(),
            keyword: Regex::new(r#"<keyword id="[^"]*">(.*?)</keyword>"#).unwrap(),
            comment: Regex::new(
                r#"(?s)<comment type="([A-Za-z ]*?)"[^>]*>\s*<text[^>]*>(.*?)</text>"#,
            )
            .unwrap(),
            isoform: Regex::new(r"<isoform>\s*<id>([A-Z0-9-]*)").unwrap(),
            chain: Regex::new(&format!(
                r#"(?s)<feature[^>]*?\btype="({})"[^>]*>(.*?)</feature>"#,
                CHAIN_FEATURE_TYPES.join("|")
            ))
            .unwrap(),
            position: Regex::new(r#"<position position="(\d+)""#).unwrap(),
            begin: Regex::new(r#"<begin position="(\d+)""#).unwrap(),
            end: Regex::new(r#"<end position="(\d+)""#).unwrap(),
        }
    }

    pub fn parse(&self, entry: &str) -> Result<Record, KiraError> {
        let mut accessions = extract_matches(entry, &self.accession);
        if accessions.is_empty() {
            return Err(KiraError::MalformedEntry {
                accession: String::new(),
                reason: "no accession".to_string(),
            });
        }
        let primary_accession = accessions.remove(0);

        let sequence_length = match first_match(entry, &self.sequence_length) {
            Some(length) => Some(length.parse::<u32>().map_err(|err| {
                KiraError::MalformedEntry {
                    accession: primary_accession.clone(),
                    reason: format!("sequence length {length}: {err}"),
                }
            })?),
            None => None,
        };

        let protein = first_match(entry, &self.protein).unwrap_or_default();
        let recommended_name = first_match(&protein, &self.recommended_name)
            .map(|name| self.collapse(&name))
            .filter(|name| !name.is_empty());

        Ok(Record {
            primary_accession,
            secondary_accessions: accessions,
            organism: first_match(entry, &self.organism).unwrap_or_default(),
            entry_name: first_match(entry, &self.entry_name).unwrap_or_default(),
            recommended_name,
            description: self.normalize_description(&protein),
            sequence_length,
            checksum: first_match(entry, &self.checksum),
            gene_names: self.gene_names(entry),
            comments: self.comments(entry),
            keywords: extract_matches(entry, &self.keyword),
            chains: self.chains(entry),
            isoform_ids: extract_matches(entry, &self.isoform),
            gene_ids: extract_matches(entry, &self.gene_id),
        })
    }

    /// Flattens the protein block into `recommendedName: ... alternativeName: ...` text.
    pub fn normalize_description(&self, protein: &str) -> String {
        let mut description = protein.to_string();
        for (tag, label) in &self.description_labels {
            description = tag.replace_all(&description, *label).into_owned();
        }
        let description = self.any_tag.replace_all(&description, "");
        self.collapse(&description)
    }

    fn collapse(&self, text: &str) -> String {
        self.whitespace.replace_all(text, " ").trim().to_string()
    }

    fn gene_names(&self, entry: &str) -> Vec<String> {
        let mut names = Vec::new();
        for gene in extract_matches(entry, &self.gene) {
            for name in extract_matches(&gene, &self.gene_name) {
                let name = self.collapse(&name);
                if !name.is_empty() && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    fn comments(&self, entry: &str) -> String {
        self.comment
            .captures_iter(entry)
            .map(|captures| {
                format!(
                    "{} {}",
                    captures[1].to_uppercase(),
                    self.collapse(&captures[2])
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn chains(&self, entry: &str) -> Vec<String> {
        self.chain
            .captures_iter(entry)
            .map(|captures| {
                let feature_type = &captures[1];
                let content = &captures[2];
                if feature_type == "initiator methionine" {
                    let position = first_match(content, &self.position).unwrap_or_default();
                    format!("{feature_type}:{position}")
                } else {
                    let begin = first_match(content, &self.begin).unwrap_or_default();
                    let end = first_match(content, &self.end).unwrap_or_default();
                    format!("{feature_type}:{begin}-{end}")
                }
            })
            .collect()
    }
}

fn extract_matches(text: &str, regex: &Regex) -> Vec<String> {
    regex
        .captures_iter(text)
        .filter_map(|captures| captures.get(1).map(|value| value.as_str().to_string()))
        .collect()
}

fn first_match(text: &str, regex: &Regex) -> Option<String> {
    regex
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
}
