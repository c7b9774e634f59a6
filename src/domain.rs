use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// Species whose records are linked to gene-level cross references.
pub const GENE_LINKED_SPECIES: &str = "Homo sapiens";

/// Taxon id to species name, in ascending taxon order.
pub const SPECIES_BY_TAXON: [(u32, &str); 12] = [
    (4896, "Schizosaccharomyces pombe"),
    (4932, "Saccharomyces cerevisiae"),
    (6239, "Caenorhabditis elegans"),
    (7227, "Drosophila melanogaster"),
    (9031, "Gallus gallus"),
    (9606, "Homo sapiens"),
    (9913, "Bos taurus"),
    (10090, "Mus musculus"),
    (10116, "Rattus norvegicus"),
    (11695, "Human immunodeficiency virus type 1"),
    (11718, "Human immunodeficiency virus type 2"),
    (132504, "Influenza A virus"),
];

const VALID_ACCESSION_LENGTHS: [usize; 2] = [6, 10];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DbId(pub u64);

impl DbId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DbId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(DbId)
            .map_err(|_| KiraError::InvalidDbId(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = VALID_ACCESSION_LENGTHS.contains(&normalized.len())
            && normalized.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// One SwissProt entry, as extracted by the feed adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub primary_accession: String,
    pub secondary_accessions: Vec<String>,
    pub organism: String,
    pub entry_name: String,
    pub recommended_name: Option<String>,
    pub description: String,
    pub sequence_length: Option<u32>,
    pub checksum: Option<String>,
    pub gene_names: Vec<String>,
    pub comments: String,
    pub keywords: Vec<String>,
    pub chains: Vec<String>,
    pub isoform_ids: Vec<String>,
    pub gene_ids: Vec<String>,
}

impl Record {
    pub fn display_name(&self) -> String {
        if let Some(first) = self.gene_names.first().filter(|name| !name.is_empty()) {
            return first.clone();
        }
        self.recommended_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "No name".to_string())
    }

    /// Entry name followed by the secondary accessions.
    pub fn secondary_identifiers(&self) -> Vec<String> {
        let mut identifiers = Vec::with_capacity(self.secondary_accessions.len() + 1);
        if !self.entry_name.is_empty() {
            identifiers.push(self.entry_name.clone());
        }
        identifiers.extend(self.secondary_accessions.iter().cloned());
        identifiers
    }

    /// Version-stripped, de-duplicated and sorted gene cross-reference ids.
    pub fn distinct_gene_ids(&self) -> Vec<String> {
        let mut ids = self
            .gene_ids
            .iter()
            .map(|id| strip_version(id).to_string())
            .collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Ambiguous organisms resolve to the last matching species in taxon order.
pub fn resolve_species(organism: &str) -> Option<&'static str> {
    let mut resolved = None;
    for (_, species) in SPECIES_BY_TAXON {
        if organism.contains(species) {
            resolved = Some(species);
        }
    }
    resolved
}

pub fn strip_version(identifier: &str) -> &str {
    match identifier.rsplit_once('.') {
        Some((stem, version))
            if !stem.is_empty()
                && !version.is_empty()
                && version.chars().all(|ch| ch.is_ascii_digit()) =>
        {
            stem
        }
        _ => identifier,
    }
}

pub fn is_valid_accession(value: &str) -> bool {
    value.parse::<Accession>().is_ok()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_accession_valid() {
        let acc: Accession = " P69905 ".parse().unwrap();
        assert_eq!(acc.as_str(), "P69905");
        let long: Accession = "A0A024RBG1".parse().unwrap();
        assert_eq!(long.as_str(), "A0A024RBG1");
    }

    #[test]
    fn parse_accession_invalid() {
        let err = "P6990".parse::<Accession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidAccession(_));
        assert!(!is_valid_accession("P69905-2"));
    }

    #[test]
    fn species_tie_break_keeps_last_match() {
        assert_eq!(resolve_species("Homo sapiens (Human)"), Some("Homo sapiens"));
        assert_eq!(
            resolve_species("Mus musculus x Rattus norvegicus"),
            Some("Rattus norvegicus")
        );
        assert_eq!(resolve_species("Danio rerio"), None);
    }

    #[test]
    fn strip_gene_version() {
        assert_eq!(strip_version("ENSG00000206172.8"), "ENSG00000206172");
        assert_eq!(strip_version("ENSG00000206172"), "ENSG00000206172");
        assert_eq!(strip_version("ENSG.x"), "ENSG.x");
    }

    #[test]
    fn display_name_falls_back() {
        let mut record = Record {
            recommended_name: Some("Hemoglobin subunit alpha".to_string()),
            ..Record::default()
        };
        assert_eq!(record.display_name(), "Hemoglobin subunit alpha");
        record.gene_names = vec!["HBA1".to_string(), "HBA2".to_string()];
        assert_eq!(record.display_name(), "HBA1");
        record.gene_names.clear();
        record.recommended_name = None;
        assert_eq!(record.display_name(), "No name");
    }
}
