use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid UniProt accession: {0}")]
    InvalidAccession(String),

    #[error("invalid store id: {0}")]
    InvalidDbId(String),

    #[error("missing config file kira-sync.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("SwissProt feed not found in {0} (expected uniprot_sprot.xml[.gz])")]
    FeedNotFound(String),

    #[error("malformed feed entry {accession}: {reason}")]
    MalformedEntry { accession: String, reason: String },

    #[error("knowledge store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store instance not found: {0}")]
    InstanceNotFound(u64),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("reference database {0} not found in the knowledge store")]
    #[diagnostic(help("load the reference database marker instance before running an update"))]
    MissingReferenceDatabase(String),

    #[error("Ensembl request failed: {0}")]
    EnsemblHttp(String),

    #[error("Ensembl returned status {status}: {message}")]
    EnsemblStatus { status: u16, message: String },

    #[error("uniprot request failed: {0}")]
    UniprotHttp(String),

    #[error("UniProt service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("gave up after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: usize, message: String },

    #[error("report error: {0}")]
    Report(String),
}
