use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::warn;

use crate::error::KiraError;
use crate::retry::{Attempt, RetryPolicy, retry};

pub const PRIMARY_ASSEMBLY_REGIONS: [&str; 25] = [
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y", "MT",
];

pub const ASSEMBLY_RETRY: RetryPolicy = RetryPolicy::linear(5, Duration::from_millis(500));
const BAD_REQUEST_PAUSE: Duration = Duration::from_secs(5);

pub trait StatusResolver {
    /// Whether an Ensembl gene id sits on a primary-assembly chromosome.
    fn is_primary_assembly(&self, gene_id: &str) -> Result<bool, KiraError>;
    /// Whether an accession is unreviewed (TrEMBL) upstream.
    fn is_provisional_accession(&self, accession: &str) -> Result<bool, KiraError>;
}

#[derive(Clone)]
pub struct HttpStatusResolver {
    client: Client,
    ensembl_base: String,
    uniprot_base: String,
}

impl HttpStatusResolver {
    pub const ENSEMBL_LOOKUP_BASE: &str = "https://rest.ensembl.org/lookup/id";
    pub const UNIPROT_BASE: &str = "https://rest.uniprot.org/uniprotkb";

    pub fn new() -> Result<Self, KiraError> {
        Self::with_base_urls(Self::ENSEMBL_LOOKUP_BASE, Self::UNIPROT_BASE)
    }

    pub fn with_base_urls(ensembl_base: &str, uniprot_base: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| KiraError::UniprotHttp(err.to_string()))?;
        Ok(Self {
            client,
            ensembl_base: ensembl_base.trim_end_matches('/').to_string(),
            uniprot_base: uniprot_base.trim_end_matches('/').to_string(),
        })
    }

    fn lookup_region(&self, gene_id: &str) -> Attempt<Option<String>> {
        let url = format!(
            "{}/{}?content-type=application/json",
            self.ensembl_base, gene_id
        );
        let response = match self.client.get(&url).send() {
            Ok(response) => response,
            Err(err) => {
                return Attempt::Retry {
                    after: None,
                    cause: KiraError::EnsemblHttp(err.to_string()),
                };
            }
        };
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        classify_assembly_response(status, &body)
    }
}

impl StatusResolver for HttpStatusResolver {
    fn is_primary_assembly(&self, gene_id: &str) -> Result<bool, KiraError> {
        let region = retry(ASSEMBLY_RETRY, |_| self.lookup_region(gene_id))?;
        Ok(region.as_deref().map(is_primary_region).unwrap_or(false))
    }

    fn is_provisional_accession(&self, accession: &str) -> Result<bool, KiraError> {
        let url = format!("{}/{}.txt", self.uniprot_base, accession);
        let response = match self.client.get(&url).send() {
            Ok(response) => response,
            Err(err) => match err.status() {
                Some(status) => return classify_status_failure(accession, status.as_u16()),
                None => return Err(KiraError::ServiceUnavailable(err.to_string())),
            },
        };
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return classify_status_failure(accession, status);
        }
        match response.text() {
            Ok(text) => Ok(marks_unreviewed(&text)),
            Err(err) => {
                warn!(accession, error = %err, "unable to read UniProt entry text");
                Ok(false)
            }
        }
    }
}

pub fn classify_assembly_response(status: u16, body: &str) -> Attempt<Option<String>> {
    match status {
        200..=299 => Attempt::Done(parse_seq_region(body)),
        404 => Attempt::Done(None),
        400 if body.to_lowercase().contains("not found") => Attempt::Done(None),
        400..=499 => Attempt::Retry {
            after: Some(BAD_REQUEST_PAUSE),
            cause: KiraError::EnsemblStatus {
                status,
                message: body.to_string(),
            },
        },
        _ => Attempt::Retry {
            after: None,
            cause: KiraError::EnsemblStatus {
                status,
                message: body.to_string(),
            },
        },
    }
}

pub fn parse_seq_region(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("seq_region_name")
        .and_then(|region| region.as_str())
        .map(str::to_string)
}

pub fn is_primary_region(region: &str) -> bool {
    PRIMARY_ASSEMBLY_REGIONS.contains(&region)
}

pub fn marks_unreviewed(text: &str) -> bool {
    text.lines()
        .any(|line| line.contains("Unreviewed") || line.contains("TrEMBL"))
}

/// Server-side failures mean UniProt itself is down; anything else is per-record.
pub fn classify_status_failure(accession: &str, status: u16) -> Result<bool, KiraError> {
    if status >= 500 {
        return Err(KiraError::ServiceUnavailable(format!(
            "status {status} while checking {accession}"
        )));
    }
    warn!(accession, status, "unable to get UniProt status, assuming reviewed");
    Ok(false)
}
