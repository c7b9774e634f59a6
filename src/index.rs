use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::domain::DbId;
use crate::error::KiraError;
use crate::graph::{Attribute, Class, KnowledgeStore};

pub type AccessionIndex = BTreeMap<String, DbId>;

/// Accession to store id maps loaded before ingestion.
///
/// Entries are removed as the feed matches them, so whatever remains after
/// the last record denotes instances absent from this release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityIndex {
    pub masters: AccessionIndex,
    pub isoforms: AccessionIndex,
    pub gene_records: AccessionIndex,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct IndexSizes {
    pub masters: usize,
    pub isoforms: usize,
    pub gene_records: usize,
}

impl IdentityIndex {
    pub fn build<S>(store: &S) -> Result<Self, KiraError>
    where
        S: KnowledgeStore + ?Sized,
    {
        info!("populating master accession index");
        let masters = scan(store, Class::Master, Attribute::Identifier)?;
        info!("populating isoform accession index");
        let isoforms = scan(store, Class::Isoform, Attribute::VariantIdentifier)?;
        info!("populating gene record identifier index");
        let gene_records = scan(store, Class::GeneRecord, Attribute::Identifier)?;
        Ok(Self {
            masters,
            isoforms,
            gene_records,
        })
    }

    pub fn sizes(&self) -> IndexSizes {
        IndexSizes {
            masters: self.masters.len(),
            isoforms: self.isoforms.len(),
            gene_records: self.gene_records.len(),
        }
    }
}

fn scan<S>(store: &S, class: Class, attribute: Attribute) -> Result<AccessionIndex, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    let mut index = AccessionIndex::new();
    for entity in store.find_by_class(class)? {
        let (Some(id), Some(identifier)) = (entity.id, entity.text(attribute)) else {
            continue;
        };
        index.insert(identifier.to_string(), id);
    }
    Ok(index)
}
