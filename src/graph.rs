use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::DbId;
use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Class {
    Master,
    Isoform,
    GeneRecord,
    ReferenceDatabase,
    Species,
    Person,
    AuditEdit,
    SequenceFeature,
    ModifiedResidue,
    StableIdentifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Scalar,
    EntityScalar,
    List,
    EntityList,
}

impl AttributeKind {
    pub fn is_single(self) -> bool {
        matches!(self, AttributeKind::Scalar | AttributeKind::EntityScalar)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Attribute {
    Identifier,
    VariantIdentifier,
    ReferenceDatabase,
    SecondaryIdentifier,
    Description,
    SequenceLength,
    Species,
    Checksum,
    Name,
    GeneName,
    Comment,
    Keyword,
    Chain,
    IsSequenceChanged,
    ChainChangeLog,
    ReferenceGene,
    IsoformParent,
    Created,
    Modified,
    Author,
    Note,
    DateTime,
    Surname,
    Initial,
    ReferenceEntity,
    ReferenceSequence,
    SecondReferenceSequence,
    HasModifiedResidue,
    StableIdentifier,
}

impl Attribute {
    pub fn kind(self) -> AttributeKind {
        match self {
            Attribute::Identifier
            | Attribute::VariantIdentifier
            | Attribute::SequenceLength
            | Attribute::Checksum
            | Attribute::Comment
            | Attribute::IsSequenceChanged
            | Attribute::ChainChangeLog
            | Attribute::Note
            | Attribute::DateTime
            | Attribute::Surname
            | Attribute::Initial => AttributeKind::Scalar,
            Attribute::ReferenceDatabase
            | Attribute::Species
            | Attribute::Created
            | Attribute::Author
            | Attribute::ReferenceEntity
            | Attribute::ReferenceSequence
            | Attribute::SecondReferenceSequence
            | Attribute::StableIdentifier => AttributeKind::EntityScalar,
            Attribute::SecondaryIdentifier
            | Attribute::Description
            | Attribute::Name
            | Attribute::GeneName
            | Attribute::Keyword
            | Attribute::Chain => AttributeKind::List,
            Attribute::ReferenceGene
            | Attribute::IsoformParent
            | Attribute::Modified
            | Attribute::HasModifiedResidue => AttributeKind::EntityList,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Reverse edges that can point at a reference entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    ReferenceEntity,
    ReferenceSequence,
    SecondReferenceSequence,
    IsoformParent,
    HasModifiedResidue,
}

impl Relation {
    /// Any referrer through one of these blocks deletion.
    pub const DELETION_GUARDS: [Relation; 4] = [
        Relation::ReferenceEntity,
        Relation::ReferenceSequence,
        Relation::SecondReferenceSequence,
        Relation::IsoformParent,
    ];

    pub fn attribute(self) -> Attribute {
        match self {
            Relation::ReferenceEntity => Attribute::ReferenceEntity,
            Relation::ReferenceSequence => Attribute::ReferenceSequence,
            Relation::SecondReferenceSequence => Attribute::SecondReferenceSequence,
            Relation::IsoformParent => Attribute::IsoformParent,
            Relation::HasModifiedResidue => Attribute::HasModifiedResidue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Int(i64),
    Bool(bool),
    Ref(DbId),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Text(text) if text.is_empty())
    }

    /// Comparison key: store id for references, string form otherwise.
    pub fn key(&self) -> String {
        match self {
            Value::Text(text) => text.clone(),
            Value::Int(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Ref(id) => id.to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<DbId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Option<DbId>,
    pub class: Class,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<Attribute, Vec<Value>>,
}

impl Entity {
    pub fn new(class: Class) -> Self {
        Self {
            id: None,
            class,
            display_name: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, attribute: Attribute, value: Value) -> Self {
        self.set(attribute, vec![value]);
        self
    }

    pub fn values(&self, attribute: Attribute) -> &[Value] {
        self.attributes
            .get(&attribute)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first(&self, attribute: Attribute) -> Option<&Value> {
        self.values(attribute).first()
    }

    pub fn text(&self, attribute: Attribute) -> Option<&str> {
        self.first(attribute)
            .and_then(Value::as_text)
            .filter(|text| !text.is_empty())
    }

    pub fn texts(&self, attribute: Attribute) -> Vec<String> {
        self.values(attribute)
            .iter()
            .filter_map(|value| value.as_text().map(str::to_string))
            .collect()
    }

    pub fn reference(&self, attribute: Attribute) -> Option<DbId> {
        self.first(attribute).and_then(Value::as_ref_id)
    }

    pub fn references(&self, attribute: Attribute) -> Vec<DbId> {
        self.values(attribute)
            .iter()
            .filter_map(Value::as_ref_id)
            .collect()
    }

    pub fn has_value(&self, attribute: Attribute) -> bool {
        !self.values(attribute).is_empty()
    }

    /// Single-valued attributes keep only the first value.
    pub fn set(&mut self, attribute: Attribute, mut values: Vec<Value>) {
        if values.is_empty() {
            self.attributes.remove(&attribute);
            return;
        }
        if attribute.kind().is_single() {
            values.truncate(1);
        }
        self.attributes.insert(attribute, values);
    }

    pub fn push(&mut self, attribute: Attribute, value: Value) {
        if attribute.kind().is_single() {
            self.set(attribute, vec![value]);
        } else {
            self.attributes.entry(attribute).or_default().push(value);
        }
    }

    pub fn references_target(&self, attribute: Attribute, target: DbId) -> bool {
        self.values(attribute)
            .iter()
            .any(|value| value.as_ref_id() == Some(target))
    }

    /// Store id as text, or an empty string for unsaved entities.
    pub fn id_label(&self) -> String {
        self.id.map(|id| id.to_string()).unwrap_or_default()
    }
}

pub trait KnowledgeStore {
    fn find_by_attribute(
        &self,
        class: Class,
        attribute: Attribute,
        value: &Value,
    ) -> Result<Vec<Entity>, KiraError>;
    fn find_by_class(&self, class: Class) -> Result<Vec<Entity>, KiraError>;
    fn fetch(&self, id: DbId) -> Result<Entity, KiraError>;
    fn create(&mut self, entity: &Entity) -> Result<DbId, KiraError>;
    fn update(&mut self, entity: &Entity) -> Result<(), KiraError>;
    fn delete(&mut self, id: DbId) -> Result<(), KiraError>;
    fn begin_transaction(&mut self) -> Result<(), KiraError>;
    fn commit(&mut self) -> Result<(), KiraError>;
}

pub trait InboundReferenceLookup {
    fn referrers(&self, target: DbId, relation: Relation) -> Result<Vec<Entity>, KiraError>;
}

/// Everything the reconciliation engine needs from its backing store.
pub trait Graph: KnowledgeStore + InboundReferenceLookup {}

impl<T: KnowledgeStore + InboundReferenceLookup> Graph for T {}

pub fn has_guarding_referrers<L>(lookup: &L, target: DbId) -> Result<bool, KiraError>
where
    L: InboundReferenceLookup + ?Sized,
{
    for relation in Relation::DELETION_GUARDS {
        if !lookup.referrers(target, relation)?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn find_first<S>(
    store: &S,
    class: Class,
    attribute: Attribute,
    value: &str,
) -> Result<Option<Entity>, KiraError>
where
    S: KnowledgeStore + ?Sized,
{
    Ok(store
        .find_by_attribute(class, attribute, &Value::text(value))?
        .into_iter()
        .next())
}
