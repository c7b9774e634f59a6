use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::changelog::{log_chain_changes, report_dependents, sequence_changed};
use crate::error::KiraError;
use crate::graph::{Attribute, Entity, Graph, Value};
use crate::report::LineLog;

/// Candidate values for one attribute, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValues {
    pub attribute: Attribute,
    pub values: Vec<Value>,
}

impl FieldValues {
    pub fn new(attribute: Attribute, values: Vec<Value>) -> Self {
        Self { attribute, values }
    }

    pub fn texts<I, S>(attribute: Attribute, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(attribute, values.into_iter().map(Value::text).collect())
    }
}

/// Where chain audit lines go while diffing.
pub struct ChangeLogs<'a> {
    pub date: &'a str,
    pub sequence: &'a mut LineLog,
    pub coordinates: &'a mut LineLog,
}

/// Unordered comparison on normalized keys.
pub fn values_differ(old: &[Value], new: &[Value]) -> bool {
    let old_keys = old.iter().map(Value::key).collect::<BTreeSet<_>>();
    let new_keys = new.iter().map(Value::key).collect::<BTreeSet<_>>();
    old_keys != new_keys
}

/// Applies candidate values to `entity` in memory. Returns whether anything changed.
pub fn apply_values<G>(
    graph: &G,
    entity: &mut Entity,
    fields: &[FieldValues],
    logs: &mut ChangeLogs<'_>,
) -> Result<bool, KiraError>
where
    G: Graph + ?Sized,
{
    let mut changed = false;
    for field in fields {
        let attribute = field.attribute;
        let values = field
            .values
            .iter()
            .filter(|value| !value.is_empty())
            .cloned()
            .collect::<Vec<_>>();
        if values.is_empty() {
            warn!(
                attribute = %attribute,
                id = %entity.id_label(),
                "no usable values, attribute skipped"
            );
            continue;
        }

        match attribute {
            Attribute::Checksum => {
                changed |= update_sequence_flag(entity, values[0].as_text());
            }
            Attribute::Chain => {
                let had_chains = entity.has_value(Attribute::Chain);
                let chains = values
                    .iter()
                    .filter_map(|value| value.as_text().map(str::to_string))
                    .collect::<Vec<_>>();
                let logged =
                    log_chain_changes(graph, entity, &chains, logs.date, logs.sequence)?;
                if logged {
                    changed = true;
                    if had_chains {
                        report_dependents(graph, entity, logs.coordinates)?;
                    }
                }
            }
            _ => {}
        }

        if values_differ(entity.values(attribute), &values) {
            debug!(
                attribute = %attribute,
                id = %entity.id_label(),
                old = ?entity.values(attribute),
                new = ?values,
                "attribute changed"
            );
            entity.set(attribute, values);
            changed = true;
        }
    }
    Ok(changed)
}

/// The flag mirrors the comparison between the stored and the incoming checksum.
fn update_sequence_flag(entity: &mut Entity, new_checksum: Option<&str>) -> bool {
    let current = match entity.first(Attribute::IsSequenceChanged) {
        Some(Value::Bool(current)) => Some(*current),
        _ => None,
    };
    let flag = sequence_changed(entity.text(Attribute::Checksum), new_checksum);
    if current == Some(flag) {
        return false;
    }
    entity.set(Attribute::IsSequenceChanged, vec![Value::Bool(flag)]);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DbId;
    use crate::graph::{Class, KnowledgeStore};
    use crate::store::MemoryStore;

    struct Logs {
        sequence: LineLog,
        coordinates: LineLog,
    }

    impl Logs {
        fn new() -> Self {
            Self {
                sequence: LineLog::in_memory(),
                coordinates: LineLog::in_memory(),
            }
        }

        fn borrow(&mut self) -> ChangeLogs<'_> {
            ChangeLogs {
                date: "Mon Jan 05 2026",
                sequence: &mut self.sequence,
                coordinates: &mut self.coordinates,
            }
        }
    }

    #[test]
    fn ordering_is_not_a_change() {
        assert!(!values_differ(
            &[Value::text("Heme"), Value::text("Iron")],
            &[Value::text("Iron"), Value::text("Heme")]
        ));
        assert!(values_differ(&[Value::Ref(DbId(1))], &[Value::Ref(DbId(2))]));
        assert!(values_differ(&[], &[Value::Int(141)]));
    }

    #[test]
    fn empty_candidates_leave_attribute_alone() {
        let store = MemoryStore::new();
        let mut entity = Entity::new(Class::Master).with(Attribute::Comment, Value::text("old"));
        let mut logs = Logs::new();

        let changed = apply_values(
            &store,
            &mut entity,
            &[FieldValues::texts(Attribute::Comment, [""])],
            &mut logs.borrow(),
        )
        .unwrap();

        assert!(!changed);
        assert_eq!(entity.text(Attribute::Comment), Some("old"));
    }

    #[test]
    fn checksum_change_raises_sequence_flag() {
        let store = MemoryStore::new();
        let mut entity = Entity::new(Class::Master)
            .with(Attribute::Checksum, Value::text("AAA"))
            .with(Attribute::IsSequenceChanged, Value::Bool(false));
        let mut logs = Logs::new();

        let changed = apply_values(
            &store,
            &mut entity,
            &[FieldValues::texts(Attribute::Checksum, ["BBB"])],
            &mut logs.borrow(),
        )
        .unwrap();

        assert!(changed);
        assert_eq!(
            entity.first(Attribute::IsSequenceChanged),
            Some(&Value::Bool(true))
        );
        assert_eq!(entity.text(Attribute::Checksum), Some("BBB"));
    }

    #[test]
    fn chain_change_notifies_dependent_features() {
        let mut store = MemoryStore::new();
        let mut master = Entity::new(Class::Master)
            .with(Attribute::Identifier, Value::text("P69905"))
            .with(Attribute::Chain, Value::text("chain:2-142"));
        master.id = Some(store.create(&master).unwrap());
        let mut feature = Entity::new(Class::SequenceFeature)
            .with(Attribute::ReferenceEntity, Value::Ref(master.id.unwrap()));
        feature.display_name = "HBA1 [cytosol]".to_string();
        store.create(&feature).unwrap();
        let mut logs = Logs::new();

        let changed = apply_values(
            &store,
            &mut master,
            &[FieldValues::texts(Attribute::Chain, ["chain:1-142"])],
            &mut logs.borrow(),
        )
        .unwrap();

        assert!(changed);
        assert_eq!(entity_chains(&master), vec!["chain:1-142"]);
        assert_eq!(logs.sequence.lines().len(), 2);
        assert_eq!(logs.coordinates.lines().len(), 1);
        assert!(logs.coordinates.lines()[0].ends_with("HBA1 [cytosol]\tUnknown author"));
    }

    #[test]
    fn first_chains_are_logged_without_notices() {
        let store = MemoryStore::new();
        let mut entity = Entity::new(Class::Master);
        entity.id = Some(DbId(3));
        let mut logs = Logs::new();

        apply_values(
            &store,
            &mut entity,
            &[FieldValues::texts(Attribute::Chain, ["chain:1-10"])],
            &mut logs.borrow(),
        )
        .unwrap();

        assert_eq!(logs.sequence.lines().len(), 1);
        assert!(logs.coordinates.lines().is_empty());
    }

    fn entity_chains(entity: &Entity) -> Vec<String> {
        entity.texts(Attribute::Chain)
    }

    #[test]
    fn unchanged_values_are_not_a_change() {
        let mut store = MemoryStore::new();
        let mut entity = Entity::new(Class::Master)
            .with(Attribute::SequenceLength, Value::Int(142))
            .with(Attribute::Checksum, Value::text("AAA"))
            .with(Attribute::IsSequenceChanged, Value::Bool(false));
        entity.id = Some(store.create(&entity).unwrap());
        let mut logs = Logs::new();

        let changed = apply_values(
            &store,
            &mut entity,
            &[
                FieldValues::new(Attribute::SequenceLength, vec![Value::Int(142)]),
                FieldValues::texts(Attribute::Checksum, ["AAA"]),
            ],
            &mut logs.borrow(),
        )
        .unwrap();

        assert!(!changed);
    }

    #[test]
    fn sequence_flag_resets_when_checksum_unchanged() {
        let store = MemoryStore::new();
        let mut entity = Entity::new(Class::Master)
            .with(Attribute::Checksum, Value::text("BBB"))
            .with(Attribute::IsSequenceChanged, Value::Bool(true));
        let mut logs = Logs::new();
        let fields = [FieldValues::texts(Attribute::Checksum, ["BBB"])];

        let changed = apply_values(&store, &mut entity, &fields, &mut logs.borrow()).unwrap();
        assert!(changed);
        assert_eq!(
            entity.first(Attribute::IsSequenceChanged),
            Some(&Value::Bool(false))
        );

        let again = apply_values(&store, &mut entity, &fields, &mut logs.borrow()).unwrap();
        assert!(!again);
    }
}
