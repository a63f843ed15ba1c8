//! In-memory schema cache keyed by relationID.
//!
//! PostgreSQL sends a Relation message before the first row message that
//! references a given relation, and may re-send one after a schema change;
//! the cache is an overwriting map, not append-only, so a later Relation
//! message's column order and types fully supersede the earlier ones.

use std::collections::{HashMap, HashSet};

use pgcdc_core::{RowBody, SchemaError, Value};

use super::pgoutput::{ColumnInfo, RelationMessage, ReplicaIdentity, TupleData, TupleField};
use super::type_decode::decode_value;

/// Schema snapshot of one source relation at the moment the server
/// announced it.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub relation_id: u32,
    pub schema_name: String,
    pub table_name: String,
    pub replica_identity: ReplicaIdentity,
    pub columns: Vec<ColumnInfo>,
}

impl From<&RelationMessage> for RelationDescriptor {
    fn from(msg: &RelationMessage) -> Self {
        Self {
            relation_id: msg.relation_id,
            schema_name: msg.namespace.clone(),
            table_name: msg.name.clone(),
            replica_identity: msg.replica_identity,
            columns: msg.columns.clone(),
        }
    }
}

/// `RelationID -> RelationDescriptor`, the dynamic catalog that keeps
/// tuple decoding coherent with the stream.
#[derive(Debug, Default)]
pub struct RelationSet {
    relations: HashMap<u32, RelationDescriptor>,
}

impl RelationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by relationID. Replacement is total.
    pub fn add(&mut self, msg: &RelationMessage) {
        self.relations.insert(msg.relation_id, msg.into());
    }

    /// Must return what the most recent Relation message announced;
    /// absence is a [`SchemaError`] for any caller decoding a row.
    pub fn lookup(&self, relation_id: u32) -> Result<&RelationDescriptor, SchemaError> {
        self.relations
            .get(&relation_id)
            .ok_or(SchemaError { relation_id })
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Pair columns positionally with the tuple, then type-decode each
    /// present field. Unchanged-TOAST fields are omitted from the body
    /// rather than surfaced as null.
    pub fn decode(
        &self,
        relation_id: u32,
        tuple: &TupleData,
    ) -> Result<RowBody, pgcdc_core::CdcError> {
        let (body, _) = self.decode_with_toasted(relation_id, tuple)?;
        Ok(body)
    }

    /// Like [`decode`](Self::decode), but also reports which columns were
    /// declared on the relation yet absent from the tuple because the
    /// server omitted an unchanged TOASTed value. Callers diffing two
    /// decoded bodies need this set to tell "the column is absent because
    /// it didn't change" from "the column is absent because it changed to
    /// absent" — the two are indistinguishable from `RowBody` alone.
    pub fn decode_with_toasted(
        &self,
        relation_id: u32,
        tuple: &TupleData,
    ) -> Result<(RowBody, HashSet<String>), pgcdc_core::CdcError> {
        let descriptor = self.lookup(relation_id)?;
        let mut body = RowBody::new();
        let mut unchanged_toast = HashSet::new();

        for (col, field) in descriptor.columns.iter().zip(tuple.columns.iter()) {
            match field {
                TupleField::UnchangedToast => {
                    unchanged_toast.insert(col.name.clone());
                }
                TupleField::Null => {
                    body.insert(col.name.clone(), Value::Null);
                }
                TupleField::Text(text) => {
                    let value = decode_value(&col.name, col.type_oid, text)?;
                    body.insert(col.name.clone(), value);
                }
            }
        }

        Ok((body, unchanged_toast))
    }

    /// Names where `new[c] != old[c]`, in the relation's column-declaration
    /// order so the result is deterministic, never hash order. Columns the
    /// server reported as unchanged-and-TOASTed in the new tuple are
    /// excluded from the comparison outright rather than compared by
    /// presence, since their absence from `new` never means they changed.
    pub fn changed_columns(
        &self,
        relation_id: u32,
        new: &RowBody,
        old: &RowBody,
        unchanged_toast: &HashSet<String>,
    ) -> Vec<String> {
        let Ok(descriptor) = self.lookup(relation_id) else {
            return Vec::new();
        };

        descriptor
            .columns
            .iter()
            .filter(|col| !unchanged_toast.contains(&col.name))
            .filter(|col| new.get(&col.name) != old.get(&col.name))
            .map(|col| col.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::pgoutput::ColumnInfo;

    fn users_relation() -> RelationMessage {
        RelationMessage {
            relation_id: 16384,
            namespace: "public".to_string(),
            name: "users".to_string(),
            replica_identity: ReplicaIdentity::Default,
            columns: vec![
                ColumnInfo {
                    flags: 1,
                    name: "id".to_string(),
                    type_oid: 23,
                    type_modifier: -1,
                },
                ColumnInfo {
                    flags: 0,
                    name: "name".to_string(),
                    type_oid: 25,
                    type_modifier: -1,
                },
            ],
        }
    }

    #[test]
    fn add_and_lookup() {
        let mut set = RelationSet::new();
        set.add(&users_relation());

        let descriptor = set.lookup(16384).unwrap();
        assert_eq!(descriptor.schema_name, "public");
        assert_eq!(descriptor.table_name, "users");
    }

    #[test]
    fn lookup_miss_is_schema_error() {
        let set = RelationSet::new();
        assert!(set.lookup(99999).is_err());
    }

    #[test]
    fn later_relation_message_fully_replaces_earlier_one() {
        let mut set = RelationSet::new();
        set.add(&users_relation());

        let mut changed = users_relation();
        changed.columns.pop();
        set.add(&changed);

        assert_eq!(set.lookup(16384).unwrap().columns.len(), 1);
    }

    #[test]
    fn decode_pairs_columns_positionally_and_skips_unchanged_toast() {
        let mut set = RelationSet::new();
        set.add(&users_relation());

        let tuple = TupleData {
            columns: vec![
                TupleField::Text("1".to_string()),
                TupleField::UnchangedToast,
            ],
        };

        let body = set.decode(16384, &tuple).unwrap();
        assert_eq!(body.get("id"), Some(&Value::Int64(1)));
        assert!(!body.contains_key("name"));
    }

    #[test]
    fn decode_unknown_relation_is_schema_error() {
        let set = RelationSet::new();
        let tuple = TupleData { columns: vec![] };
        assert!(set.decode(99999, &tuple).is_err());
    }

    #[test]
    fn changed_columns_is_in_declaration_order_not_hash_order() {
        let mut set = RelationSet::new();
        set.add(&users_relation());

        let mut old = RowBody::new();
        old.insert("id".to_string(), Value::Int64(1));
        old.insert("name".to_string(), Value::Text("a".to_string()));

        let mut new = RowBody::new();
        new.insert("id".to_string(), Value::Int64(2));
        new.insert("name".to_string(), Value::Text("b".to_string()));

        assert_eq!(
            set.changed_columns(16384, &new, &old, &HashSet::new()),
            vec!["id", "name"]
        );
    }

    #[test]
    fn changed_columns_empty_when_rows_identical() {
        let mut set = RelationSet::new();
        set.add(&users_relation());

        let mut row = RowBody::new();
        row.insert("id".to_string(), Value::Int64(1));
        row.insert("name".to_string(), Value::Text("a".to_string()));

        assert!(set
            .changed_columns(16384, &row, &row, &HashSet::new())
            .is_empty());
    }

    #[test]
    fn changed_columns_ignores_unchanged_toasted_column() {
        let mut set = RelationSet::new();
        set.add(&users_relation());

        // Old tuple has the full row (REPLICA IDENTITY FULL); new tuple
        // omits "name" because it's TOASTed and didn't change.
        let mut old = RowBody::new();
        old.insert("id".to_string(), Value::Int64(1));
        old.insert("name".to_string(), Value::Text("a".to_string()));

        let new_tuple = TupleData {
            columns: vec![TupleField::Text("1".to_string()), TupleField::UnchangedToast],
        };
        let (new, unchanged_toast) = set.decode_with_toasted(16384, &new_tuple).unwrap();
        assert!(!new.contains_key("name"));

        assert!(set
            .changed_columns(16384, &new, &old, &unchanged_toast)
            .is_empty());
    }
}
