//! Single-row helpers keyed by an `id` column.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::expression::ExpressionTree;
use super::query::{
    DeleteQuery, GetQuery, GetTable, InsertQuery, MutationQuery, Query, UpdateQuery, Variable,
};
use crate::document::Document;
use crate::error::Result;

/// Response shape of a query: table name to selected rows.
pub type QueryRows = BTreeMap<String, Vec<Map<String, Value>>>;

/// Response shape of a mutation: `insert_<table>` etc. to its result.
pub type MutationRows = BTreeMap<String, MutationResult>;

/// The result of one mutation block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationResult {
    /// Number of rows affected, when requested.
    #[serde(default)]
    pub affected_rows: u64,
    /// Returned columns of the affected rows, when requested.
    #[serde(default)]
    pub returning: Vec<Map<String, Value>>,
}

fn by_id() -> ExpressionTree {
    ExpressionTree::eq("id", "$id")
}

/// Select `columns` of the row of `table` whose `id` is `id`.
pub fn get_row<I, S>(table: &str, id: impl Into<Variable>, columns: I) -> Result<Document>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Query::new()
        .variable("id", id)
        .get(GetQuery::new().table(GetTable::new(table).filter(by_id()).fields(columns)))
        .build()
}

/// Insert one row and return the affected row count.
pub fn insert_row(table: &str, columns: BTreeMap<String, Variable>) -> Result<Document> {
    insert_with(table, columns, None)
}

/// Insert one row and return the given columns of it.
pub fn insert_row_returning<I, S>(
    table: &str,
    columns: BTreeMap<String, Variable>,
    returning: I,
) -> Result<Document>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let returning: Vec<String> = returning.into_iter().map(Into::into).collect();
    insert_with(table, columns, Some(returning))
}

fn insert_with(
    table: &str,
    columns: BTreeMap<String, Variable>,
    returning: Option<Vec<String>>,
) -> Result<Document> {
    let mut insert = columns
        .keys()
        .fold(InsertQuery::new(table), |insert, column| {
            insert.object(column.as_str(), column.as_str())
        });
    insert = match returning {
        Some(returning) => insert.returning(returning),
        None => insert.affected_rows(),
    };
    Query::new()
        .variables(columns)
        .mutation(MutationQuery::new().insert(insert))
        .build()
}

/// Set `set` columns on the row whose `id` is `id`.
///
/// The columns are bound as variables of the same name. An `id` entry in
/// `set` is replaced by `id`.
pub fn update_row(
    table: &str,
    id: impl Into<Variable>,
    set: BTreeMap<String, Variable>,
) -> Result<Document> {
    let update = set
        .keys()
        .fold(UpdateQuery::new(table).filter(by_id()), |update, column| {
            update.set(column.as_str(), column.as_str())
        })
        .affected_rows();
    Query::new()
        .variables(set)
        .variable("id", id)
        .mutation(MutationQuery::new().update(update))
        .build()
}

/// Delete the row whose `id` is `id`.
pub fn delete_row(table: &str, id: impl Into<Variable>) -> Result<Document> {
    Query::new()
        .variable("id", id)
        .mutation(MutationQuery::new().delete(DeleteQuery::new(table, by_id()).affected_rows()))
        .build()
}
