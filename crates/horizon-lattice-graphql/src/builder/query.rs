//! Query and mutation assembly with inferred variable types.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::expression::ExpressionTree;
use crate::document::{Document, OperationType};
use crate::error::{Error, Result};

/// A variable value with a known GraphQL scalar type.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    /// `Int!`
    Int(i64),
    /// `Boolean!`
    Boolean(bool),
    /// `uuid!`
    Uuid(Uuid),
    /// `String!`
    Text(String),
    /// A value with no scalar mapping. Fails the build.
    Unsupported(Value),
}

impl Variable {
    /// The GraphQL type declared for this variable.
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            Self::Int(_) => Some("Int!"),
            Self::Boolean(_) => Some("Boolean!"),
            Self::Uuid(_) => Some("uuid!"),
            Self::Text(_) => Some("String!"),
            Self::Unsupported(_) => None,
        }
    }

    /// The JSON form sent in the `variables` object.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Uuid(id) => Value::String(id.to_string()),
            Self::Text(s) => Value::String(s.clone()),
            Self::Unsupported(value) => value.clone(),
        }
    }
}

impl Serialize for Variable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Uuid(id) => id.serialize(serializer),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Unsupported(value) => value.serialize(serializer),
        }
    }
}

macro_rules! int_variable {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Variable {
                fn from(value: $ty) -> Self {
                    Self::Int(i64::from(value))
                }
            }
        )*
    };
}

int_variable!(i8, i16, i32, i64, u8, u16, u32);

/// Integers wider than `Int!` can hold are unsupported and fail the build.
macro_rules! wide_int_variable {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Variable {
                fn from(value: $ty) -> Self {
                    i64::try_from(value)
                        .map_or_else(|_| Self::Unsupported(Value::String(value.to_string())), Self::Int)
                }
            }
        )*
    };
}

wide_int_variable!(isize, usize, u64, i128, u128);

impl From<bool> for Variable {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Uuid> for Variable {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<String> for Variable {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Variable {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Value> for Variable {
    /// Classify a JSON value. Integers, booleans and strings map to scalars;
    /// everything else is unsupported.
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => Self::Boolean(b),
            Value::String(s) => Self::Text(s),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Unsupported(Value::Number(n)),
            },
            other => Self::Unsupported(other),
        }
    }
}

/// One table selection inside a query operation.
#[derive(Debug, Clone, Default)]
pub struct GetTable {
    /// Table name.
    pub name: String,
    /// Optional `where` filter.
    pub filter: Option<ExpressionTree>,
    /// Projected fields, in order.
    pub fields: Vec<String>,
}

impl GetTable {
    /// Select from `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Filter rows.
    pub fn filter(mut self, filter: ExpressionTree) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Project fields.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    fn render(&self, out: &mut String) {
        out.push_str(&self.name);
        if let Some(ref filter) = self.filter {
            let _ = write!(out, "(where: {{{filter}}})");
        }
        out.push_str(" {");
        for field in &self.fields {
            out.push(' ');
            out.push_str(field);
        }
        out.push_str(" }");
    }
}

/// A query operation made of table selections.
#[derive(Debug, Clone, Default)]
pub struct GetQuery {
    /// Selections, in order.
    pub tables: Vec<GetTable>,
}

impl GetQuery {
    /// An empty query operation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table selection.
    pub fn table(mut self, table: GetTable) -> Self {
        self.tables.push(table);
        self
    }

    fn render(&self) -> String {
        let mut out = String::from("{");
        for table in &self.tables {
            out.push(' ');
            table.render(&mut out);
        }
        out.push_str(" }");
        out
    }
}

/// What a mutation block selects in its response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Columns of the affected rows to return.
    pub returning: Vec<String>,
    /// Whether to return the number of affected rows.
    pub affected_rows: bool,
}

impl Selection {
    fn render(&self, out: &mut String) {
        out.push_str(" {");
        if self.affected_rows {
            out.push_str(" affected_rows");
        }
        if !self.returning.is_empty() {
            out.push_str(" returning {");
            for column in &self.returning {
                out.push(' ');
                out.push_str(column);
            }
            out.push_str(" }");
        }
        out.push_str(" }");
    }
}

/// Render `column: $variable` pairs in column order.
fn render_bindings(bindings: &BTreeMap<String, String>, out: &mut String) {
    out.push('{');
    let mut first = true;
    for (column, variable) in bindings {
        if !first {
            out.push_str(", ");
        }
        first = false;
        let _ = write!(out, "{column}: ${variable}");
    }
    out.push('}');
}

/// `insert_<table>(objects: {...})`.
#[derive(Debug, Clone, Default)]
pub struct InsertQuery {
    /// Table name.
    pub table: String,
    /// Column to variable name.
    pub objects: BTreeMap<String, String>,
    /// Response selection.
    pub selection: Selection,
}

impl InsertQuery {
    /// Insert into `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Bind a column to a variable.
    pub fn object(mut self, column: impl Into<String>, variable: impl Into<String>) -> Self {
        self.objects.insert(column.into(), variable.into());
        self
    }

    /// Return the affected row count.
    pub fn affected_rows(mut self) -> Self {
        self.selection.affected_rows = true;
        self
    }

    /// Return columns of the inserted rows.
    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection.returning.extend(columns.into_iter().map(Into::into));
        self
    }

    fn render(&self, out: &mut String) {
        let _ = write!(out, "insert_{}(objects: ", self.table);
        render_bindings(&self.objects, out);
        out.push(')');
        self.selection.render(out);
    }
}

/// `update_<table>(where: {...}, _set: {...})`.
#[derive(Debug, Clone, Default)]
pub struct UpdateQuery {
    /// Table name.
    pub table: String,
    /// Optional `where` filter.
    pub filter: Option<ExpressionTree>,
    /// Column to variable name.
    pub set: BTreeMap<String, String>,
    /// Response selection.
    pub selection: Selection,
}

impl UpdateQuery {
    /// Update rows of `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Filter rows.
    pub fn filter(mut self, filter: ExpressionTree) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set a column from a variable.
    pub fn set(mut self, column: impl Into<String>, variable: impl Into<String>) -> Self {
        self.set.insert(column.into(), variable.into());
        self
    }

    /// Return the affected row count.
    pub fn affected_rows(mut self) -> Self {
        self.selection.affected_rows = true;
        self
    }

    /// Return columns of the updated rows.
    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection.returning.extend(columns.into_iter().map(Into::into));
        self
    }

    fn render(&self, out: &mut String) {
        let _ = write!(out, "update_{}(", self.table);
        if let Some(ref filter) = self.filter {
            let _ = write!(out, "where: {{{filter}}}, ");
        }
        out.push_str("_set: ");
        render_bindings(&self.set, out);
        out.push(')');
        self.selection.render(out);
    }
}

/// `delete_<table>(where: {...})`.
#[derive(Debug, Clone)]
pub struct DeleteQuery {
    /// Table name.
    pub table: String,
    /// Which rows to delete.
    pub filter: ExpressionTree,
    /// Response selection.
    pub selection: Selection,
}

impl DeleteQuery {
    /// Delete rows of `table` matching `filter`.
    pub fn new(table: impl Into<String>, filter: ExpressionTree) -> Self {
        Self {
            table: table.into(),
            filter,
            selection: Selection::default(),
        }
    }

    /// Return the affected row count.
    pub fn affected_rows(mut self) -> Self {
        self.selection.affected_rows = true;
        self
    }

    /// Return columns of the deleted rows.
    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection.returning.extend(columns.into_iter().map(Into::into));
        self
    }

    fn render(&self, out: &mut String) {
        let _ = write!(out, "delete_{}(where: {{{}}})", self.table, self.filter);
        self.selection.render(out);
    }
}

/// A mutation operation. Blocks render as updates, then inserts, then deletes.
#[derive(Debug, Clone, Default)]
pub struct MutationQuery {
    /// `update_<table>` blocks.
    pub updates: Vec<UpdateQuery>,
    /// `insert_<table>` blocks.
    pub inserts: Vec<InsertQuery>,
    /// `delete_<table>` blocks.
    pub deletes: Vec<DeleteQuery>,
}

impl MutationQuery {
    /// An empty mutation operation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an update block.
    pub fn update(mut self, update: UpdateQuery) -> Self {
        self.updates.push(update);
        self
    }

    /// Add an insert block.
    pub fn insert(mut self, insert: InsertQuery) -> Self {
        self.inserts.push(insert);
        self
    }

    /// Add a delete block.
    pub fn delete(mut self, delete: DeleteQuery) -> Self {
        self.deletes.push(delete);
        self
    }

    fn render(&self) -> String {
        let mut out = String::from("{");
        for update in &self.updates {
            out.push(' ');
            update.render(&mut out);
        }
        for insert in &self.inserts {
            out.push(' ');
            insert.render(&mut out);
        }
        for delete in &self.deletes {
            out.push(' ');
            delete.render(&mut out);
        }
        out.push_str(" }");
        out
    }
}

/// A GraphQL document assembled from query and mutation operations.
///
/// Variables are shared by every operation; each operation declares only the
/// variables its body references.
///
/// ```ignore
/// let document = Query::new()
///     .variable("id", 42)
///     .get(GetQuery::new().table(
///         GetTable::new("users")
///             .filter(ExpressionTree::eq("id", "$id"))
///             .fields(["name", "age"]),
///     ))
///     .build()?;
/// assert_eq!(
///     document.query(),
///     "query gq0($id: Int!) { users(where: {id: {_eq: $id}}) { name age } }"
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct Query {
    name: Option<String>,
    variables: BTreeMap<String, Variable>,
    gets: Vec<GetQuery>,
    mutations: Vec<MutationQuery>,
}

impl Query {
    /// An empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix operation names with `name_`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bind a variable.
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Variable>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Bind every variable in `variables`.
    pub fn variables<I, K>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = (K, Variable)>,
        K: Into<String>,
    {
        self.variables
            .extend(variables.into_iter().map(|(name, value)| (name.into(), value)));
        self
    }

    /// Add a query operation.
    pub fn get(mut self, query: GetQuery) -> Self {
        self.gets.push(query);
        self
    }

    /// Add a mutation operation.
    pub fn mutation(mut self, mutation: MutationQuery) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// The bound variables.
    pub fn variable_map(&self) -> &BTreeMap<String, Variable> {
        &self.variables
    }

    /// Render the document text.
    ///
    /// Fails if a referenced variable is not bound or has no scalar type.
    pub fn render(&self) -> Result<String> {
        let gets = self
            .gets
            .iter()
            .enumerate()
            .map(|(i, get)| (OperationType::Query, format!("gq{i}"), get.render()));
        let mutations = self
            .mutations
            .iter()
            .enumerate()
            .map(|(i, mutation)| (OperationType::Mutation, format!("mq{i}"), mutation.render()));

        let mut operations = Vec::new();
        for (kind, name, body) in gets.chain(mutations) {
            operations.push(self.wrap(kind, &name, &body)?);
        }
        Ok(operations.join("\n"))
    }

    /// Render the document and bind its variables.
    pub fn build(&self) -> Result<Document> {
        let text = self.render()?;
        tracing::debug!(target: "horizon_lattice_graphql::builder", "Built document: {}", text);
        let variables: Map<String, Value> = self
            .variables
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Ok(Document::new(text).variables_map(variables))
    }

    fn wrap(&self, kind: OperationType, name: &str, body: &str) -> Result<String> {
        for referenced in referenced_variables(body) {
            if !self.variables.contains_key(referenced) {
                return Err(Error::UndeclaredVariable(referenced.to_owned()));
            }
        }

        let mut declarations = Vec::new();
        for (variable, value) in &self.variables {
            if !references(body, variable) {
                continue;
            }
            let Some(type_name) = value.type_name() else {
                tracing::warn!(
                    target: "horizon_lattice_graphql::builder",
                    "Could not identify type of variable `{}` ({:?})", variable, value
                );
                return Err(Error::TypeInference {
                    name: variable.clone(),
                    value: value.to_json().to_string(),
                });
            };
            declarations.push(format!("${variable}: {type_name}"));
        }

        let mut out = String::from(kind.keyword());
        out.push(' ');
        if let Some(ref prefix) = self.name {
            out.push_str(prefix);
            out.push('_');
        }
        out.push_str(name);
        if !declarations.is_empty() {
            let _ = write!(out, "({})", declarations.join(", "));
        }
        out.push(' ');
        out.push_str(body);
        Ok(out)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Whether `body` contains `$name` not followed by another identifier character.
pub(crate) fn references(body: &str, name: &str) -> bool {
    let needle = format!("${name}");
    body.match_indices(&needle).any(|(start, _)| {
        !body[start + needle.len()..]
            .chars()
            .next()
            .is_some_and(is_ident_char)
    })
}

/// Every `$name` token in `body`, in order of appearance.
fn referenced_variables(body: &str) -> impl Iterator<Item = &str> {
    body.match_indices('$').filter_map(move |(start, _)| {
        let rest = &body[start + 1..];
        let end = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        (end > 0).then(|| &rest[..end])
    })
}
