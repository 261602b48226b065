//! Dynamic document builder for Hasura-style schemas.
//!
//! [`ExpressionTree`]s describe `where` filters, [`Query`] assembles query and
//! mutation operations around them, and the [`rows`] helpers cover the common
//! single-row cases.
//!
//! ```ignore
//! use horizon_lattice_graphql::builder::rows;
//!
//! let document = rows::get_row("users", 42, ["name", "age"])?;
//! let rows: rows::QueryRows = client.execute(&cancel, document).await?;
//! ```

mod expression;
mod query;
pub mod rows;

pub use expression::{ExpressionTree, ExpressionTreeBuilder, literal};
pub use query::{
    DeleteQuery, GetQuery, GetTable, InsertQuery, MutationQuery, Query, Selection, UpdateQuery,
    Variable,
};
