//! GraphQL transport for Horizon Lattice.
//!
//! This crate sends GraphQL documents to a server and decodes the results:
//!
//! - **HTTP**: one-shot queries and mutations as JSON, or as multipart uploads
//!   when files are attached
//! - **Subscriptions**: live results over WebSocket using the `graphql-ws`
//!   protocol
//! - **Builder**: `where` filters and query/mutation documents for
//!   Hasura-style schemas, with variable types inferred from their values
//!
//! # Queries and Mutations
//!
//! ```ignore
//! use horizon_lattice_graphql::{CancellationToken, Document, GraphQLClient};
//!
//! let client = GraphQLClient::builder("https://api.example.com/v1/graphql")
//!     .admin_secret("secret")
//!     .build()?;
//!
//! let cancel = CancellationToken::new();
//! let document = Document::new("query ($id: Int!) { users(where: {id: {_eq: $id}}) { name } }")
//!     .variable("id", 42);
//! let users: Users = client.execute(&cancel, document).await?;
//! ```
//!
//! Only the first server-reported error is returned by `execute`; use
//! `execute_response` to see all of them.
//!
//! ## File Uploads
//!
//! ```ignore
//! let document = Document::new("mutation { upload }")
//!     .attachment(FileAttachment::from_path("file", "report.pdf").await?);
//! client.run(&cancel, document).await?;
//! ```
//!
//! # Subscriptions
//!
//! ```ignore
//! let mut subscription = client.spawn_subscription::<Users>(
//!     Document::new("subscription { users { id name } }"),
//! );
//!
//! while let Some(event) = subscription.next().await {
//!     if event.has_new_data {
//!         println!("{:?}", subscription.snapshot());
//!     }
//!     if let Some(error) = event.error {
//!         eprintln!("{error}");
//!     }
//!     if event.closing {
//!         break;
//!     }
//! }
//! ```
//!
//! # Building Documents
//!
//! ```ignore
//! use horizon_lattice_graphql::builder::{ExpressionTree, GetQuery, GetTable, Query};
//!
//! let document = Query::new()
//!     .variable("id", 42)
//!     .get(GetQuery::new().table(
//!         GetTable::new("users")
//!             .filter(ExpressionTree::eq("id", "$id"))
//!             .fields(["name", "age"]),
//!     ))
//!     .build()?;
//! ```
//!
//! # Logging
//!
//! The client reports requests, responses and subscription progress to a
//! [`TransportLog`]. The default, [`TracingLog`], emits `tracing` events under
//! the `horizon_lattice_graphql::http` and `horizon_lattice_graphql::subscription`
//! targets.

pub mod builder;
mod cancel;
mod client;
mod document;
mod encode;
mod error;
pub mod event;
mod log;
pub mod protocol;
mod response;
mod subscription;

pub use cancel::CancellationToken;
pub use client::{
    ADMIN_SECRET_HEADER, ClientConfig, ENV_ADMIN_SECRET, ENV_URL, GraphQLClient,
    GraphQLClientBuilder,
};
pub use document::{Document, FileAttachment, OperationType};
pub use encode::JSON_CONTENT_TYPE;
pub use error::{Error, ErrorKind, Result};
pub use log::{LogEvent, NoopLog, TracingLog, TransportLog};
pub use response::{Envelope, GraphQLError, GraphQLLocation, PathSegment};
pub use subscription::{Subscription, SubscriptionEvent, SubscriptionState};
