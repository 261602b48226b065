//! Request body encoding: a JSON document or a multipart upload form.

use http::HeaderValue;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::document::FileAttachment;
use crate::error::Result;
use crate::log::variables_text;

/// Content type of JSON request bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Serialize)]
struct JsonBody<'a> {
    query: &'a str,
    variables: &'a Map<String, Value>,
}

/// A request body ready to attach to a POST.
pub(crate) enum EncodedBody {
    Json(Vec<u8>),
    Multipart(Form),
}

/// The encoded body together with what the transport logs about it.
pub(crate) struct EncodedRequest {
    pub body: EncodedBody,
    pub content_type: HeaderValue,
    /// Variables exactly as serialized into the body.
    pub variables: String,
    pub file_count: usize,
}

/// Encode a document body.
///
/// Without attachments the body is `{"query": ..., "variables": {...}}`. With
/// attachments it is a multipart form holding a `query` part, a `variables`
/// part when any variables are bound, and one file part per attachment in
/// order. Attachment content is moved into the form without copying.
pub(crate) fn encode(
    query: &str,
    variables: &Map<String, Value>,
    files: Vec<FileAttachment>,
) -> Result<EncodedRequest> {
    let variables_json = variables_text(variables);

    if files.is_empty() {
        let body = serde_json::to_vec(&JsonBody { query, variables })?;
        return Ok(EncodedRequest {
            body: EncodedBody::Json(body),
            content_type: HeaderValue::from_static(JSON_CONTENT_TYPE),
            variables: variables_json,
            file_count: 0,
        });
    }

    let file_count = files.len();
    let mut form = Form::new().text("query", query.to_owned());
    if !variables.is_empty() {
        form = form.text("variables", variables_json.clone());
    }
    for file in files {
        let length = file.content.len() as u64;
        let part = Part::stream_with_length(reqwest::Body::from(file.content), length)
            .file_name(file.filename);
        form = form.part(file.field, part);
    }

    let content_type =
        HeaderValue::try_from(format!("multipart/form-data; boundary={}", form.boundary()))?;

    Ok(EncodedRequest {
        body: EncodedBody::Multipart(form),
        content_type,
        variables: variables_json,
        file_count,
    })
}
