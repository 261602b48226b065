//! Predicate trees for `where`-style filters.
//!
//! A tree is stored as an arena of nodes with the root at index 0. Interior
//! nodes are either logical (`_and`, `_or`, `_not`) or relational (`_eq`,
//! `_gt`, `_in`, ...). A relational node has a field name as its left leaf and
//! a right-hand side as its right leaf. Any node may be nested under a
//! relation name.

use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};

const AND: &str = "_and";
const OR: &str = "_or";
const NOT: &str = "_not";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    value: String,
    left: Option<usize>,
    right: Option<usize>,
    under: Option<String>,
}

/// A validated, immutable predicate tree.
///
/// Rendering is deterministic: formatting the same tree twice yields the
/// same text.
///
/// ```ignore
/// let tree = ExpressionTree::eq("id", "$id");
/// assert_eq!(tree.to_string(), "id: {_eq: $id}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionTree {
    nodes: Vec<Node>,
}

impl ExpressionTree {
    /// A single relational predicate: `field: {op: rhs}`.
    pub fn compare(field: impl Into<String>, op: impl Into<String>, rhs: impl Into<String>) -> Self {
        Self {
            nodes: vec![
                Node {
                    value: op.into(),
                    left: Some(1),
                    right: Some(2),
                    under: None,
                },
                Node {
                    value: field.into(),
                    ..Node::default()
                },
                Node {
                    value: rhs.into(),
                    ..Node::default()
                },
            ],
        }
    }

    /// `field: {_eq: rhs}`.
    pub fn eq(field: impl Into<String>, rhs: impl Into<String>) -> Self {
        Self::compare(field, "_eq", rhs)
    }

    /// Both predicates must hold.
    pub fn and(left: Self, right: Self) -> Self {
        Self::join(AND, left, Some(right))
    }

    /// Either predicate must hold.
    pub fn or(left: Self, right: Self) -> Self {
        Self::join(OR, left, Some(right))
    }

    /// The predicate must not hold.
    pub fn not(inner: Self) -> Self {
        Self::join(NOT, inner, None)
    }

    /// Nest this predicate under a relation.
    pub fn under(mut self, relation: impl Into<String>) -> Self {
        self.nodes[0].under = Some(relation.into());
        self
    }

    fn join(op: &str, left: Self, right: Option<Self>) -> Self {
        let mut nodes = vec![Node {
            value: op.to_owned(),
            ..Node::default()
        }];
        nodes[0].left = Some(graft(&mut nodes, left.nodes));
        if let Some(right) = right {
            nodes[0].right = Some(graft(&mut nodes, right.nodes));
        }
        Self { nodes }
    }

    fn render(&self, index: usize, out: &mut String) {
        let node = &self.nodes[index];
        if let Some(ref relation) = node.under {
            out.push_str(relation);
            out.push_str(": {");
            self.render_bare(index, out);
            out.push('}');
        } else {
            self.render_bare(index, out);
        }
    }

    fn render_bare(&self, index: usize, out: &mut String) {
        let node = &self.nodes[index];
        match node.value.as_str() {
            // Hasura takes `_and`/`_or` operands as a list of filter objects,
            // not the juxtaposed `tag { l r }` form.
            AND | OR => {
                out.push_str(&node.value);
                out.push_str(": [{");
                self.render_child(node.left, out);
                out.push_str("}, {");
                self.render_child(node.right, out);
                out.push_str("}]");
            }
            NOT => {
                out.push_str("_not: {");
                self.render_child(node.left, out);
                out.push('}');
            }
            op => {
                out.push_str(self.leaf(node.left));
                out.push_str(": {");
                out.push_str(op);
                out.push_str(": ");
                out.push_str(self.leaf(node.right));
                out.push('}');
            }
        }
    }

    fn render_child(&self, child: Option<usize>, out: &mut String) {
        if let Some(index) = child {
            self.render(index, out);
        }
    }

    fn leaf(&self, child: Option<usize>) -> &str {
        child.map_or("", |index| self.nodes[index].value.as_str())
    }

    fn validate(&self) -> Result<()> {
        self.validate_node(0)
    }

    fn validate_node(&self, index: usize) -> Result<()> {
        let node = &self.nodes[index];
        let malformed = |what: &str| -> Result<()> {
            Err(Error::MalformedExpression(format!(
                "node `{}` {what}",
                node.value
            )))
        };
        match node.value.as_str() {
            "" => Err(Error::MalformedExpression("node has no value".into())),
            AND | OR => match (node.left, node.right) {
                (Some(left), Some(right)) => {
                    self.validate_node(left)?;
                    self.validate_node(right)
                }
                _ => malformed("needs two operands"),
            },
            NOT => match (node.left, node.right) {
                (Some(left), None) => self.validate_node(left),
                (None, _) => malformed("needs an operand"),
                (Some(_), Some(_)) => malformed("takes a single operand"),
            },
            _ => match (node.left, node.right) {
                (Some(left), Some(right)) => {
                    if !self.is_leaf(left) || !self.is_leaf(right) {
                        return malformed("compares a nested expression");
                    }
                    if self.nodes[left].value.is_empty() {
                        return malformed("has no field name");
                    }
                    if self.nodes[right].value.is_empty() {
                        return malformed("has no right-hand side");
                    }
                    Ok(())
                }
                _ => malformed("needs a field and a right-hand side"),
            },
        }
    }

    fn is_leaf(&self, index: usize) -> bool {
        let node = &self.nodes[index];
        node.left.is_none() && node.right.is_none() && node.under.is_none()
    }
}

/// Append a subtree's arena to `nodes`, returning the new index of its root.
fn graft(nodes: &mut Vec<Node>, subtree: Vec<Node>) -> usize {
    let offset = nodes.len();
    nodes.extend(subtree.into_iter().map(|mut node| {
        node.left = node.left.map(|i| i + offset);
        node.right = node.right.map(|i| i + offset);
        node
    }));
    offset
}

impl fmt::Display for ExpressionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(0, &mut out);
        f.write_str(&out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Left,
    Right,
}

/// Cursor-based builder for an [`ExpressionTree`].
///
/// The cursor starts at the root. `descend_left`/`descend_right` move it to a
/// child of the focused node, creating the child if needed, and `ascend`
/// moves it back. The path from the root is recorded as a sequence of moves,
/// so the builder never holds references into its own arena.
///
/// ```ignore
/// let tree = ExpressionTreeBuilder::new()
///     .value("_and")
///     .descend_left().value("_eq").left_right_value("id", "$id").ascend()
///     .descend_right().value("_gt").left_right_value("age", "18").ascend()
///     .result()?;
/// assert_eq!(tree.to_string(), "_and: [{id: {_eq: $id}}, {age: {_gt: 18}}]");
/// ```
#[derive(Debug, Clone)]
pub struct ExpressionTreeBuilder {
    nodes: Vec<Node>,
    path: Vec<Branch>,
    focus: usize,
    error: Option<String>,
}

impl Default for ExpressionTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionTreeBuilder {
    /// Create a builder holding a single empty root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            path: Vec::new(),
            focus: 0,
            error: None,
        }
    }

    /// Set the focused node's value (an operator, or a leaf value).
    pub fn value(mut self, value: impl Into<String>) -> Self {
        if self.error.is_none() {
            self.nodes[self.focus].value = value.into();
        }
        self
    }

    /// Set the focused node's children to leaves holding `left` and `right`.
    pub fn left_right_value(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        if self.error.is_none() {
            let l = self.child(Branch::Left);
            self.nodes[l].value = left.into();
            let r = self.child(Branch::Right);
            self.nodes[r].value = right.into();
        }
        self
    }

    /// Move the cursor to the focused node's left child.
    pub fn descend_left(self) -> Self {
        self.descend(Branch::Left)
    }

    /// Move the cursor to the focused node's right child.
    pub fn descend_right(self) -> Self {
        self.descend(Branch::Right)
    }

    /// Move the cursor back to the parent of the focused node.
    ///
    /// Ascending from the root is recorded as an error and reported by
    /// [`result`](Self::result).
    pub fn ascend(mut self) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.path.pop().is_none() {
            self.error = Some("cannot ascend above the root".into());
            return self;
        }
        self.focus = self.walk();
        self
    }

    /// Nest the focused node under a relation name.
    pub fn nest_under(mut self, relation: impl Into<String>) -> Self {
        if self.error.is_none() {
            self.nodes[self.focus].under = Some(relation.into());
        }
        self
    }

    /// Validate the tree and return an independent snapshot of it.
    pub fn result(&self) -> Result<ExpressionTree> {
        if let Some(ref error) = self.error {
            return Err(Error::MalformedExpression(error.clone()));
        }
        let tree = ExpressionTree {
            nodes: self.nodes.clone(),
        };
        tree.validate()?;
        Ok(tree)
    }

    fn descend(mut self, branch: Branch) -> Self {
        if self.error.is_none() {
            self.focus = self.child(branch);
            self.path.push(branch);
        }
        self
    }

    /// Index of the focused node's child on `branch`, created if absent.
    fn child(&mut self, branch: Branch) -> usize {
        let existing = match branch {
            Branch::Left => self.nodes[self.focus].left,
            Branch::Right => self.nodes[self.focus].right,
        };
        if let Some(index) = existing {
            return index;
        }
        let index = self.nodes.len();
        self.nodes.push(Node::default());
        let parent = &mut self.nodes[self.focus];
        match branch {
            Branch::Left => parent.left = Some(index),
            Branch::Right => parent.right = Some(index),
        }
        index
    }

    /// Follow the recorded path from the root.
    fn walk(&self) -> usize {
        self.path.iter().fold(0, |index, branch| {
            let node = &self.nodes[index];
            match branch {
                Branch::Left => node.left,
                Branch::Right => node.right,
            }
            .unwrap_or(index)
        })
    }
}

/// Format a JSON value as a GraphQL literal.
///
/// Strings are quoted and escaped, objects use unquoted keys.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let fields: Vec<String> = map
                .iter()
                .map(|(key, value)| format!("{key}: {}", literal(value)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}
