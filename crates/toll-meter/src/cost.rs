//! Cost evaluation against a nested cost table.
//!
//! A cost table is a tree that mirrors the structural shape of a module:
//! keys name sections, fields, and opcodes, leaves are integer costs, and
//! any interior node may carry a `DEFAULT` that unlisted children inherit.
//! [`evaluate`] walks a [`Shape`] of the value being priced against that
//! tree:
//!
//! - a sequence costs the sum of its elements against the same table;
//! - a record costs the sum of its fields that the table lists, each
//!   priced against the matching subtree;
//! - a scalar costs its own entry, or the inherited default.
//!
//! Missing table entries are never an error; they price as the inherited
//! default, which bottoms out at zero.

use std::collections::BTreeMap;

use serde::Deserialize;
use toll_module::{FuncType, LocalEntry};

/// Key carrying the inherited default cost inside a table node.
pub const DEFAULT_KEY: &str = "DEFAULT";

/// One node of a cost table: a leaf cost or a nested table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CostNode {
    Cost(u64),
    Table(BTreeMap<String, CostNode>),
}

/// The root of a cost table.
///
/// Recognized top-level keys: `memory.maximum`, `type.params`,
/// `type.return_type`, `import`, `code.locals`, `code.code`, `data`,
/// `start`.  Unknown keys are carried but never consulted.
pub type CostTable = CostNode;

impl CostNode {
    /// Child node for `key`, if this node is a table that lists it.
    pub fn get(&self, key: &str) -> Option<&CostNode> {
        match self {
            Self::Table(entries) => entries.get(key),
            Self::Cost(_) => None,
        }
    }

    /// Leaf cost, if this node is one.
    pub fn scalar(&self) -> Option<u64> {
        match self {
            Self::Cost(cost) => Some(*cost),
            Self::Table(_) => None,
        }
    }
}

/// Structural value being priced.
#[derive(Debug, Clone)]
pub enum Shape<'a> {
    Scalar(&'a str),
    Num(u64),
    Seq(Vec<Shape<'a>>),
    Record(Vec<(&'static str, Shape<'a>)>),
}

/// Price `value` against `table`, with `inherited` as the default cost for
/// anything the table does not list.
pub fn evaluate(value: &Shape<'_>, table: Option<&CostNode>, inherited: u64) -> u64 {
    let fallback = table
        .and_then(|t| t.get(DEFAULT_KEY))
        .and_then(CostNode::scalar)
        .unwrap_or(inherited);

    match value {
        Shape::Seq(items) => items
            .iter()
            .map(|item| evaluate(item, table, inherited))
            .sum(),
        Shape::Record(fields) => fields
            .iter()
            .map(|(name, field)| match table.and_then(|t| t.get(name)) {
                Some(sub) => evaluate(field, Some(sub), fallback),
                None => 0,
            })
            .sum(),
        Shape::Scalar(key) => table
            .and_then(|t| t.get(key))
            .and_then(CostNode::scalar)
            .unwrap_or(fallback),
        Shape::Num(value) => table
            .and_then(|t| t.get(&value.to_string()))
            .and_then(CostNode::scalar)
            .unwrap_or(fallback),
    }
}

/// Shape of a function signature, priced against the `type` subtree.
pub fn signature_shape(ty: &FuncType) -> Shape<'static> {
    let mut fields = vec![
        ("form", Shape::Scalar("func")),
        (
            "params",
            Shape::Seq(ty.params.iter().map(|p| Shape::Scalar(p.name())).collect()),
        ),
    ];
    if let Some(ret) = ty.return_type {
        fields.push(("return_type", Shape::Scalar(ret.name())));
    }
    Shape::Record(fields)
}

/// Shape of a body's local declarations, priced against the `code.locals`
/// subtree.
pub fn locals_shape(locals: &[LocalEntry]) -> Shape<'static> {
    Shape::Seq(
        locals
            .iter()
            .map(|local| {
                Shape::Record(vec![
                    ("count", Shape::Num(u64::from(local.count))),
                    ("type", Shape::Scalar(local.ty.name())),
                ])
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use toll_module::TypeCode;

    fn table(json: &str) -> CostNode {
        serde_json::from_str(json).expect("valid cost table")
    }

    #[test]
    fn scalar_prefers_listed_cost_over_default() {
        let t = table(r#"{"add": 3, "DEFAULT": 1}"#);
        assert_eq!(evaluate(&Shape::Scalar("add"), Some(&t), 0), 3);
        assert_eq!(evaluate(&Shape::Scalar("sub"), Some(&t), 0), 1);
    }

    #[test]
    fn scalar_falls_back_to_inherited_without_default() {
        let t = table(r#"{"add": 3}"#);
        assert_eq!(evaluate(&Shape::Scalar("sub"), Some(&t), 7), 7);
        assert_eq!(evaluate(&Shape::Scalar("sub"), None, 7), 7);
    }

    #[test]
    fn empty_sequence_costs_zero() {
        let t = table(r#"{"DEFAULT": 5}"#);
        assert_eq!(evaluate(&Shape::Seq(vec![]), Some(&t), 0), 0);
    }

    #[test]
    fn sequence_sums_elements() {
        let t = table(r#"{"i32": 2, "DEFAULT": 1}"#);
        let seq = Shape::Seq(vec![
            Shape::Scalar("i32"),
            Shape::Scalar("i64"),
            Shape::Scalar("i32"),
        ]);
        assert_eq!(evaluate(&seq, Some(&t), 0), 5);
    }

    #[test]
    fn record_skips_unlisted_fields() {
        let t = table(r#"{"params": {"DEFAULT": 10}}"#);
        let record = Shape::Record(vec![
            ("form", Shape::Scalar("func")),
            ("params", Shape::Seq(vec![Shape::Scalar("i32")])),
        ]);
        // `form` is absent from the table and contributes nothing.
        assert_eq!(evaluate(&record, Some(&t), 0), 10);
    }

    #[test]
    fn record_fields_inherit_the_local_default() {
        let t = table(r#"{"DEFAULT": 4, "params": {}}"#);
        let record = Shape::Record(vec![(
            "params",
            Shape::Seq(vec![Shape::Scalar("i32"), Shape::Scalar("f64")]),
        )]);
        // the `params` subtree has no DEFAULT of its own, so its elements
        // inherit the enclosing node's DEFAULT of 4
        assert_eq!(evaluate(&record, Some(&t), 0), 8);
    }

    #[test]
    fn signature_shape_prices_params_and_return() {
        let t = table(r#"{"params": {"DEFAULT": 2}, "return_type": {"DEFAULT": 3}}"#);
        let ty = FuncType {
            params: vec![TypeCode::I32, TypeCode::I64],
            return_type: Some(TypeCode::I32),
        };
        assert_eq!(evaluate(&signature_shape(&ty), Some(&t), 0), 7);

        let no_ret = FuncType {
            params: vec![],
            return_type: None,
        };
        assert_eq!(evaluate(&signature_shape(&no_ret), Some(&t), 0), 0);
    }

    #[test]
    fn locals_price_only_listed_fields() {
        let t = table(r#"{"type": {"i64": 5}}"#);
        let locals = vec![
            LocalEntry {
                count: 2,
                ty: TypeCode::I64,
            },
            LocalEntry {
                count: 1,
                ty: TypeCode::F32,
            },
        ];
        // each entry prices its `type` field; `count` is unlisted
        assert_eq!(evaluate(&locals_shape(&locals), Some(&t), 0), 5);
    }
}
