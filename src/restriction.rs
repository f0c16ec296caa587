//! Restriction trees.
//!
//! A restriction describes which items match a query. Besides the usual
//! boolean combinators and property comparisons, a node may refer to the filter
//! of an earlier query on the server by id ([`Restriction::ReuseWhere`]).
//!
//! Compiling a tree yields a filter string that is stored per query so later
//! queries can reuse it; [`expand`] replaces reuse nodes with the referenced
//! tree before the query reaches a backend.
use std::fmt::Write;

use bincode::{Decode, Encode};
use thiserror::Error;

use crate::{props::PropertyId, rowset::Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum RelOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl RelOp {
    fn symbol(self) -> &'static str {
        match self {
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
            RelOp::Eq => "=",
            RelOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Restriction {
    And(Vec<Restriction>),
    Or(Vec<Restriction>),
    Not(Box<Restriction>),
    Property {
        property: PropertyId,
        op: RelOp,
        value: Value,
    },
    Content {
        property: PropertyId,
        phrase: String,
    },
    /// Reuse the filter built for another query.
    ReuseWhere(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SortKey {
    pub property: PropertyId,
    pub descending: bool,
}

/// Source of previously compiled filters.
pub trait WhereLookup {
    fn filter(&self, where_id: u32) -> Option<&str>;
    fn restriction(&self, where_id: u32) -> Option<&Restriction>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("restriction reuses the filter of query {0}, which no longer exists")]
pub struct StaleWhereId(pub u32);

pub fn placeholder(where_id: u32) -> String {
    format!("no filter available for id {where_id}")
}

fn render_value(value: &Value, out: &mut String) {
    let _ = match value {
        Value::Str(s) => write!(out, "'{}'", s.replace('\'', "''")),
        Value::StrVector(items) => write!(out, "{items:?}"),
        Value::Empty => write!(out, "NULL"),
        Value::Bool(b) => write!(out, "{b}"),
        Value::I1(v) => write!(out, "{v}"),
        Value::UI1(v) => write!(out, "{v}"),
        Value::I2(v) => write!(out, "{v}"),
        Value::UI2(v) => write!(out, "{v}"),
        Value::I4(v) => write!(out, "{v}"),
        Value::UI4(v) => write!(out, "{v}"),
        Value::I8(v) => write!(out, "{v}"),
        Value::UI8(v) | Value::FileTime(v) => write!(out, "{v}"),
        Value::R4(v) => write!(out, "{v}"),
        Value::R8(v) | Value::Date(v) => write!(out, "{v}"),
    };
}

fn render_into(restriction: &Restriction, lookup: &dyn WhereLookup, out: &mut String) {
    match restriction {
        Restriction::And(children) | Restriction::Or(children) => {
            let joiner = if matches!(restriction, Restriction::And(_)) {
                " AND "
            } else {
                " OR "
            };
            if children.is_empty() {
                out.push_str(if joiner == " AND " { "TRUE" } else { "FALSE" });
                return;
            }
            out.push('(');
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    out.push_str(joiner);
                }
                render_into(child, lookup, out);
            }
            out.push(')');
        }
        Restriction::Not(inner) => {
            out.push_str("NOT ");
            render_into(inner, lookup, out);
        }
        Restriction::Property {
            property,
            op,
            value,
        } => {
            let _ = write!(out, "{property} {} ", op.symbol());
            render_value(value, out);
        }
        Restriction::Content { property, phrase } => {
            let _ = write!(out, "CONTAINS({property}, '{}')", phrase.replace('\'', "''"));
        }
        Restriction::ReuseWhere(id) => match lookup.filter(*id) {
            Some(filter) => out.push_str(filter),
            None => out.push_str(&placeholder(*id)),
        },
    }
}

/// Compiles a restriction into its filter string. Reuse nodes pointing at
/// missing queries render as a placeholder rather than failing.
pub fn render(restriction: &Restriction, lookup: &dyn WhereLookup) -> String {
    let mut out = String::new();
    render_into(restriction, lookup, &mut out);
    out
}

/// Replaces every reuse node with the restriction it refers to.
pub fn expand(
    restriction: &Restriction,
    lookup: &dyn WhereLookup,
) -> Result<Restriction, StaleWhereId> {
    Ok(match restriction {
        Restriction::And(children) => Restriction::And(
            children
                .iter()
                .map(|c| expand(c, lookup))
                .collect::<Result<_, _>>()?,
        ),
        Restriction::Or(children) => Restriction::Or(
            children
                .iter()
                .map(|c| expand(c, lookup))
                .collect::<Result<_, _>>()?,
        ),
        Restriction::Not(inner) => Restriction::Not(Box::new(expand(inner, lookup)?)),
        Restriction::ReuseWhere(id) => lookup
            .restriction(*id)
            .cloned()
            .ok_or(StaleWhereId(*id))?,
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::props;

    use super::*;

    #[derive(Default)]
    struct Filters(HashMap<u32, (String, Restriction)>);

    impl WhereLookup for Filters {
        fn filter(&self, where_id: u32) -> Option<&str> {
            self.0.get(&where_id).map(|(f, _)| f.as_str())
        }

        fn restriction(&self, where_id: u32) -> Option<&Restriction> {
            self.0.get(&where_id).map(|(_, r)| r)
        }
    }

    fn big_files() -> Restriction {
        Restriction::Property {
            property: props::SIZE,
            op: RelOp::Gt,
            value: Value::UI8(1024),
        }
    }

    #[test]
    fn renders_tree() {
        let tree = Restriction::And(vec![
            big_files(),
            Restriction::Not(Box::new(Restriction::Content {
                property: props::FILE_NAME,
                phrase: "it's".into(),
            })),
        ]);
        assert_eq!(
            render(&tree, &Filters::default()),
            "(System.Size > 1024 AND NOT CONTAINS(System.FileName, 'it''s'))"
        );
    }

    #[test]
    fn reuse_renders_stored_filter() {
        let mut filters = Filters::default();
        filters
            .0
            .insert(3, ("System.Size > 1024".into(), big_files()));
        let tree = Restriction::Or(vec![Restriction::ReuseWhere(3), Restriction::ReuseWhere(4)]);

        assert_eq!(
            render(&tree, &filters),
            "(System.Size > 1024 OR no filter available for id 4)"
        );
    }

    #[test]
    fn expand_substitutes_reused_tree() {
        let mut filters = Filters::default();
        filters.0.insert(3, (String::new(), big_files()));
        let tree = Restriction::Not(Box::new(Restriction::ReuseWhere(3)));

        assert_eq!(
            expand(&tree, &filters),
            Ok(Restriction::Not(Box::new(big_files())))
        );
    }

    #[test]
    fn expand_reports_stale_reference() {
        let tree = Restriction::And(vec![big_files(), Restriction::ReuseWhere(9)]);
        assert_eq!(expand(&tree, &Filters::default()), Err(StaleWhereId(9)));
    }
}
