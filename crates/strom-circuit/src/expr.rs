use std::fmt;

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// A symbolic expression tree for per-element nonlinear equations.
///
/// The only structure the circuit core interprets is `IndexRef` on the
/// names `q`, `J` and `res`; every other node is carried through
/// unchanged. An element's equation block assigns the residual `res[i]`
/// and the Jacobian `J[i, j]` as a function of the nonlinear variables
/// `q[k]`, all in element-local numbering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Integer(i64),
    Number(f64),
    Var(String),
    Call { head: String, args: Vec<Expr> },
    IndexRef { name: String, indices: Vec<Expr> },
    Block(Vec<Expr>),
    Scope(Box<Expr>),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn call(head: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            head: head.into(),
            args,
        }
    }

    pub fn index_ref(name: impl Into<String>, indices: Vec<Expr>) -> Self {
        Expr::IndexRef {
            name: name.into(),
            indices,
        }
    }

    /// An assignment statement, `lhs = rhs`.
    pub fn assign(lhs: Expr, rhs: Expr) -> Self {
        Expr::call("=", vec![lhs, rhs])
    }

    pub fn block(stmts: Vec<Expr>) -> Self {
        Expr::Block(stmts)
    }

    /// The empty equation block of an element without nonlinearities.
    pub fn empty() -> Self {
        Expr::Block(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Expr::Block(stmts) if stmts.is_empty())
    }

    /// Rebuilds the tree top-down. `f` returning `Some(replacement)`
    /// substitutes the node without descending further; `None` keeps the
    /// node and recurses into its children.
    pub fn rewrite<F>(&self, f: &mut F) -> Result<Expr>
    where
        F: FnMut(&Expr) -> Result<Option<Expr>>,
    {
        if let Some(replacement) = f(self)? {
            return Ok(replacement);
        }
        let rewritten = match self {
            Expr::Integer(_) | Expr::Number(_) | Expr::Var(_) => self.clone(),
            Expr::Call { head, args } => Expr::Call {
                head: head.clone(),
                args: args.iter().map(|a| a.rewrite(f)).collect::<Result<_>>()?,
            },
            Expr::IndexRef { name, indices } => Expr::IndexRef {
                name: name.clone(),
                indices: indices.iter().map(|i| i.rewrite(f)).collect::<Result<_>>()?,
            },
            Expr::Block(stmts) => {
                Expr::Block(stmts.iter().map(|s| s.rewrite(f)).collect::<Result<_>>()?)
            }
            Expr::Scope(body) => Expr::Scope(Box::new(body.rewrite(f)?)),
        };
        Ok(rewritten)
    }
}

/// Index offsets for one of the nonlinear reference names. `q` is
/// indexed by column, `res` by row, `J` by row then column.
fn ref_offsets(name: &str, row_offset: i64, col_offset: i64) -> Option<Vec<i64>> {
    match name {
        "q" => Some(vec![col_offset]),
        "res" => Some(vec![row_offset]),
        "J" => Some(vec![row_offset, col_offset]),
        _ => None,
    }
}

fn shift_index(index: Expr, offset: i64) -> Expr {
    if offset == 0 {
        return index;
    }
    match index {
        Expr::Integer(value) => Expr::Integer(value + offset),
        other => Expr::call("+", vec![Expr::Integer(offset), other]),
    }
}

/// Rewrites every `q`/`J`/`res` reference in `expr` so element-local
/// indices line up with the global numbering: `q` columns move by
/// `col_offset`, `res` rows by `row_offset`, `J` by both. Literal
/// integer indices are folded in place; anything else is wrapped in a
/// `+` call. A reference with the wrong arity, or one of the three
/// names used without indices, is an error.
pub fn offset_nonlinear_refs(expr: &Expr, row_offset: i64, col_offset: i64) -> Result<Expr> {
    expr.rewrite(&mut |node| match node {
        Expr::IndexRef { name, indices } => {
            let Some(offsets) = ref_offsets(name, row_offset, col_offset) else {
                return Ok(None);
            };
            if indices.len() != offsets.len() {
                return Err(Error::IndexArityMismatch {
                    name: name.clone(),
                    expected: offsets.len(),
                    found: indices.len(),
                });
            }
            let indices = indices
                .iter()
                .zip(&offsets)
                .map(|(index, &offset)| {
                    let index = offset_nonlinear_refs(index, row_offset, col_offset)?;
                    Ok(shift_index(index, offset))
                })
                .collect::<Result<_>>()?;
            Ok(Some(Expr::IndexRef {
                name: name.clone(),
                indices,
            }))
        }
        Expr::Var(name) if ref_offsets(name, 0, 0).is_some() => {
            Err(Error::UnindexedReference(name.clone()))
        }
        _ => Ok(None),
    })
}

fn is_operator(head: &str) -> bool {
    !head.is_empty() && head.chars().all(|c| c.is_ascii_punctuation())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Integer(value) => write!(f, "{value}"),
            Expr::Number(value) => write!(f, "{value}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Call { head, args } if args.len() == 2 && is_operator(head) => {
                write!(f, "{} {} {}", args[0], head, args[1])
            }
            Expr::Call { head, args } => {
                write!(f, "{head}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::IndexRef { name, indices } => {
                write!(f, "{name}[")?;
                for (i, index) in indices.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{index}")?;
                }
                write!(f, "]")
            }
            Expr::Block(stmts) => {
                for (i, stmt) in stmts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{stmt}")?;
                }
                Ok(())
            }
            Expr::Scope(body) => write!(f, "{{ {body} }}"),
        }
    }
}
