//! Projections: the shape a select's rows materialize into.
//!
//! A projection body is a host expression whose leaves are IR nodes. It
//! is either fully server-computable ([`Projection::Server`]), split into
//! a server part plus a transform evaluated after materialization
//! ([`Projection::Client`]), or the pending combination of two row shapes
//! produced by a join ([`Projection::Composite`]).

use crate::error::QueryError;
use crate::expr::{Expr, Lambda};
use crate::ir::SqlExpr;
use crate::value::{Type, Value};

/// Name of the parameter a client transform receives the server row in.
pub const SERVER_ROW: &str = "$server";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Projection {
    Server(Expr),
    Client {
        server: Box<Projection>,
        /// One parameter: the materialized server row.
        result: Lambda,
    },
    Composite {
        outer: Box<Projection>,
        inner: Box<Projection>,
        /// Two parameters: the outer and inner rows.
        result: Lambda,
    },
}

impl Projection {
    /// The single function body from row reads to the final shape.
    pub fn flatten(&self) -> Result<Expr, QueryError> {
        match self {
            Projection::Server(body) => Ok(body.clone()),
            Projection::Client { server, result } => {
                reduce_members(result.apply(&[server.flatten()?])?)
            }
            Projection::Composite {
                outer,
                inner,
                result,
            } => reduce_members(result.apply(&[outer.flatten()?, inner.flatten()?])?),
        }
    }

    /// Compose `selector` after this projection. Composite projections
    /// keep their halves and absorb the selector into the result
    /// function; the others are re-split so that as much as possible stays
    /// on the server.
    pub fn merge(
        self,
        selector: &Lambda,
        is_server: &dyn Fn(&Expr) -> bool,
    ) -> Result<Projection, QueryError> {
        match self {
            Projection::Composite {
                outer,
                inner,
                result,
            } => {
                let body = selector.apply(&[result.body])?;
                Ok(Projection::Composite {
                    outer,
                    inner,
                    result: Lambda::new(result.params, body),
                })
            }
            other => {
                let body = reduce_members(selector.apply(&[other.flatten()?])?)?;
                Projection::classify(body, is_server)
            }
        }
    }

    /// Split `body` into server and client parts. Maximal subtrees that
    /// can be read from a row are gathered into a server record; the rest
    /// becomes a transform over that record.
    pub fn classify(
        body: Expr,
        is_server: &dyn Fn(&Expr) -> bool,
    ) -> Result<Projection, QueryError> {
        if is_server(&body) {
            return Ok(Projection::Server(body));
        }
        let mut parts: Vec<(String, Expr)> = Vec::new();
        let skeleton = extract_parts(body, is_server, &mut parts)?;
        let record = Expr::Record {
            entity: None,
            fields: parts,
        };
        let result = Lambda::new(vec![(SERVER_ROW.to_string(), record.ty())], skeleton);
        Ok(Projection::Client {
            server: Box::new(Projection::Server(record)),
            result,
        })
    }

    /// Apply `f` to every body the projection holds, keeping its shape.
    pub fn map_bodies(
        self,
        f: &mut dyn FnMut(Expr) -> Result<Expr, QueryError>,
    ) -> Result<Projection, QueryError> {
        Ok(match self {
            Projection::Server(body) => Projection::Server(f(body)?),
            Projection::Client { server, result } => Projection::Client {
                server: Box::new(server.map_bodies(f)?),
                result: Lambda::new(result.params, f(result.body)?),
            },
            Projection::Composite {
                outer,
                inner,
                result,
            } => Projection::Composite {
                outer: Box::new(outer.map_bodies(f)?),
                inner: Box::new(inner.map_bodies(f)?),
                result: Lambda::new(result.params, f(result.body)?),
            },
        })
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Projection::Server(_))
    }

    /// Static type of a materialized row.
    pub fn ty(&self) -> Result<Type, QueryError> {
        Ok(self.flatten()?.ty())
    }
}

fn extract_parts(
    expr: Expr,
    is_server: &dyn Fn(&Expr) -> bool,
    parts: &mut Vec<(String, Expr)>,
) -> Result<Expr, QueryError> {
    let trivial = matches!(
        expr,
        Expr::Constant { .. } | Expr::Parameter { .. } | Expr::Default(_) | Expr::Param { .. }
    );
    if !trivial && (is_server(&expr) || expr.is_relational()) {
        let name = format!("${}", parts.len());
        let ty = expr.ty();
        parts.push((name.clone(), expr));
        return Ok(Expr::Member {
            base: Box::new(Expr::Param {
                name: SERVER_ROW.to_string(),
                ty: Type::Record(Vec::new()),
            }),
            name,
            ty,
        });
    }
    expr.map_children(&mut |child| extract_parts(child, is_server, parts))
}

/// SQL leaves of a row shape, depth-first.
pub fn sql_leaves(expr: &Expr) -> Vec<&SqlExpr> {
    let mut out = Vec::new();
    collect_leaves(expr, &mut out);
    out
}

fn collect_leaves<'a>(expr: &'a Expr, out: &mut Vec<&'a SqlExpr>) {
    match expr {
        Expr::Sql(sql) => out.push(sql),
        Expr::Polymorphic(poly) => {
            for arm in &poly.arms {
                collect_leaves(&arm.test, out);
                collect_leaves(&arm.shape, out);
            }
        }
        other => {
            for child in other.children() {
                collect_leaves(child, out);
            }
        }
    }
}

// ── Structural member reduction ────────────────────────────────────────

/// One step of member access on an already-shaped value, or `None` when
/// the base has no structure to reach into.
pub fn reduce_member(base: &Expr, name: &str, ty: &Type) -> Option<Expr> {
    match base {
        Expr::Record { fields, .. } => fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.clone()),
        Expr::Polymorphic(poly) => poly.member(name),
        Expr::GroupByResult(group) if name == "Key" => Some(group.key.clone()),
        Expr::Grouping(group) if name == "Key" => Some(group.key.clone()),
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => Some(Expr::Conditional {
            test: test.clone(),
            if_true: Box::new(member_of(if_true, name, ty)),
            if_false: Box::new(member_of(if_false, name, ty)),
        }),
        Expr::Constant {
            value: Value::Null, ..
        }
        | Expr::Default(_) => Some(Expr::null(ty.clone())),
        Expr::Parameter { index, path, .. } => {
            let mut path = path.clone();
            path.push(name.to_string());
            Some(Expr::Parameter {
                index: *index,
                path,
                ty: ty.clone(),
            })
        }
        Expr::Captured {
            value: Value::Record(record),
            ..
        } => record.get(name).map(|v| Expr::Captured {
            value: v.clone(),
            ty: ty.clone(),
        }),
        _ => None,
    }
}

fn member_of(base: &Expr, name: &str, ty: &Type) -> Expr {
    reduce_member(base, name, ty).unwrap_or_else(|| Expr::Member {
        base: Box::new(base.clone()),
        name: name.to_string(),
        ty: ty.clone(),
    })
}

/// Fold member accesses on records, groupings, polymorphic rows and
/// parameters throughout `expr`.
pub fn reduce_members(expr: Expr) -> Result<Expr, QueryError> {
    expr.transform_up(&mut |e| match &e {
        Expr::Member { base, name, ty } => match reduce_member(base, name, ty) {
            Some(reduced @ Expr::Conditional { .. }) => reduce_members(reduced),
            Some(reduced) => Ok(reduced),
            None => Ok(e),
        },
        _ => Ok(e),
    })
}
