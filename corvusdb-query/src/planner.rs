//! Lowers a parsed [`Query`] into a linear pipeline of [`PlanNode`]s the
//! optimizer rewrites and the executor runs. Patterns become
//! scan/expand/var-length-expand steps; every other clause becomes its own
//! step kind, in clause order.

use std::collections::BTreeMap;

use crate::ast::*;
use crate::error::{Error, Result, SemanticError};
use crate::evaluator::default_column_name;

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub steps: Vec<PlanNode>,
}

/// One hop of a fixed-length relationship chain bundled into a single
/// [`PlanNode::ExpandMultiHop`] — the optimizer's cost model reorders the
/// whole bundle as a unit rather than hop-by-hop.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub to_variable: Option<String>,
    pub to_labels: Vec<String>,
    pub to_properties: Option<PropertyMap>,
    pub edge_variable: Option<String>,
    pub rel_types: Vec<String>,
    pub direction: RelationshipDirection,
    pub edge_properties: Option<PropertyMap>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    ScanNodes {
        variable: String,
        labels: Vec<String>,
        properties: Option<PropertyMap>,
    },
    ExpandEdges {
        from: String,
        hop: Hop,
    },
    ExpandMultiHop {
        from: String,
        hops: Vec<Hop>,
    },
    VarLengthExpand {
        from: String,
        hop: Hop,
        min: u32,
        max: Option<u32>,
    },
    PathBind {
        variable: String,
        node_vars: Vec<String>,
        edge_vars: Vec<String>,
    },
    Filter(Expression),
    Project {
        items: Vec<ProjectItem>,
        distinct: bool,
        order_by: Vec<(Expression, Direction)>,
        skip: Option<Expression>,
        limit: Option<Expression>,
        /// Carried through so the executor can tell "final RETURN" (drop
        /// every unprojected column) from an intermediate WITH (same, but
        /// the query keeps going) — both behave the same way, this only
        /// affects whether the pipeline ends here.
        is_with: bool,
    },
    Unwind {
        expression: Expression,
        variable: String,
    },
    LeftOuterPattern(Box<Plan>),
    Create {
        patterns: Vec<Pattern>,
    },
    Merge {
        pattern: Pattern,
        /// The same scan/expand steps a bare `MATCH` of this pattern would
        /// lower to, reused by the executor's "does it already exist" probe
        /// so MERGE's match phase has identical semantics to MATCH.
        match_steps: Vec<PlanNode>,
        on_create: Vec<SetItem>,
        on_match: Vec<SetItem>,
    },
    Set(Vec<SetItem>),
    Remove(Vec<RemoveItem>),
    Delete {
        variables: Vec<String>,
        detach: bool,
    },
    Union {
        rhs: Box<Plan>,
        all: bool,
    },
    Subquery {
        plan: Box<Plan>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectItem {
    pub expression: Expression,
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarKind {
    Node,
    Relationship,
    Path,
    Scalar,
}

/// Tracks which kind of value each variable name is bound to across the
/// whole query, flagging a name reused as a different kind
/// (`VariableTypeConflict`) and the set of names already bound so
/// `ScanNodes` vs. a property-equality `Filter` can be told apart for an
/// already-bound pattern variable.
#[derive(Default)]
struct PlannerState {
    kinds: BTreeMap<String, VarKind>,
    bound: std::collections::BTreeSet<String>,
}

impl PlannerState {
    fn bind(&mut self, name: &str, kind: VarKind) -> Result<()> {
        if let Some(existing) = self.kinds.get(name) {
            if *existing != kind {
                return Err(Error::Semantic(SemanticError::VariableTypeConflict(name.to_string())));
            }
        } else {
            self.kinds.insert(name.to_string(), kind);
        }
        self.bound.insert(name.to_string());
        Ok(())
    }

    fn is_bound(&self, name: &str) -> bool {
        self.bound.contains(name)
    }
}

pub fn plan(query: &Query) -> Result<Plan> {
    let mut state = PlannerState::default();
    lower_query(query, &mut state)
}

fn lower_query(query: &Query, state: &mut PlannerState) -> Result<Plan> {
    let mut steps = Vec::new();
    for clause in &query.clauses {
        match clause {
            Clause::Match(m) => lower_match(m, state, &mut steps)?,
            Clause::Where(w) => steps.push(PlanNode::Filter(w.predicate.clone())),
            Clause::Create(c) => {
                for pattern in &c.patterns {
                    bind_pattern_vars(pattern, state)?;
                }
                steps.push(PlanNode::Create { patterns: c.patterns.clone() });
            }
            Clause::Merge(m) => {
                let mut match_state = PlannerState {
                    kinds: state.kinds.clone(),
                    bound: state.bound.clone(),
                };
                let mut match_steps = Vec::new();
                lower_pattern(&m.pattern, &mut match_state, &mut match_steps)?;
                bind_pattern_vars(&m.pattern, state)?;
                steps.push(PlanNode::Merge {
                    pattern: m.pattern.clone(),
                    match_steps,
                    on_create: m.on_create.clone(),
                    on_match: m.on_match.clone(),
                });
            }
            Clause::Set(s) => steps.push(PlanNode::Set(s.items.clone())),
            Clause::Remove(r) => steps.push(PlanNode::Remove(r.items.clone())),
            Clause::Delete(d) => steps.push(PlanNode::Delete { variables: d.variables.clone(), detach: d.detach }),
            Clause::Unwind(u) => {
                state.bind(&u.variable, VarKind::Scalar)?;
                steps.push(PlanNode::Unwind { expression: u.expression.clone(), variable: u.variable.clone() });
            }
            Clause::With(w) => {
                let items = lower_return_items(&w.items, state)?;
                if let Some(where_clause) = &w.where_clause {
                    // WHERE on a WITH filters after the projection; push it
                    // as the very next step, evaluated against the
                    // re-bound (possibly renamed) columns.
                    steps.push(PlanNode::Project {
                        items,
                        distinct: w.distinct,
                        order_by: lower_order_by(&w.order_by),
                        skip: w.skip.clone(),
                        limit: w.limit.clone(),
                        is_with: true,
                    });
                    steps.push(PlanNode::Filter(where_clause.predicate.clone()));
                } else {
                    steps.push(PlanNode::Project {
                        items,
                        distinct: w.distinct,
                        order_by: lower_order_by(&w.order_by),
                        skip: w.skip.clone(),
                        limit: w.limit.clone(),
                        is_with: true,
                    });
                }
            }
            Clause::Return(r) => {
                let items = lower_return_items(&r.items, state)?;
                steps.push(PlanNode::Project {
                    items,
                    distinct: r.distinct,
                    order_by: lower_order_by(&r.order_by),
                    skip: r.skip.clone(),
                    limit: r.limit.clone(),
                    is_with: false,
                });
            }
            Clause::Call(c) => {
                let mut inner_state = PlannerState::default();
                let inner_plan = lower_query(&c.query, &mut inner_state)?;
                steps.push(PlanNode::Subquery { plan: Box::new(inner_plan) });
            }
            Clause::Union(u) => {
                let mut rhs_state = PlannerState::default();
                let rhs_plan = lower_query(&u.rhs, &mut rhs_state)?;
                steps.push(PlanNode::Union { rhs: Box::new(rhs_plan), all: u.all });
            }
        }
    }
    Ok(Plan { steps })
}

fn lower_order_by(order_by: &Option<OrderByClause>) -> Vec<(Expression, Direction)> {
    order_by
        .as_ref()
        .map(|o| o.items.iter().map(|i| (i.expression.clone(), i.direction)).collect())
        .unwrap_or_default()
}

fn lower_return_items(items: &[ReturnItem], state: &mut PlannerState) -> Result<Vec<ProjectItem>> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let column = match &item.alias {
            Some(alias) => alias.clone(),
            None => match default_column_name(&item.expression) {
                Some(name) => name,
                None => {
                    if matches!(item.expression, Expression::Variable(ref v) if v == "*") {
                        "*".to_string()
                    } else {
                        return Err(Error::Semantic(SemanticError::NoExpressionAlias(format!("{:?}", item.expression))));
                    }
                }
            },
        };
        if column != "*" {
            if !seen.insert(column.clone()) {
                return Err(Error::Semantic(SemanticError::ColumnNameConflict(column)));
            }
            state.bind(&column, VarKind::Scalar).ok();
        }
        let _ = i;
        out.push(ProjectItem { expression: item.expression.clone(), column });
    }
    Ok(out)
}

fn lower_match(m: &MatchClause, state: &mut PlannerState, steps: &mut Vec<PlanNode>) -> Result<()> {
    if m.optional {
        let mut inner_state = PlannerState {
            kinds: state.kinds.clone(),
            bound: state.bound.clone(),
        };
        let mut inner_steps = Vec::new();
        for pattern in &m.patterns {
            lower_pattern(pattern, &mut inner_state, &mut inner_steps)?;
        }
        if let Some(where_clause) = &m.where_clause {
            inner_steps.push(PlanNode::Filter(where_clause.predicate.clone()));
        }
        // Variables introduced inside an OPTIONAL MATCH are visible (as
        // possibly-NULL) to the rest of the query.
        state.kinds = inner_state.kinds;
        state.bound = inner_state.bound;
        steps.push(PlanNode::LeftOuterPattern(Box::new(Plan { steps: inner_steps })));
    } else {
        for pattern in &m.patterns {
            lower_pattern(pattern, state, steps)?;
        }
        if let Some(where_clause) = &m.where_clause {
            steps.push(PlanNode::Filter(where_clause.predicate.clone()));
        }
    }
    Ok(())
}

fn bind_pattern_vars(pattern: &Pattern, state: &mut PlannerState) -> Result<()> {
    if let Some(pv) = &pattern.path_variable {
        state.bind(pv, VarKind::Path)?;
    }
    for el in &pattern.elements {
        match el {
            PathElement::Node(n) => {
                if let Some(v) = &n.variable {
                    state.bind(v, VarKind::Node)?;
                }
            }
            PathElement::Relationship(r) => {
                if let Some(v) = &r.variable {
                    state.bind(v, VarKind::Relationship)?;
                }
            }
        }
    }
    Ok(())
}

/// Synthesizes a name for an anonymous pattern variable so the executor has
/// something to key bindings by; these never collide with user-written
/// names because they contain a character the lexer cannot produce in an
/// identifier.
fn anon_name(counter: &mut u64) -> String {
    *counter += 1;
    format!("anon#{counter}")
}

fn lower_pattern(pattern: &Pattern, state: &mut PlannerState, steps: &mut Vec<PlanNode>) -> Result<()> {
    let mut counter = 0u64;
    let mut node_vars = Vec::new();
    let mut edge_vars = Vec::new();

    let mut elements = pattern.elements.iter();
    let Some(PathElement::Node(first)) = elements.next() else {
        return Err(Error::Runtime("pattern must begin with a node".into()));
    };
    let first_var = first.variable.clone().unwrap_or_else(|| anon_name(&mut counter));
    if !state.is_bound(&first_var) {
        steps.push(PlanNode::ScanNodes {
            variable: first_var.clone(),
            labels: first.labels.clone(),
            properties: first.properties.clone(),
        });
    } else if let Some(props) = &first.properties {
        steps.push(property_filter(&first_var, props));
    }
    state.bind(&first_var, VarKind::Node)?;
    node_vars.push(first_var.clone());

    let mut current_var = first_var;
    let mut fixed_hops: Vec<(String, Hop)> = Vec::new();

    loop {
        let Some(PathElement::Relationship(rel)) = elements.next() else { break };
        let Some(PathElement::Node(next)) = elements.next() else {
            return Err(Error::Runtime("relationship must be followed by a node".into()));
        };
        let next_var = next.variable.clone().unwrap_or_else(|| anon_name(&mut counter));
        let edge_var = rel.variable.clone().unwrap_or_else(|| anon_name(&mut counter));
        let hop = Hop {
            to_variable: Some(next_var.clone()),
            to_labels: next.labels.clone(),
            to_properties: next.properties.clone(),
            edge_variable: Some(edge_var.clone()),
            rel_types: rel.types.clone(),
            direction: rel.direction,
            edge_properties: rel.properties.clone(),
        };

        if let Some(length) = &rel.length {
            flush_fixed_hops(&mut fixed_hops, steps);
            steps.push(PlanNode::VarLengthExpand {
                from: current_var.clone(),
                hop,
                min: length.min.unwrap_or(1),
                max: length.max,
            });
        } else {
            fixed_hops.push((current_var.clone(), hop));
        }

        state.bind(&next_var, VarKind::Node)?;
        state.bind(&edge_var, VarKind::Relationship)?;
        node_vars.push(next_var.clone());
        edge_vars.push(edge_var);
        current_var = next_var;
    }
    flush_fixed_hops(&mut fixed_hops, steps);

    if let Some(pv) = &pattern.path_variable {
        state.bind(pv, VarKind::Path)?;
        steps.push(PlanNode::PathBind { variable: pv.clone(), node_vars, edge_vars });
    }
    Ok(())
}

fn flush_fixed_hops(fixed_hops: &mut Vec<(String, Hop)>, steps: &mut Vec<PlanNode>) {
    if fixed_hops.is_empty() {
        return;
    }
    let from = fixed_hops[0].0.clone();
    if fixed_hops.len() == 1 {
        steps.push(PlanNode::ExpandEdges { from, hop: fixed_hops.remove(0).1 });
    } else {
        let hops = fixed_hops.drain(..).map(|(_, hop)| hop).collect();
        steps.push(PlanNode::ExpandMultiHop { from, hops });
    }
}

fn property_filter(variable: &str, props: &PropertyMap) -> PlanNode {
    let mut predicate: Option<Expression> = None;
    for pair in &props.pairs {
        let eq = Expression::Binary(Box::new(BinaryExpression {
            op: BinaryOperator::Eq,
            left: Expression::Property(Box::new(PropertyAccess {
                base: Expression::Variable(variable.to_string()),
                key: pair.key.clone(),
            })),
            right: pair.value.clone(),
        }));
        predicate = Some(match predicate {
            Some(p) => Expression::Binary(Box::new(BinaryExpression { op: BinaryOperator::And, left: p, right: eq })),
            None => eq,
        });
    }
    PlanNode::Filter(predicate.unwrap_or(Expression::Literal(Literal::Bool(true))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn simple_match_return_lowers_to_scan_and_project() {
        let q = parse("MATCH (n:Person) RETURN n.name AS name").unwrap();
        let p = plan(&q).unwrap();
        assert!(matches!(p.steps[0], PlanNode::ScanNodes { .. }));
        assert!(matches!(p.steps.last().unwrap(), PlanNode::Project { .. }));
    }

    #[test]
    fn relationship_pattern_lowers_to_expand() {
        let q = parse("MATCH (a:Person)-[r:KNOWS]->(b:Person) RETURN a, b").unwrap();
        let p = plan(&q).unwrap();
        assert!(p.steps.iter().any(|s| matches!(s, PlanNode::ExpandEdges { .. } | PlanNode::ExpandMultiHop { .. })));
    }

    #[test]
    fn multi_hop_fixed_pattern_bundles_into_one_node() {
        let q = parse("MATCH (a)-[:KNOWS]->(b)-[:KNOWS]->(c) RETURN c").unwrap();
        let p = plan(&q).unwrap();
        assert!(p.steps.iter().any(|s| matches!(s, PlanNode::ExpandMultiHop { hops, .. } if hops.len() == 2)));
    }

    #[test]
    fn variable_length_pattern_lowers_to_var_length_expand() {
        let q = parse("MATCH (a)-[:KNOWS*1..3]->(b) RETURN b").unwrap();
        let p = plan(&q).unwrap();
        assert!(p.steps.iter().any(|s| matches!(s, PlanNode::VarLengthExpand { min: 1, max: Some(3), .. })));
    }

    #[test]
    fn optional_match_produces_left_outer_pattern() {
        let q = parse("MATCH (a) OPTIONAL MATCH (a)-[:KNOWS]->(b) RETURN a, b").unwrap();
        let p = plan(&q).unwrap();
        assert!(p.steps.iter().any(|s| matches!(s, PlanNode::LeftOuterPattern(_))));
    }

    #[test]
    fn duplicate_return_alias_is_rejected() {
        let q = parse("MATCH (n) RETURN n.name AS x, n.age AS x").unwrap();
        let err = plan(&q).unwrap_err();
        assert!(matches!(err, Error::Semantic(SemanticError::ColumnNameConflict(_))));
    }

    #[test]
    fn unaliased_complex_expression_requires_alias() {
        let q = parse("MATCH (n) RETURN n.age + 1").unwrap();
        let err = plan(&q).unwrap_err();
        assert!(matches!(err, Error::Semantic(SemanticError::NoExpressionAlias(_))));
    }

    #[test]
    fn reusing_a_node_variable_as_a_relationship_conflicts() {
        let q = parse("MATCH (a) MATCH (x)-[a]->(y) RETURN a").unwrap();
        let err = plan(&q).unwrap_err();
        assert!(matches!(err, Error::Semantic(SemanticError::VariableTypeConflict(_))));
    }
}
