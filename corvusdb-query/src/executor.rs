//! Row-at-a-time interpreter over a [`Plan`]. Every [`PlanNode`] variant maps
//! to one function here that takes the incoming rows and produces the
//! outgoing rows; `execute` just threads them through in order.
//!
//! Mutating operators (`Create`/`Merge`/`Set`/`Remove`/`Delete`) write
//! through to the in-memory [`Graph`] immediately and, when a durable backend
//! is attached, to it as well — the façade crate is what wraps this in
//! transaction snapshot/restore semantics.

use std::collections::{BTreeMap, BTreeSet};

use corvusdb_api::{EdgeId, EdgeRef, NodeId, NodeRef, Value};
use corvusdb_storage::{DurableBackend, Edge, Graph, Node};

use crate::ast::*;
use crate::error::{Error, Result};
use crate::evaluator::{
    self, evaluate, evaluate_bool, order_compare, reduce_aggregate, values_equal, EvalContext, FunctionRegistry, Row,
    SubqueryRunner,
};
use crate::optimizer::{self, OptimizerOptions};
use crate::planner::{self, Hop, Plan, PlanNode, ProjectItem};

/// Everything one `execute` call needs: the mutable graph, an optional
/// durable backend (its methods all take `&self`, backed by an internal
/// mutex, so it can be shared alongside the exclusive graph borrow), bound
/// query parameters, and user-registered scalar functions.
pub struct ExecCtx<'a> {
    pub graph: &'a mut Graph,
    pub backend: Option<&'a dyn DurableBackend>,
    pub params: &'a BTreeMap<String, Value>,
    pub functions: &'a FunctionRegistry,
}

pub fn execute(plan: &Plan, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    run_steps(&plan.steps, vec![Row::new()], ctx)
}

fn run_steps(steps: &[PlanNode], mut rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    for step in steps {
        rows = run_step(step, rows, ctx)?;
    }
    Ok(rows)
}

fn run_step(step: &PlanNode, rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    match step {
        PlanNode::ScanNodes { variable, labels, properties } => run_scan_nodes(variable, labels, properties, rows, ctx),
        PlanNode::ExpandEdges { from, hop } => run_expand(from, std::slice::from_ref(hop), rows, ctx),
        PlanNode::ExpandMultiHop { from, hops } => run_expand(from, hops, rows, ctx),
        PlanNode::VarLengthExpand { from, hop, min, max } => run_var_length_expand(from, hop, *min, *max, rows, ctx),
        PlanNode::PathBind { variable, node_vars, edge_vars } => run_path_bind(variable, node_vars, edge_vars, rows, ctx),
        PlanNode::Filter(expr) => run_filter(expr, rows, ctx),
        PlanNode::Project { items, distinct, order_by, skip, limit, .. } => {
            run_project(items, *distinct, order_by, skip.as_ref(), limit.as_ref(), rows, ctx)
        }
        PlanNode::Unwind { expression, variable } => run_unwind(expression, variable, rows, ctx),
        PlanNode::LeftOuterPattern(inner) => run_left_outer(inner, rows, ctx),
        PlanNode::Create { patterns } => run_create(patterns, rows, ctx),
        PlanNode::Merge { pattern, match_steps, on_create, on_match } => {
            run_merge(pattern, match_steps, on_create, on_match, rows, ctx)
        }
        PlanNode::Set(items) => run_set(items, rows, ctx),
        PlanNode::Remove(items) => run_remove(items, rows, ctx),
        PlanNode::Delete { variables, detach } => run_delete(variables, *detach, rows, ctx),
        PlanNode::Union { rhs, all } => run_union(rhs, *all, rows, ctx),
        PlanNode::Subquery { plan } => run_subquery_clause(plan, rows, ctx),
    }
}

fn eval_context<'a>(row: &'a Row, ctx: &'a ExecCtx, runner: &'a dyn SubqueryRunner) -> EvalContext<'a, 'a> {
    EvalContext { row, graph: ctx.graph, params: ctx.params, functions: ctx.functions, subqueries: runner }
}

/// `EXISTS { ... }` / `COUNT { ... }` subqueries run against a point-in-time
/// clone of the graph rather than the live mutable one: these forms are
/// existential/counting reads, never expected to mutate, so handing them a
/// fresh owned `Graph` sidesteps needing a second mutable borrow of `ctx`.
struct ReadOnlyRunner<'a> {
    graph: &'a Graph,
    params: &'a BTreeMap<String, Value>,
    functions: &'a FunctionRegistry,
}

impl<'a> SubqueryRunner for ReadOnlyRunner<'a> {
    fn run_subquery(&self, query: &Query, outer_row: &Row) -> Result<Vec<Row>> {
        let plan = planner::plan(query)?;
        let stats = self.graph.statistics();
        let plan = optimizer::optimize(plan, &stats, &OptimizerOptions::default());
        let mut local = self.graph.clone();
        let mut ctx = ExecCtx { graph: &mut local, backend: None, params: self.params, functions: self.functions };
        run_steps(&plan.steps, vec![outer_row.clone()], &mut ctx)
    }
}

fn make_runner<'a>(ctx: &'a ExecCtx) -> ReadOnlyRunner<'a> {
    ReadOnlyRunner { graph: ctx.graph, params: ctx.params, functions: ctx.functions }
}

// --- Scan / expand --------------------------------------------------------

fn candidate_node_ids(graph: &Graph, labels: &[String]) -> Vec<NodeId> {
    if labels.is_empty() {
        return graph.all_node_ids().collect();
    }
    // Multiple labels on a MATCH pattern are a disjunction: any one label is
    // enough to be a candidate. Dedup by id, preserve numeric order.
    let mut set: BTreeSet<NodeId> = BTreeSet::new();
    for label in labels {
        set.extend(graph.nodes_by_label(label));
    }
    set.into_iter().collect()
}

fn node_matches_filter(graph: &Graph, id: NodeId, properties: &Option<PropertyMap>, row: &Row, ctx: &ExecCtx, runner: &dyn SubqueryRunner) -> Result<bool> {
    let Some(props) = properties else { return Ok(true) };
    let node = graph.get_node(id)?;
    for pair in &props.pairs {
        let wanted = evaluate(&pair.value, &eval_context(row, ctx, runner))?;
        let actual = node.properties.get(&pair.key).cloned().unwrap_or(Value::Null);
        if wanted.is_null() || !values_equal(&wanted, &actual) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn run_scan_nodes(
    variable: &str,
    labels: &[String],
    properties: &Option<PropertyMap>,
    rows: Vec<Row>,
    ctx: &mut ExecCtx,
) -> Result<Vec<Row>> {
    let candidates = candidate_node_ids(ctx.graph, labels);
    let mut out = Vec::new();
    for row in rows {
        let runner = make_runner(ctx);
        for id in &candidates {
            if !node_matches_filter(ctx.graph, *id, properties, &row, ctx, &runner)? {
                continue;
            }
            let mut extended = row.clone();
            extended.insert(variable.to_string(), Value::Node(evaluator::node_ref_from_graph(ctx.graph, *id)?));
            out.push(extended);
        }
    }
    Ok(out)
}

fn value_node_id(v: &Value) -> Option<NodeId> {
    match v {
        Value::Node(n) => Some(n.id),
        _ => None,
    }
}

/// Candidate edges for one hop from `from`, respecting direction. Undirected
/// gathers both adjacency lists and dedups by edge id so a self-loop (where
/// the edge sits in both `adjacency_out[from]` and `adjacency_in[from]`)
/// isn't yielded twice.
fn hop_candidate_edges(graph: &Graph, from: NodeId, direction: RelationshipDirection) -> Result<Vec<EdgeId>> {
    Ok(match direction {
        RelationshipDirection::Out => graph.get_outgoing(from)?.to_vec(),
        RelationshipDirection::In => graph.get_incoming(from)?.to_vec(),
        RelationshipDirection::Undirected => {
            let mut set: BTreeSet<EdgeId> = BTreeSet::new();
            set.extend(graph.get_outgoing(from)?.iter().copied());
            set.extend(graph.get_incoming(from)?.iter().copied());
            set.into_iter().collect()
        }
    })
}

fn other_end(edge: &Edge, from: NodeId, direction: RelationshipDirection) -> NodeId {
    match direction {
        RelationshipDirection::Out => edge.dst,
        RelationshipDirection::In => edge.src,
        RelationshipDirection::Undirected => {
            if edge.src == from {
                edge.dst
            } else {
                edge.src
            }
        }
    }
}

fn edge_matches_hop(edge: &Edge, hop: &Hop) -> bool {
    hop.rel_types.is_empty() || hop.rel_types.iter().any(|t| t == &edge.rel_type)
}

fn run_expand(from: &str, hops: &[Hop], rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    let mut current = rows;
    let mut current_from = from.to_string();
    for hop in hops {
        let mut out = Vec::new();
        for row in &current {
            let runner = make_runner(ctx);
            let Some(from_id) = row.get(&current_from).and_then(value_node_id) else { continue };
            for eid in hop_candidate_edges(ctx.graph, from_id, hop.direction)? {
                let edge = ctx.graph.get_edge(eid)?.clone();
                if !edge_matches_hop(&edge, hop) {
                    continue;
                }
                if let Some(props) = &hop.edge_properties {
                    let mut ok = true;
                    for pair in &props.pairs {
                        let wanted = evaluate(&pair.value, &eval_context(row, ctx, &runner))?;
                        let actual = edge.properties.get(&pair.key).cloned().unwrap_or(Value::Null);
                        if wanted.is_null() || !values_equal(&wanted, &actual) {
                            ok = false;
                            break;
                        }
                    }
                    if !ok {
                        continue;
                    }
                }
                let to_id = other_end(&edge, from_id, hop.direction);
                if !hop.to_labels.is_empty() {
                    let to_node = ctx.graph.get_node(to_id)?;
                    if !hop.to_labels.iter().any(|l| to_node.has_label(l)) {
                        continue;
                    }
                }
                if !node_matches_filter(ctx.graph, to_id, &hop.to_properties, row, ctx, &runner)? {
                    continue;
                }
                let mut extended = row.clone();
                if let Some(ev) = &hop.edge_variable {
                    extended.insert(ev.clone(), Value::Edge(evaluator::edge_ref_from_graph(ctx.graph, eid)?));
                }
                if let Some(tv) = &hop.to_variable {
                    extended.insert(tv.clone(), Value::Node(evaluator::node_ref_from_graph(ctx.graph, to_id)?));
                }
                out.push(extended);
            }
        }
        current = out;
        if let Some(tv) = &hop.to_variable {
            current_from = tv.clone();
        }
    }
    Ok(current)
}

/// Cycle-free (by node) depth-first walk collecting every node reachable
/// within `[min, max]` hops. `to_labels`/`to_properties` only constrain the
/// node recorded as a result, never intermediate nodes on the path — Cypher
/// only types the pattern's endpoint.
#[allow(clippy::too_many_arguments)]
fn var_length_walk(
    graph: &Graph,
    current: NodeId,
    hop: &Hop,
    depth: u32,
    min: u32,
    max: Option<u32>,
    visited: &mut BTreeSet<NodeId>,
    path_edges: &mut Vec<EdgeId>,
    row: &Row,
    ctx: &ExecCtx,
    runner: &dyn SubqueryRunner,
    results: &mut Vec<(NodeId, Vec<EdgeId>)>,
) -> Result<()> {
    if depth >= min {
        let matches_labels = hop.to_labels.is_empty() || {
            let node = graph.get_node(current)?;
            hop.to_labels.iter().any(|l| node.has_label(l))
        };
        if matches_labels && node_matches_filter(graph, current, &hop.to_properties, row, ctx, runner)? {
            results.push((current, path_edges.clone()));
        }
    }
    if max.is_some_and(|m| depth >= m) {
        return Ok(());
    }
    for eid in hop_candidate_edges(graph, current, hop.direction)? {
        let edge = graph.get_edge(eid)?;
        if !edge_matches_hop(edge, hop) {
            continue;
        }
        let next = other_end(edge, current, hop.direction);
        if visited.contains(&next) {
            continue;
        }
        visited.insert(next);
        path_edges.push(eid);
        var_length_walk(graph, next, hop, depth + 1, min, max, visited, path_edges, row, ctx, runner, results)?;
        path_edges.pop();
        visited.remove(&next);
    }
    Ok(())
}

fn run_var_length_expand(from: &str, hop: &Hop, min: u32, max: Option<u32>, rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    for row in rows {
        let runner = make_runner(ctx);
        let Some(from_id) = row.get(from).and_then(value_node_id) else { continue };
        let mut visited = BTreeSet::new();
        visited.insert(from_id);
        let mut path_edges = Vec::new();
        let mut results = Vec::new();
        var_length_walk(ctx.graph, from_id, hop, 0, min, max, &mut visited, &mut path_edges, &row, ctx, &runner, &mut results)?;
        for (end_id, edges) in results {
            let mut extended = row.clone();
            if let Some(tv) = &hop.to_variable {
                extended.insert(tv.clone(), Value::Node(evaluator::node_ref_from_graph(ctx.graph, end_id)?));
            }
            if let Some(ev) = &hop.edge_variable {
                let mut list = Vec::with_capacity(edges.len());
                for eid in &edges {
                    list.push(Value::Edge(evaluator::edge_ref_from_graph(ctx.graph, *eid)?));
                }
                extended.insert(ev.clone(), Value::List(list));
            }
            out.push(extended);
        }
    }
    Ok(out)
}

fn run_path_bind(variable: &str, node_vars: &[String], edge_vars: &[String], rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut nodes = Vec::with_capacity(node_vars.len());
        for nv in node_vars {
            match row.get(nv) {
                Some(Value::Node(n)) => nodes.push(n.clone()),
                _ => continue,
            }
        }
        let mut relationships = Vec::with_capacity(edge_vars.len());
        for ev in edge_vars {
            match row.get(ev) {
                Some(Value::Edge(e)) => relationships.push(e.clone()),
                Some(Value::List(items)) => {
                    for item in items {
                        if let Value::Edge(e) = item {
                            relationships.push(e.clone());
                        }
                    }
                }
                _ => continue,
            }
        }
        let mut extended = row;
        extended.insert(variable.to_string(), Value::Path(evaluator::build_path(nodes, relationships)));
        out.push(extended);
    }
    Ok(out)
}

// --- Filter / project / unwind --------------------------------------------

fn run_filter(expr: &Expression, rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let runner = make_runner(ctx);
        if evaluate_bool(expr, &eval_context(&row, ctx, &runner))? == Some(true) {
            out.push(row);
        }
    }
    Ok(out)
}

fn contains_aggregate(expr: &Expression) -> bool {
    match expr {
        Expression::Aggregate(_) => true,
        Expression::Binary(b) => contains_aggregate(&b.left) || contains_aggregate(&b.right),
        Expression::Unary(u) => contains_aggregate(&u.operand),
        Expression::Property(p) => contains_aggregate(&p.base),
        Expression::FunctionCall(f) => f.args.iter().any(contains_aggregate),
        Expression::Case(c) => {
            c.subject.as_ref().is_some_and(contains_aggregate)
                || c.whens.iter().any(|(w, t)| contains_aggregate(w) || contains_aggregate(t))
                || c.else_.as_ref().is_some_and(contains_aggregate)
        }
        Expression::Subscript { base, index } => contains_aggregate(base) || contains_aggregate(index),
        Expression::Slice { base, start, end } => {
            contains_aggregate(base)
                || start.as_deref().is_some_and(contains_aggregate)
                || end.as_deref().is_some_and(contains_aggregate)
        }
        Expression::ListLiteral(items) => items.iter().any(contains_aggregate),
        Expression::MapLiteral(pairs) => pairs.iter().any(|(_, v)| contains_aggregate(v)),
        Expression::In { item, list } => contains_aggregate(item) || contains_aggregate(list),
        _ => false,
    }
}

fn run_project(
    items: &[ProjectItem],
    distinct: bool,
    order_by: &[(Expression, Direction)],
    skip: Option<&Expression>,
    limit: Option<&Expression>,
    rows: Vec<Row>,
    ctx: &mut ExecCtx,
) -> Result<Vec<Row>> {
    let has_agg = items.iter().any(|i| contains_aggregate(&i.expression));
    let mut projected = if has_agg { project_grouped(items, &rows, ctx)? } else { project_flat(items, &rows, ctx)? };

    if distinct {
        let mut seen: Vec<Row> = Vec::new();
        projected.retain(|r| {
            if seen.iter().any(|s| rows_equal(s, r)) {
                false
            } else {
                seen.push(r.clone());
                true
            }
        });
    }

    if !order_by.is_empty() {
        let runner = make_runner(ctx);
        let mut keyed: Vec<(Vec<Value>, Row)> = Vec::with_capacity(projected.len());
        for row in projected {
            let mut key = Vec::with_capacity(order_by.len());
            for (expr, _) in order_by {
                key.push(evaluate(expr, &eval_context(&row, ctx, &runner))?);
            }
            keyed.push((key, row));
        }
        keyed.sort_by(|a, b| {
            for (i, (_, dir)) in order_by.iter().enumerate() {
                let ord = order_compare(&a.0[i], &b.0[i]);
                let ord = if *dir == Direction::Descending { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        projected = keyed.into_iter().map(|(_, r)| r).collect();
    }

    if let Some(skip_expr) = skip {
        let runner = make_runner(ctx);
        let n = evaluate_count(skip_expr, ctx, &runner)?;
        projected = projected.into_iter().skip(n).collect();
    }
    if let Some(limit_expr) = limit {
        let runner = make_runner(ctx);
        let n = evaluate_count(limit_expr, ctx, &runner)?;
        projected.truncate(n);
    }
    Ok(projected)
}

fn evaluate_count(expr: &Expression, ctx: &ExecCtx, runner: &dyn SubqueryRunner) -> Result<usize> {
    let row = Row::new();
    match evaluate(expr, &eval_context(&row, ctx, runner))? {
        Value::Int(i) if i >= 0 => Ok(i as usize),
        Value::Int(_) => Err(Error::Value("SKIP/LIMIT must not be negative".into())),
        other => Err(Error::Type(format!("SKIP/LIMIT requires an integer, got {}", other.type_name()))),
    }
}

fn rows_equal(a: &Row, b: &Row) -> bool {
    a == b
}

fn project_flat(items: &[ProjectItem], rows: &[Row], ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let runner = make_runner(ctx);
        let eval_ctx = eval_context(row, ctx, &runner);
        let mut out_row = Row::new();
        for item in items {
            if item.column == "*" {
                for (k, v) in row {
                    out_row.insert(k.clone(), v.clone());
                }
                continue;
            }
            out_row.insert(item.column.clone(), evaluate(&item.expression, &eval_ctx)?);
        }
        out.push(out_row);
    }
    Ok(out)
}

fn grouping_key_items(items: &[ProjectItem]) -> Vec<&ProjectItem> {
    items.iter().filter(|i| !matches!(i.expression, Expression::Aggregate(_))).collect()
}

fn project_grouped(items: &[ProjectItem], rows: &[Row], ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    for item in items {
        if !matches!(item.expression, Expression::Aggregate(_)) && contains_aggregate(&item.expression) {
            return Err(Error::Runtime(
                "an aggregate function must stand alone as its own RETURN/WITH item, not nested in a larger expression".into(),
            ));
        }
    }
    let key_items = grouping_key_items(items);

    let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
    for row in rows {
        let runner = make_runner(ctx);
        let eval_ctx = eval_context(row, ctx, &runner);
        let mut key = Vec::with_capacity(key_items.len());
        for item in &key_items {
            key.push(evaluate(&item.expression, &eval_ctx)?);
        }
        match groups.iter_mut().find(|(k, _)| k.len() == key.len() && k.iter().zip(&key).all(|(a, b)| values_equal(a, b))) {
            Some(group) => group.1.push(row.clone()),
            None => groups.push((key, vec![row.clone()])),
        }
    }
    if groups.is_empty() && key_items.is_empty() {
        // No input rows and no grouping keys: still emit a single empty-group
        // result so `count(*)` over zero matches reads 0 rather than no rows
        // at all. With grouping keys present, zero input means zero groups.
        groups.push((Vec::new(), vec![]));
    }

    let mut out = Vec::with_capacity(groups.len());
    for (_, group_rows) in groups {
        let mut out_row = Row::new();
        for item in items {
            let value = match &item.expression {
                Expression::Aggregate(agg) => {
                    let mut values = Vec::with_capacity(group_rows.len());
                    for row in &group_rows {
                        let runner = make_runner(ctx);
                        let eval_ctx = eval_context(row, ctx, &runner);
                        values.push(match &agg.arg {
                            Some(arg) => evaluate(arg, &eval_ctx)?,
                            None => Value::Int(1),
                        });
                    }
                    let first_row = group_rows.first().cloned().unwrap_or_default();
                    let runner = make_runner(ctx);
                    let eval_ctx = eval_context(&first_row, ctx, &runner);
                    let mut extra = Vec::with_capacity(agg.extra_args.len());
                    for e in &agg.extra_args {
                        extra.push(evaluate(e, &eval_ctx)?);
                    }
                    reduce_aggregate(&agg.name, agg.distinct, values, &extra)?
                }
                other => {
                    let row = group_rows.first().cloned().unwrap_or_default();
                    let runner = make_runner(ctx);
                    evaluate(other, &eval_context(&row, ctx, &runner))?
                }
            };
            out_row.insert(item.column.clone(), value);
        }
        out.push(out_row);
    }
    Ok(out)
}

fn run_unwind(expression: &Expression, variable: &str, rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    for row in rows {
        let runner = make_runner(ctx);
        let value = evaluate(expression, &eval_context(&row, ctx, &runner))?;
        match value {
            Value::Null => {}
            Value::List(items) => {
                for item in items {
                    let mut extended = row.clone();
                    extended.insert(variable.to_string(), item);
                    out.push(extended);
                }
            }
            single => {
                let mut extended = row.clone();
                extended.insert(variable.to_string(), single);
                out.push(extended);
            }
        }
    }
    Ok(out)
}

/// The set of variable names a sub-plan's pattern steps introduce, computed
/// once statically — used by `OPTIONAL MATCH` to know which bindings to
/// null out when the inner pattern matches nothing for a given outer row.
fn introduced_variables(plan: &Plan) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for step in &plan.steps {
        match step {
            PlanNode::ScanNodes { variable, .. } => {
                out.insert(variable.clone());
            }
            PlanNode::ExpandEdges { hop, .. } => insert_hop_vars(hop, &mut out),
            PlanNode::ExpandMultiHop { hops, .. } => {
                for hop in hops {
                    insert_hop_vars(hop, &mut out);
                }
            }
            PlanNode::VarLengthExpand { hop, .. } => insert_hop_vars(hop, &mut out),
            PlanNode::PathBind { variable, .. } => {
                out.insert(variable.clone());
            }
            _ => {}
        }
    }
    out
}

fn insert_hop_vars(hop: &Hop, out: &mut BTreeSet<String>) {
    if let Some(v) = &hop.to_variable {
        out.insert(v.clone());
    }
    if let Some(v) = &hop.edge_variable {
        out.insert(v.clone());
    }
}

fn run_left_outer(inner: &Plan, rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    let introduced = introduced_variables(inner);
    let mut out = Vec::new();
    for row in rows {
        let matched = run_steps(&inner.steps, vec![row.clone()], ctx)?;
        if matched.is_empty() {
            let mut with_nulls = row;
            for var in &introduced {
                with_nulls.entry(var.clone()).or_insert(Value::Null);
            }
            out.push(with_nulls);
        } else {
            out.extend(matched);
        }
    }
    Ok(out)
}

// --- Create / merge --------------------------------------------------------

fn evaluate_property_map(props: &Option<PropertyMap>, row: &Row, ctx: &ExecCtx, runner: &dyn SubqueryRunner) -> Result<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    let Some(props) = props else { return Ok(out) };
    let eval_ctx = eval_context(row, ctx, runner);
    for pair in &props.pairs {
        out.insert(pair.key.clone(), evaluate(&pair.value, &eval_ctx)?);
    }
    Ok(out)
}

/// Resolves or creates the node for one pattern element, binding its
/// variable into `row`. Shared by `CREATE` and MERGE's create branch.
fn create_or_reuse_node(el: &NodePattern, row: &mut Row, ctx: &mut ExecCtx, runner: &dyn SubqueryRunner) -> Result<NodeId> {
    if let Some(v) = &el.variable {
        if let Some(Value::Node(n)) = row.get(v) {
            return Ok(n.id);
        }
    }
    let id = ctx.graph.next_node_id();
    let properties = evaluate_property_map(&el.properties, row, ctx, runner)?;
    let node = Node { id, labels: el.labels.clone(), properties };
    ctx.graph.add_node(node.clone());
    if let Some(backend) = ctx.backend {
        backend.save_node(&node)?;
    }
    if let Some(v) = &el.variable {
        row.insert(v.clone(), Value::Node(evaluator::node_ref_from_graph(ctx.graph, id)?));
    }
    Ok(id)
}

fn create_pattern(pattern: &Pattern, row: &mut Row, ctx: &mut ExecCtx, runner: &dyn SubqueryRunner) -> Result<()> {
    let mut elements = pattern.elements.iter();
    let Some(PathElement::Node(first)) = elements.next() else {
        return Err(Error::Runtime("pattern must begin with a node".into()));
    };
    let mut prev_id = create_or_reuse_node(first, row, ctx, runner)?;

    loop {
        let Some(PathElement::Relationship(rel)) = elements.next() else { break };
        let Some(PathElement::Node(next)) = elements.next() else {
            return Err(Error::Runtime("relationship must be followed by a node".into()));
        };
        let next_id = create_or_reuse_node(next, row, ctx, runner)?;
        let rel_type = rel.types.first().cloned().unwrap_or_default();
        let (src, dst) = match rel.direction {
            RelationshipDirection::In => (next_id, prev_id),
            // CREATE requires an explicit direction; an undirected arrow is
            // treated the same as `->`.
            RelationshipDirection::Out | RelationshipDirection::Undirected => (prev_id, next_id),
        };
        let id = ctx.graph.next_edge_id();
        let properties = evaluate_property_map(&rel.properties, row, ctx, runner)?;
        let edge = Edge { id, rel_type, src, dst, properties };
        ctx.graph.add_edge(edge.clone())?;
        if let Some(backend) = ctx.backend {
            backend.save_edge(&edge)?;
        }
        if let Some(v) = &rel.variable {
            row.insert(v.clone(), Value::Edge(evaluator::edge_ref_from_graph(ctx.graph, id)?));
        }
        prev_id = next_id;
    }
    Ok(())
}

fn run_create(patterns: &[Pattern], rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    let mut out = Vec::with_capacity(rows.len());
    for mut row in rows {
        let runner = make_runner(ctx);
        for pattern in patterns {
            create_pattern(pattern, &mut row, ctx, &runner)?;
        }
        out.push(row);
    }
    Ok(out)
}

fn apply_set_items(items: &[SetItem], row: &Row, ctx: &mut ExecCtx) -> Result<()> {
    for item in items {
        apply_set_item(item, row, ctx)?;
    }
    Ok(())
}

fn apply_set_item(item: &SetItem, row: &Row, ctx: &mut ExecCtx) -> Result<()> {
    match item {
        SetItem::Property { target, value } => {
            let runner = make_runner(ctx);
            let new_value = evaluate(value, &eval_context(row, ctx, &runner))?;
            let base = evaluate(&target.base, &eval_context(row, ctx, &runner))?;
            set_property(base, &target.key, new_value, ctx)?;
        }
        SetItem::Labels { variable, labels } => {
            let Some(Value::Node(n)) = row.get(variable) else {
                return Err(Error::Type(format!("SET labels requires '{variable}' to be a node")));
            };
            for label in labels {
                ctx.graph.add_label(n.id, label)?;
            }
            if let Some(backend) = ctx.backend {
                backend.save_node(ctx.graph.get_node(n.id)?)?;
            }
        }
        SetItem::AllProperties { variable, value, merge } => {
            let runner = make_runner(ctx);
            let new_value = evaluate(value, &eval_context(row, ctx, &runner))?;
            let Value::Map(map) = new_value else {
                return Err(Error::Type("SET n = ... / SET n += ... requires a map expression".into()));
            };
            let base = row.get(variable).cloned().ok_or_else(|| Error::Runtime(format!("'{variable}' is not bound")))?;
            set_all_properties(base, map, *merge, ctx)?;
        }
    }
    Ok(())
}

/// `SET n.prop = null` removes the property, matching openCypher semantics.
fn set_property(base: Value, key: &str, value: Value, ctx: &mut ExecCtx) -> Result<()> {
    match base {
        Value::Node(n) => {
            let node = ctx.graph.get_node_mut(n.id)?;
            if value.is_null() {
                node.properties.remove(key);
            } else {
                node.properties.insert(key.to_string(), value);
            }
            if let Some(backend) = ctx.backend {
                backend.save_node(ctx.graph.get_node(n.id)?)?;
            }
        }
        Value::Edge(e) => {
            let edge = ctx.graph.get_edge_mut(e.id)?;
            if value.is_null() {
                edge.properties.remove(key);
            } else {
                edge.properties.insert(key.to_string(), value);
            }
            if let Some(backend) = ctx.backend {
                backend.save_edge(ctx.graph.get_edge(e.id)?)?;
            }
        }
        other => return Err(Error::Type(format!("SET requires a node or relationship, got {}", other.type_name()))),
    }
    Ok(())
}

fn set_all_properties(base: Value, map: BTreeMap<String, Value>, merge: bool, ctx: &mut ExecCtx) -> Result<()> {
    match base {
        Value::Node(n) => {
            let node = ctx.graph.get_node_mut(n.id)?;
            if !merge {
                node.properties.clear();
            }
            for (k, v) in map {
                if v.is_null() {
                    node.properties.remove(&k);
                } else {
                    node.properties.insert(k, v);
                }
            }
            if let Some(backend) = ctx.backend {
                backend.save_node(ctx.graph.get_node(n.id)?)?;
            }
        }
        Value::Edge(e) => {
            let edge = ctx.graph.get_edge_mut(e.id)?;
            if !merge {
                edge.properties.clear();
            }
            for (k, v) in map {
                if v.is_null() {
                    edge.properties.remove(&k);
                } else {
                    edge.properties.insert(k, v);
                }
            }
            if let Some(backend) = ctx.backend {
                backend.save_edge(ctx.graph.get_edge(e.id)?)?;
            }
        }
        other => return Err(Error::Type(format!("SET requires a node or relationship, got {}", other.type_name()))),
    }
    Ok(())
}

fn run_set(items: &[SetItem], rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    for row in &rows {
        apply_set_items(items, row, ctx)?;
    }
    Ok(rows)
}

fn apply_remove_item(item: &RemoveItem, row: &Row, ctx: &mut ExecCtx) -> Result<()> {
    match item {
        RemoveItem::Property(access) => {
            let runner = make_runner(ctx);
            let base = evaluate(&access.base, &eval_context(row, ctx, &runner))?;
            set_property(base, &access.key, Value::Null, ctx)?;
        }
        RemoveItem::Label { variable, label } => {
            let Some(Value::Node(n)) = row.get(variable) else {
                return Err(Error::Type(format!("REMOVE label requires '{variable}' to be a node")));
            };
            ctx.graph.remove_label(n.id, label)?;
            if let Some(backend) = ctx.backend {
                backend.save_node(ctx.graph.get_node(n.id)?)?;
            }
        }
    }
    Ok(())
}

fn run_remove(items: &[RemoveItem], rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    for row in &rows {
        for item in items {
            apply_remove_item(item, row, ctx)?;
        }
    }
    Ok(rows)
}

fn run_merge(
    pattern: &Pattern,
    match_steps: &[PlanNode],
    on_create: &[SetItem],
    on_match: &[SetItem],
    rows: Vec<Row>,
    ctx: &mut ExecCtx,
) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    for row in rows {
        let matched = run_steps(match_steps, vec![row.clone()], ctx)?;
        if matched.is_empty() {
            let mut created = row;
            let runner = make_runner(ctx);
            create_pattern(pattern, &mut created, ctx, &runner)?;
            apply_set_items(on_create, &created, ctx)?;
            out.push(created);
        } else {
            for matched_row in matched {
                apply_set_items(on_match, &matched_row, ctx)?;
                out.push(matched_row);
            }
        }
    }
    Ok(out)
}

// --- Delete -----------------------------------------------------------------

fn run_delete(variables: &[String], detach: bool, rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    for row in &rows {
        for var in variables {
            match row.get(var) {
                Some(Value::Node(n)) => delete_node(n.id, detach, ctx)?,
                Some(Value::Edge(e)) => delete_edge(e.id, ctx)?,
                Some(Value::Null) | None => {}
                Some(other) => return Err(Error::Type(format!("DELETE requires a node or relationship, got {}", other.type_name()))),
            }
        }
    }
    Ok(rows)
}

fn delete_edge(id: EdgeId, ctx: &mut ExecCtx) -> Result<()> {
    if !ctx.graph.edge_exists(id) {
        return Ok(());
    }
    ctx.graph.remove_edge(id)?;
    if let Some(backend) = ctx.backend {
        backend.delete_edge(id)?;
    }
    Ok(())
}

fn delete_node(id: NodeId, detach: bool, ctx: &mut ExecCtx) -> Result<()> {
    if !ctx.graph.node_exists(id) {
        return Ok(());
    }
    let incident: Vec<EdgeId> = ctx
        .graph
        .get_outgoing(id)?
        .iter()
        .chain(ctx.graph.get_incoming(id)?.iter())
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if !incident.is_empty() && !detach {
        return Err(Error::CannotDeleteNodeWithRelationships(id.to_string()));
    }
    for eid in incident {
        delete_edge(eid, ctx)?;
    }
    ctx.graph.remove_node(id)?;
    if let Some(backend) = ctx.backend {
        backend.delete_node(id)?;
    }
    Ok(())
}

// --- Union / subquery --------------------------------------------------------

fn run_union(rhs: &Plan, all: bool, lhs_rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    let rhs_rows = run_steps(&rhs.steps, vec![Row::new()], ctx)?;
    let mut combined = lhs_rows;
    combined.extend(rhs_rows);
    if !all {
        let mut seen: Vec<Row> = Vec::new();
        combined.retain(|r| {
            if seen.iter().any(|s| rows_equal(s, r)) {
                false
            } else {
                seen.push(r.clone());
                true
            }
        });
    }
    Ok(combined)
}

/// `CALL { ... }` is correlated: the subquery runs once per outer row,
/// seeded with that row's bindings, and every resulting row replaces it.
fn run_subquery_clause(plan: &Plan, rows: Vec<Row>, ctx: &mut ExecCtx) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    for row in rows {
        out.extend(run_steps(&plan.steps, vec![row], ctx)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(cypher: &str, graph: &mut Graph) -> Vec<Row> {
        let query = parse(cypher).unwrap();
        let plan = planner::plan(&query).unwrap();
        let stats = graph.statistics();
        let plan = optimizer::optimize(plan, &stats, &OptimizerOptions::default());
        let params = BTreeMap::new();
        let functions = FunctionRegistry::new();
        let mut ctx = ExecCtx { graph, backend: None, params: &params, functions: &functions };
        execute(&plan, &mut ctx).unwrap()
    }

    #[test]
    fn create_then_match_round_trips() {
        let mut graph = Graph::new();
        run("CREATE (n:Person {name: 'Ada'})", &mut graph);
        let rows = run("MATCH (n:Person) RETURN n.name AS name", &mut graph);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::Str("Ada".to_string())));
    }

    #[test]
    fn expand_follows_relationship_direction() {
        let mut graph = Graph::new();
        run("CREATE (a:Person {name: 'A'})-[:KNOWS]->(b:Person {name: 'B'})", &mut graph);
        let rows = run("MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN a.name AS a, b.name AS b", &mut graph);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("a"), Some(&Value::Str("A".to_string())));
        assert_eq!(rows[0].get("b"), Some(&Value::Str("B".to_string())));
    }

    #[test]
    fn delete_non_detached_node_with_edges_errors() {
        let mut graph = Graph::new();
        run("CREATE (a:Person)-[:KNOWS]->(b:Person)", &mut graph);
        let query = parse("MATCH (a:Person) DELETE a").unwrap();
        let plan = planner::plan(&query).unwrap();
        let stats = graph.statistics();
        let plan = optimizer::optimize(plan, &stats, &OptimizerOptions::default());
        let params = BTreeMap::new();
        let functions = FunctionRegistry::new();
        let mut ctx = ExecCtx { graph: &mut graph, backend: None, params: &params, functions: &functions };
        let err = execute(&plan, &mut ctx).unwrap_err();
        assert!(matches!(err, Error::CannotDeleteNodeWithRelationships(_)));
    }

    #[test]
    fn detach_delete_removes_incident_edges() {
        let mut graph = Graph::new();
        run("CREATE (a:Person)-[:KNOWS]->(b:Person)", &mut graph);
        run("MATCH (a:Person) DETACH DELETE a", &mut graph);
        let rows = run("MATCH (n) RETURN n", &mut graph);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn merge_creates_once_then_matches() {
        let mut graph = Graph::new();
        run("MERGE (n:Person {name: 'Ada'})", &mut graph);
        run("MERGE (n:Person {name: 'Ada'})", &mut graph);
        let rows = run("MATCH (n:Person) RETURN n.name AS name", &mut graph);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn optional_match_nulls_out_unmatched_bindings() {
        let mut graph = Graph::new();
        run("CREATE (a:Person {name: 'A'})", &mut graph);
        let rows = run("MATCH (a:Person) OPTIONAL MATCH (a)-[:KNOWS]->(b) RETURN a.name AS a, b", &mut graph);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("b"), Some(&Value::Null));
    }

    #[test]
    fn aggregate_count_groups_by_remaining_columns() {
        let mut graph = Graph::new();
        run("CREATE (a:Person {team: 'x'}), (b:Person {team: 'x'}), (c:Person {team: 'y'})", &mut graph);
        let rows = run("MATCH (n:Person) RETURN n.team AS team, count(n) AS c ORDER BY team", &mut graph);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("c"), Some(&Value::Int(2)));
        assert_eq!(rows[1].get("c"), Some(&Value::Int(1)));
    }

    #[test]
    fn unwind_expands_one_row_per_list_item() {
        let mut graph = Graph::new();
        let rows = run("UNWIND [1, 2, 3] AS x RETURN x", &mut graph);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn union_deduplicates_unless_all() {
        let mut graph = Graph::new();
        let rows = run("RETURN 1 AS x UNION RETURN 1 AS x", &mut graph);
        assert_eq!(rows.len(), 1);
        let rows_all = run("RETURN 1 AS x UNION ALL RETURN 1 AS x", &mut graph);
        assert_eq!(rows_all.len(), 2);
    }
}
