//! Expression evaluation against a row context: three-valued scalar logic,
//! the built-in function/aggregate library, quantifiers, list
//! comprehensions, and the two ordering relations (`<`/`>`/... vs. `ORDER
//! BY`) the spec keeps deliberately distinct.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use corvusdb_api::{Crs, EdgeRef, NodeRef, PathValue, Point, Value};
use corvusdb_storage::Graph;

use crate::ast::*;
use crate::error::{Error, Result};

/// A row context: the variable-to-value mapping threaded through the
/// operator pipeline. Plain `BTreeMap` gives it structural `Eq`/`Hash`/`Ord`
/// for free, which `DISTINCT`, `UNION`, and grouping all lean on.
pub type Row = BTreeMap<String, Value>;

pub type CustomFunction = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// User-registered scalar functions, installed via the façade's
/// `register_function` and consulted by [`evaluate_function`] only after
/// every built-in name has been tried.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, CustomFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    pub fn register(&mut self, name: impl Into<String>, f: CustomFunction) {
        self.functions.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<&CustomFunction> {
        self.functions.get(name)
    }

    pub fn clear(&mut self) {
        self.functions.clear();
    }
}

/// Runs a nested query for `EXISTS { ... }` / `COUNT { ... }` / `CALL { ... }`,
/// seeded with the outer row's bindings. Implemented by the executor; kept as
/// a trait here so the evaluator does not need to depend on the executor
/// module (which itself depends on the evaluator for scalar expressions).
pub trait SubqueryRunner {
    fn run_subquery(&self, query: &Query, outer_row: &Row) -> Result<Vec<Row>>;
}

pub struct EvalContext<'a, 'r> {
    pub row: &'r Row,
    pub graph: &'a Graph,
    pub params: &'a BTreeMap<String, Value>,
    pub functions: &'a FunctionRegistry,
    pub subqueries: &'a dyn SubqueryRunner,
}

impl<'a, 'r> EvalContext<'a, 'r> {
    /// Rebinds the row to a fresh (possibly shorter-lived) one, keeping the
    /// same graph/params/functions/subqueries — used to evaluate an inner
    /// predicate or projection over a row extended with a comprehension or
    /// quantifier variable.
    pub fn with_row<'r2>(&self, row: &'r2 Row) -> EvalContext<'a, 'r2> {
        EvalContext { row, graph: self.graph, params: self.params, functions: self.functions, subqueries: self.subqueries }
    }
}

/// Evaluates `expr` to a [`Value`]. This is the single entry point for every
/// non-aggregate expression form; aggregate functions are evaluated
/// separately by the executor's grouping operator, which has visibility into
/// a whole partition rather than one row.
pub fn evaluate(expr: &Expression, ctx: &EvalContext) -> Result<Value> {
    match expr {
        Expression::Literal(lit) => Ok(literal_value(lit)),
        Expression::Variable(name) => {
            if name == "*" {
                return Ok(Value::Null);
            }
            Ok(ctx.row.get(name).cloned().unwrap_or(Value::Null))
        }
        Expression::Parameter(name) => Ok(ctx.params.get(name).cloned().unwrap_or(Value::Null)),
        Expression::Property(access) => evaluate_property(access, ctx),
        Expression::Binary(b) => evaluate_binary(b, ctx),
        Expression::Unary(u) => evaluate_unary(u, ctx),
        Expression::FunctionCall(call) => evaluate_function(call, ctx),
        Expression::Aggregate(agg) => {
            // An aggregate reached in row-at-a-time evaluation (e.g. nested
            // inside a non-aggregating expression context) has no partition
            // to reduce over; treat it as its empty-input identity.
            Err(Error::Runtime(format!(
                "aggregate function '{}' used outside of a grouping projection",
                agg.name
            )))
        }
        Expression::Case(case) => evaluate_case(case, ctx),
        Expression::ListComprehension(lc) => evaluate_list_comprehension(lc, ctx),
        Expression::Quantifier(q) => evaluate_quantifier(q, ctx),
        Expression::Exists(e) => evaluate_exists(e, ctx),
        Expression::CountSubquery(q) => {
            let rows = ctx.subqueries.run_subquery(q, ctx.row)?;
            Ok(Value::Int(rows.len() as i64))
        }
        Expression::Subscript { base, index } => evaluate_subscript(base, index, ctx),
        Expression::Slice { base, start, end } => evaluate_slice(base, start.as_deref(), end.as_deref(), ctx),
        Expression::ListLiteral(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, ctx)?);
            }
            Ok(Value::List(out))
        }
        Expression::MapLiteral(pairs) => {
            let mut map = BTreeMap::new();
            for (k, v) in pairs {
                map.insert(k.clone(), evaluate(v, ctx)?);
            }
            Ok(maybe_point(&map))
        }
        Expression::In { item, list } => evaluate_in(item, list, ctx),
    }
}

/// Evaluates `expr` under three-valued boolean semantics: `Some(b)` for a
/// definite true/false, `None` for NULL. Used by `Filter`/`WHERE`/pattern
/// predicates, which drop a row on either `None` or `Some(false)`.
pub fn evaluate_bool(expr: &Expression, ctx: &EvalContext) -> Result<Option<bool>> {
    Ok(value_to_bool3(&evaluate(expr, ctx)?))
}

fn value_to_bool3(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Null => None,
        _ => None,
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::float(*f),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

/// A map literal shaped like `{x:.., y:..}` / `{latitude:.., longitude:..}`
/// is lifted to a [`Value::Point`]; anything else (or invalid coordinates)
/// stays a plain map, mirroring the façade's native-value conversion rule.
fn maybe_point(map: &BTreeMap<String, Value>) -> Value {
    if let Some(point) = try_point_from_map(map) {
        return Value::Point(point);
    }
    Value::Map(map.clone())
}

pub fn try_point_from_map(map: &BTreeMap<String, Value>) -> Option<Point> {
    let keys: std::collections::BTreeSet<&str> = map.keys().map(String::as_str).collect();
    let num = |k: &str| map.get(k).and_then(Value::as_f64);
    if keys == ["x", "y"].into_iter().collect() {
        return Some(Point::cartesian(num("x")?, num("y")?));
    }
    if keys == ["x", "y", "z"].into_iter().collect() {
        return Some(Point::cartesian_3d(num("x")?, num("y")?, num("z")?));
    }
    if keys == ["latitude", "longitude"].into_iter().collect() {
        let (lat, lon) = (num("latitude")?, num("longitude")?);
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        return Some(Point::wgs84(lat, lon, None));
    }
    if keys == ["height", "latitude", "longitude"].into_iter().collect() {
        let (lat, lon, h) = (num("latitude")?, num("longitude")?, num("height")?);
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        return Some(Point::wgs84(lat, lon, Some(h)));
    }
    None
}

fn evaluate_property(access: &PropertyAccess, ctx: &EvalContext) -> Result<Value> {
    let base = evaluate(&access.base, ctx)?;
    property_of(&base, &access.key, ctx.graph)
}

/// Property access always re-reads the live graph for node/edge values
/// rather than trusting the snapshot carried inside the `Value::Node`/`Edge`,
/// so a `SET` earlier in the same pipeline is visible to a later read of the
/// same variable.
pub fn property_of(base: &Value, key: &str, graph: &Graph) -> Result<Value> {
    match base {
        Value::Node(n) => match graph.get_node(n.id) {
            Ok(node) => Ok(node.properties.get(key).cloned().unwrap_or(Value::Null)),
            Err(_) => Ok(n.properties.get(key).cloned().unwrap_or(Value::Null)),
        },
        Value::Edge(e) => match graph.get_edge(e.id) {
            Ok(edge) => Ok(edge.properties.get(key).cloned().unwrap_or(Value::Null)),
            Err(_) => Ok(e.properties.get(key).cloned().unwrap_or(Value::Null)),
        },
        Value::Map(m) => Ok(m.get(key).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(Error::Type(format!("cannot access property '{key}' on a {}", other.type_name()))),
    }
}

fn evaluate_unary(u: &UnaryExpression, ctx: &EvalContext) -> Result<Value> {
    match u.op {
        UnaryOperator::Not => match value_to_bool3(&evaluate(&u.operand, ctx)?) {
            Some(b) => Ok(Value::Bool(!b)),
            None => Ok(Value::Null),
        },
        UnaryOperator::Neg => match evaluate(&u.operand, ctx)? {
            Value::Null => Ok(Value::Null),
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::float(-f.0)),
            other => Err(Error::Type(format!("cannot negate a {}", other.type_name()))),
        },
        UnaryOperator::IsNull => Ok(Value::Bool(evaluate(&u.operand, ctx)?.is_null())),
        UnaryOperator::IsNotNull => Ok(Value::Bool(!evaluate(&u.operand, ctx)?.is_null())),
    }
}

fn evaluate_binary(b: &BinaryExpression, ctx: &EvalContext) -> Result<Value> {
    use BinaryOperator::*;
    // Logical operators short-circuit only in the "already decided" sense
    // three-valued logic allows (e.g. `false AND x` is false regardless of
    // x); everything else evaluates both sides.
    match b.op {
        And => return eval_and(&b.left, &b.right, ctx),
        Or => return eval_or(&b.left, &b.right, ctx),
        Xor => {
            let l = value_to_bool3(&evaluate(&b.left, ctx)?);
            let r = value_to_bool3(&evaluate(&b.right, ctx)?);
            return Ok(match (l, r) {
                (Some(l), Some(r)) => Value::Bool(l ^ r),
                _ => Value::Null,
            });
        }
        _ => {}
    }
    let left = evaluate(&b.left, ctx)?;
    let right = evaluate(&b.right, ctx)?;
    match b.op {
        Eq => Ok(three_valued_eq(&left, &right, true)),
        Ne => Ok(three_valued_eq(&left, &right, false)),
        Lt => Ok(compare_op(&left, &right, Ordering::Less, false)),
        Gt => Ok(compare_op(&left, &right, Ordering::Greater, false)),
        Le => Ok(compare_op(&left, &right, Ordering::Less, true)),
        Ge => Ok(compare_op(&left, &right, Ordering::Greater, true)),
        Add => eval_add(&left, &right),
        Sub => eval_numeric(&left, &right, |a, b| a - b, |a, b| a - b),
        Mul => eval_numeric(&left, &right, |a, b| a * b, |a, b| a * b),
        Div => eval_div(&left, &right),
        Mod => eval_mod(&left, &right),
        Pow => eval_pow(&left, &right),
        StartsWith => eval_string_match(&left, &right, |a, b| a.starts_with(b)),
        EndsWith => eval_string_match(&left, &right, |a, b| a.ends_with(b)),
        Contains => eval_string_match(&left, &right, |a, b| a.contains(b)),
        And | Or | Xor => unreachable!("handled above"),
    }
}

fn eval_and(left: &Expression, right: &Expression, ctx: &EvalContext) -> Result<Value> {
    let l = value_to_bool3(&evaluate(left, ctx)?);
    if l == Some(false) {
        return Ok(Value::Bool(false));
    }
    let r = value_to_bool3(&evaluate(right, ctx)?);
    if r == Some(false) {
        return Ok(Value::Bool(false));
    }
    Ok(match (l, r) {
        (Some(true), Some(true)) => Value::Bool(true),
        _ => Value::Null,
    })
}

fn eval_or(left: &Expression, right: &Expression, ctx: &EvalContext) -> Result<Value> {
    let l = value_to_bool3(&evaluate(left, ctx)?);
    if l == Some(true) {
        return Ok(Value::Bool(true));
    }
    let r = value_to_bool3(&evaluate(right, ctx)?);
    if r == Some(true) {
        return Ok(Value::Bool(true));
    }
    Ok(match (l, r) {
        (Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    })
}

/// `=`/`<>` coerce Int/Float numerically but otherwise compare structurally;
/// NULL on either side always yields NULL, per spec.
fn three_valued_eq(left: &Value, right: &Value, want_eq: bool) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Null;
    }
    let eq = values_equal(left, right);
    Value::Bool(if want_eq { eq } else { !eq })
}

pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) => (*a as f64) == b.0,
        (Value::Float(a), Value::Int(b)) => a.0 == (*b as f64),
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| values_equal(v, bv)))
        }
        _ => left == right,
    }
}

/// `<`/`>`/`<=`/`>=`: NULL on either side yields NULL; incomparable types
/// (e.g. string vs. int) yield `false` rather than erroring.
fn compare_op(left: &Value, right: &Value, wanted: Ordering, or_equal: bool) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Null;
    }
    match numeric_cmp_or_typed(left, right) {
        Some(ord) => Value::Bool(ord == wanted || (or_equal && ord == Ordering::Equal)),
        None => Value::Bool(false),
    }
}

fn numeric_cmp_or_typed(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.0.partial_cmp(&b.0),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(&b.0),
        (Value::Float(a), Value::Int(b)) => a.0.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::Duration(a), Value::Duration(b)) => a.partial_cmp(b),
        (Value::Distance(a), Value::Distance(b)) => a.0.partial_cmp(&b.0),
        (Value::List(a), Value::List(b)) => compare_lists(a, b),
        _ => None,
    }
}

fn compare_lists(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        match numeric_cmp_or_typed(x, y) {
            Some(Ordering::Equal) => continue,
            Some(ord) => return Some(ord),
            None => return None,
        }
    }
    Some(a.len().cmp(&b.len()))
}

/// The ordering relation used by `ORDER BY`, distinct from `compare_op`:
/// total over every value (never refuses to compare), and NULLs always sort
/// last in ascending order (an explicit, tested design choice — see §9 of
/// the spec this engine implements).
pub fn order_compare(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => numeric_cmp_or_typed(left, right).unwrap_or_else(|| type_rank(left).cmp(&type_rank(right))),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::Str(_) => 3,
        Value::List(_) => 4,
        Value::Map(_) => 5,
        Value::Date(_) => 6,
        Value::Time(_) => 7,
        Value::DateTime(_) => 8,
        Value::Duration(_) => 9,
        Value::Point(_) => 10,
        Value::Distance(_) => 11,
        Value::Node(_) => 12,
        Value::Edge(_) => 13,
        Value::Path(_) => 14,
    }
}

fn eval_add(left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
        return Ok(Value::Str(format!("{}{}", stringify_value(left), stringify_value(right))));
    }
    if let (Value::List(a), Value::List(b)) = (left, right) {
        let mut out = a.clone();
        out.extend(b.clone());
        return Ok(Value::List(out));
    }
    eval_numeric(left, right, |a, b| a + b, |a, b| a + b)
}

fn eval_numeric(left: &Value, right: &Value, fi: impl Fn(i64, i64) -> i64, ff: impl Fn(f64, f64) -> f64) -> Result<Value> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(fi(*a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::float(ff(*a as f64, b.0))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::float(ff(a.0, *b as f64))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::float(ff(a.0, b.0))),
        _ => Err(Error::Type(format!("arithmetic requires numeric operands, got {} and {}", left.type_name(), right.type_name()))),
    }
}

fn eval_div(left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let (a, b) = (numeric_f64(left)?, numeric_f64(right)?);
    if b == 0.0 {
        return Ok(Value::Null);
    }
    Ok(Value::float(a / b))
}

fn eval_mod(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                Ok(Value::Null)
            } else {
                Ok(Value::Int(a % b))
            }
        }
        _ => {
            let (a, b) = (numeric_f64(left)?, numeric_f64(right)?);
            if b == 0.0 {
                Ok(Value::Null)
            } else {
                Ok(Value::float(a % b))
            }
        }
    }
}

fn eval_pow(left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let (a, b) = (numeric_f64(left)?, numeric_f64(right)?);
    Ok(Value::float(a.powf(b)))
}

fn numeric_f64(v: &Value) -> Result<f64> {
    v.as_f64().ok_or_else(|| Error::Type(format!("expected a number, got {}", v.type_name())))
}

fn stringify_value(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.0.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => format!("{other:?}"),
    }
}

fn eval_string_match(left: &Value, right: &Value, f: impl Fn(&str, &str) -> bool) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    match (left.as_str(), right.as_str()) {
        (Some(a), Some(b)) => Ok(Value::Bool(f(a, b))),
        _ => Err(Error::Type("string matching operators require string operands".into())),
    }
}

fn evaluate_in(item: &Expression, list: &Expression, ctx: &EvalContext) -> Result<Value> {
    let item_v = evaluate(item, ctx)?;
    let list_v = evaluate(list, ctx)?;
    if item_v.is_null() || list_v.is_null() {
        return Ok(Value::Null);
    }
    let Value::List(items) = list_v else {
        return Err(Error::Type("IN requires a list on the right-hand side".into()));
    };
    let mut saw_null = false;
    for candidate in &items {
        if candidate.is_null() {
            saw_null = true;
            continue;
        }
        if values_equal(&item_v, candidate) {
            return Ok(Value::Bool(true));
        }
    }
    if saw_null {
        Ok(Value::Null)
    } else {
        Ok(Value::Bool(false))
    }
}

fn evaluate_subscript(base: &Expression, index: &Expression, ctx: &EvalContext) -> Result<Value> {
    let base_v = evaluate(base, ctx)?;
    let index_v = evaluate(index, ctx)?;
    if base_v.is_null() || index_v.is_null() {
        return Ok(Value::Null);
    }
    match (&base_v, &index_v) {
        (Value::List(items), Value::Int(i)) => {
            let idx = normalize_index(*i, items.len());
            Ok(idx.and_then(|i| items.get(i).cloned()).unwrap_or(Value::Null))
        }
        (Value::Map(m), _) => {
            let key = index_v.as_str().ok_or_else(|| Error::Type("map subscript requires a string key".into()))?;
            Ok(m.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(*i, chars.len());
            Ok(idx.and_then(|i| chars.get(i)).map(|c| Value::Str(c.to_string())).unwrap_or(Value::Null))
        }
        _ => Err(Error::Type(format!("cannot subscript a {}", base_v.type_name()))),
    }
}

fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let idx = if i < 0 { len as i64 + i } else { i };
    if idx < 0 || idx as usize >= len {
        None
    } else {
        Some(idx as usize)
    }
}

fn evaluate_slice(
    base: &Expression,
    start: Option<&Expression>,
    end: Option<&Expression>,
    ctx: &EvalContext,
) -> Result<Value> {
    let base_v = evaluate(base, ctx)?;
    if base_v.is_null() {
        return Ok(Value::Null);
    }
    let Value::List(items) = &base_v else {
        return Err(Error::Type(format!("cannot slice a {}", base_v.type_name())));
    };
    let len = items.len() as i64;
    let start_i = match start {
        Some(e) => match evaluate(e, ctx)? {
            Value::Int(i) => i,
            Value::Null => 0,
            _ => return Err(Error::Type("slice bounds must be integers".into())),
        },
        None => 0,
    };
    let end_i = match end {
        Some(e) => match evaluate(e, ctx)? {
            Value::Int(i) => i,
            Value::Null => len,
            _ => return Err(Error::Type("slice bounds must be integers".into())),
        },
        None => len,
    };
    let clamp = |i: i64| -> usize {
        let i = if i < 0 { (len + i).max(0) } else { i.min(len) };
        i as usize
    };
    let (s, e) = (clamp(start_i), clamp(end_i));
    if s >= e {
        return Ok(Value::List(vec![]));
    }
    Ok(Value::List(items[s..e].to_vec()))
}

fn evaluate_case(case: &CaseExpression, ctx: &EvalContext) -> Result<Value> {
    let subject = case.subject.as_ref().map(|s| evaluate(s, ctx)).transpose()?;
    for (when, then) in &case.whens {
        let matched = match &subject {
            Some(subj) => {
                let cand = evaluate(when, ctx)?;
                !subj.is_null() && !cand.is_null() && values_equal(subj, &cand)
            }
            None => value_to_bool3(&evaluate(when, ctx)?) == Some(true),
        };
        if matched {
            return evaluate(then, ctx);
        }
    }
    match &case.else_ {
        Some(e) => evaluate(e, ctx),
        None => Ok(Value::Null),
    }
}

fn evaluate_list_comprehension(lc: &ListComprehension, ctx: &EvalContext) -> Result<Value> {
    let list = evaluate(&lc.list, ctx)?;
    let Value::List(items) = list else {
        if list.is_null() {
            return Ok(Value::Null);
        }
        return Err(Error::Type("list comprehension requires a list".into()));
    };
    let mut out = Vec::new();
    for item in items {
        let mut row = ctx.row.clone();
        row.insert(lc.variable.clone(), item.clone());
        let inner_ctx = ctx.with_row(&row);
        if let Some(pred) = &lc.predicate {
            if evaluate_bool(pred, &inner_ctx)? != Some(true) {
                continue;
            }
        }
        match &lc.projection {
            Some(proj) => out.push(evaluate(proj, &inner_ctx)?),
            None => out.push(item),
        }
    }
    Ok(Value::List(out))
}

fn evaluate_quantifier(q: &QuantifierExpression, ctx: &EvalContext) -> Result<Value> {
    let list = evaluate(&q.list, ctx)?;
    let Value::List(items) = list else {
        if list.is_null() {
            return Ok(Value::Null);
        }
        return Err(Error::Type("quantifier requires a list".into()));
    };
    let mut true_count = 0usize;
    let mut any_null = false;
    for item in &items {
        let mut row = ctx.row.clone();
        row.insert(q.variable.clone(), item.clone());
        let inner_ctx = ctx.with_row(&row);
        match evaluate_bool(&q.predicate, &inner_ctx)? {
            Some(true) => true_count += 1,
            Some(false) => {}
            None => any_null = true,
        }
    }
    let result = match q.kind {
        QuantifierKind::All => true_count == items.len() && !any_null,
        QuantifierKind::Any => true_count > 0,
        QuantifierKind::None => true_count == 0 && !any_null,
        QuantifierKind::Single => true_count == 1,
    };
    Ok(Value::Bool(result))
}

fn evaluate_exists(e: &ExistsExpression, ctx: &EvalContext) -> Result<Value> {
    if let Some(query) = &e.query {
        let rows = ctx.subqueries.run_subquery(query, ctx.row)?;
        return Ok(Value::Bool(!rows.is_empty()));
    }
    let inner = e.expression.as_ref().expect("parser always sets one of query/expression");
    Ok(Value::Bool(!evaluate(inner, ctx)?.is_null()))
}

// --- Functions --------------------------------------------------------

fn evaluate_function(call: &FunctionCall, ctx: &EvalContext) -> Result<Value> {
    let mut args = Vec::with_capacity(call.args.len());
    for a in &call.args {
        args.push(evaluate(a, ctx)?);
    }
    let name = call.name.to_ascii_lowercase();
    if let Some(v) = call_builtin(&name, &args, ctx)? {
        return Ok(v);
    }
    if let Some(f) = ctx.functions.get(&call.name) {
        return f(&args);
    }
    Err(Error::Runtime(format!("unknown function '{}'", call.name)))
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

fn call_builtin(name: &str, args: &[Value], ctx: &EvalContext) -> Result<Option<Value>> {
    Ok(Some(match name {
        "coalesce" => return Ok(Some(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))),
        "length" => fn_length(&arg(args, 0))?,
        "head" => fn_head_last(&arg(args, 0), true)?,
        "last" => fn_head_last(&arg(args, 0), false)?,
        "tail" => fn_tail(&arg(args, 0))?,
        "reverse" => fn_reverse(&arg(args, 0))?,
        "size" => fn_size(&arg(args, 0))?,
        "range" => fn_range(args)?,
        "nodes" => fn_path_nodes(&arg(args, 0))?,
        "relationships" => fn_path_rels(&arg(args, 0))?,
        "abs" => numeric_unary(&arg(args, 0), i64::abs, f64::abs)?,
        "ceil" => match arg(args, 0) {
            Value::Null => Value::Null,
            v => Value::float(numeric_f64(&v)?.ceil()),
        },
        "floor" => match arg(args, 0) {
            Value::Null => Value::Null,
            v => Value::float(numeric_f64(&v)?.floor()),
        },
        "round" => fn_round(args)?,
        "sign" => match arg(args, 0) {
            Value::Null => Value::Null,
            Value::Int(i) => Value::Int(i.signum()),
            v => Value::Int(numeric_f64(&v)?.signum() as i64),
        },
        "sqrt" => match arg(args, 0) {
            Value::Null => Value::Null,
            v => {
                let f = numeric_f64(&v)?;
                if f < 0.0 {
                    Value::Null
                } else {
                    Value::float(f.sqrt())
                }
            }
        },
        "pow" => {
            let (a, b) = (arg(args, 0), arg(args, 1));
            if a.is_null() || b.is_null() {
                Value::Null
            } else {
                Value::float(numeric_f64(&a)?.powf(numeric_f64(&b)?))
            }
        }
        "rand" => Value::float(rand_f64()),
        "substring" => fn_substring(args)?,
        "upper" => fn_string_map(&arg(args, 0), str::to_uppercase)?,
        "lower" => fn_string_map(&arg(args, 0), str::to_lowercase)?,
        "trim" => fn_string_map(&arg(args, 0), |s| s.trim().to_string())?,
        "tointeger" => fn_to_integer(&arg(args, 0))?,
        "tofloat" => fn_to_float(&arg(args, 0))?,
        "tostring" => fn_to_string(&arg(args, 0)),
        "exists" => match arg(args, 0) {
            Value::Null => Value::Bool(false),
            other => Value::Bool(!other.is_null()),
        },
        "isempty" => fn_is_empty(&arg(args, 0))?,
        "id" => fn_id(&arg(args, 0))?,
        "labels" => fn_labels(&arg(args, 0), ctx.graph)?,
        "type" => fn_type(&arg(args, 0))?,
        "point" => fn_point(&arg(args, 0))?,
        "distance" => fn_distance(&arg(args, 0), &arg(args, 1))?,
        _ => return Ok(None),
    }))
}

fn fn_length(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::Path(p) => Ok(Value::Int(p.length() as i64)),
        other => Err(Error::Type(format!("length() does not accept a {}", other.type_name()))),
    }
}

fn fn_head_last(v: &Value, head: bool) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::List(items) => Ok(if head { items.first() } else { items.last() }.cloned().unwrap_or(Value::Null)),
        Value::Path(p) => {
            if p.nodes.is_empty() {
                return Ok(Value::Null);
            }
            let n = if head { p.nodes.first() } else { p.nodes.last() }.unwrap().clone();
            Ok(Value::Node(n))
        }
        other => Err(Error::Type(format!("head/last does not accept a {}", other.type_name()))),
    }
}

fn fn_tail(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::List(items) => Ok(Value::List(items.iter().skip(1).cloned().collect())),
        other => Err(Error::Type(format!("tail() does not accept a {}", other.type_name()))),
    }
}

fn fn_reverse(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Str(s.chars().rev().collect())),
        Value::List(items) => {
            let mut items = items.clone();
            items.reverse();
            Ok(Value::List(items))
        }
        other => Err(Error::Type(format!("reverse() does not accept a {}", other.type_name()))),
    }
}

fn fn_size(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(Error::Type(format!("size() does not accept a {}", other.type_name()))),
    }
}

fn fn_range(args: &[Value]) -> Result<Value> {
    let start = arg(args, 0);
    let end = arg(args, 1);
    let step = arg(args, 2);
    if start.is_null() || end.is_null() {
        return Ok(Value::Null);
    }
    let start = match start {
        Value::Int(i) => i,
        _ => return Err(Error::Type("range() requires integer bounds".into())),
    };
    let end = match end {
        Value::Int(i) => i,
        _ => return Err(Error::Type("range() requires integer bounds".into())),
    };
    let step = match step {
        Value::Null => 1,
        Value::Int(i) => i,
        _ => return Err(Error::Type("range() step must be an integer".into())),
    };
    if step == 0 {
        return Err(Error::Value("range() step must not be zero".into()));
    }
    let mut out = Vec::new();
    let mut i = start;
    if step > 0 {
        while i <= end {
            out.push(Value::Int(i));
            i += step;
        }
    } else {
        while i >= end {
            out.push(Value::Int(i));
            i += step;
        }
    }
    Ok(Value::List(out))
}

fn fn_path_nodes(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Path(p) => Ok(Value::List(p.nodes.iter().cloned().map(Value::Node).collect())),
        other => Err(Error::Type(format!("nodes() requires a path, got {}", other.type_name()))),
    }
}

fn fn_path_rels(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Path(p) => Ok(Value::List(p.relationships.iter().cloned().map(Value::Edge).collect())),
        other => Err(Error::Type(format!("relationships() requires a path, got {}", other.type_name()))),
    }
}

fn numeric_unary(v: &Value, fi: impl Fn(i64) -> i64, ff: impl Fn(f64) -> f64) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Int(fi(*i))),
        Value::Float(f) => Ok(Value::float(ff(f.0))),
        other => Err(Error::Type(format!("expected a number, got {}", other.type_name()))),
    }
}

/// Banker's rounding (round-half-to-even), as the spec mandates.
fn fn_round(args: &[Value]) -> Result<Value> {
    let v = arg(args, 0);
    if v.is_null() {
        return Ok(Value::Null);
    }
    let x = numeric_f64(&v)?;
    let precision = match arg(args, 1) {
        Value::Null => 0,
        Value::Int(i) => i,
        _ => return Err(Error::Type("round() precision must be an integer".into())),
    };
    let factor = 10f64.powi(precision as i32);
    Ok(Value::float(round_half_to_even(x * factor) / factor))
}

fn round_half_to_even(x: f64) -> f64 {
    let floor = x.floor();
    let diff = x - floor;
    if diff < 0.5 {
        floor
    } else if diff > 0.5 {
        floor + 1.0
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

fn rand_f64() -> f64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0.0..1.0)
}

fn fn_substring(args: &[Value]) -> Result<Value> {
    let s = arg(args, 0);
    if s.is_null() {
        return Ok(Value::Null);
    }
    let s = s.as_str().ok_or_else(|| Error::Type("substring() requires a string".into()))?;
    let chars: Vec<char> = s.chars().collect();
    let start = match arg(args, 1) {
        Value::Int(i) => i.max(0) as usize,
        _ => return Err(Error::Type("substring() start must be an integer".into())),
    }
    .min(chars.len());
    let len = match arg(args, 2) {
        Value::Null => chars.len() - start,
        Value::Int(i) => (i.max(0) as usize).min(chars.len() - start),
        _ => return Err(Error::Type("substring() length must be an integer".into())),
    };
    Ok(Value::Str(chars[start..start + len].iter().collect()))
}

fn fn_string_map(v: &Value, f: impl Fn(&str) -> String) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Str(f(s))),
        other => Err(Error::Type(format!("expected a string, got {}", other.type_name()))),
    }
}

fn fn_to_integer(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => Ok(Value::Int(f.0.trunc() as i64)),
        Value::Str(s) => Ok(s.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Null)),
        Value::Bool(b) => Ok(Value::Int(if *b { 1 } else { 0 })),
        other => Err(Error::Type(format!("toInteger() does not accept a {}", other.type_name()))),
    }
}

fn fn_to_float(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Str(s) => Ok(s.trim().parse::<f64>().map(Value::float).unwrap_or(Value::Null)),
        other => Err(Error::Type(format!("toFloat() does not accept a {}", other.type_name()))),
    }
}

fn fn_to_string(v: &Value) -> Value {
    match v {
        Value::Null => Value::Null,
        Value::Str(s) => Value::Str(s.clone()),
        Value::Int(i) => Value::Str(i.to_string()),
        Value::Float(f) => Value::Str(f.0.to_string()),
        Value::Bool(b) => Value::Str(b.to_string()),
        Value::Date(d) => Value::Str(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => Value::Str(dt.to_rfc3339()),
        Value::Duration(d) => Value::Str(d.to_iso8601()),
        other => Value::Str(format!("{other:?}")),
    }
}

fn fn_is_empty(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Bool(s.is_empty())),
        Value::List(items) => Ok(Value::Bool(items.is_empty())),
        Value::Map(m) => Ok(Value::Bool(m.is_empty())),
        other => Err(Error::Type(format!("isEmpty() does not accept a {}", other.type_name()))),
    }
}

fn fn_id(v: &Value) -> Result<Value> {
    match v {
        Value::Node(n) => Ok(Value::Int(n.id.as_u64() as i64)),
        Value::Edge(e) => Ok(Value::Int(e.id.as_u64() as i64)),
        Value::Null => Ok(Value::Null),
        other => Err(Error::Type(format!("id() requires a node or relationship, got {}", other.type_name()))),
    }
}

fn fn_labels(v: &Value, graph: &Graph) -> Result<Value> {
    match v {
        Value::Node(n) => {
            let labels = graph.get_node(n.id).map(|node| node.labels.clone()).unwrap_or_else(|_| n.labels.clone());
            Ok(Value::List(labels.into_iter().map(Value::Str).collect()))
        }
        Value::Null => Ok(Value::Null),
        other => Err(Error::Type(format!("labels() requires a node, got {}", other.type_name()))),
    }
}

fn fn_type(v: &Value) -> Result<Value> {
    match v {
        Value::Edge(e) => Ok(Value::Str(e.rel_type.clone())),
        Value::Null => Ok(Value::Null),
        other => Err(Error::Type(format!("type() requires a relationship, got {}", other.type_name()))),
    }
}

fn fn_point(v: &Value) -> Result<Value> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Map(m) => try_point_from_map(m)
            .map(Value::Point)
            .ok_or_else(|| Error::Value("point() map does not match a known coordinate shape".into())),
        other => Err(Error::Type(format!("point() requires a map, got {}", other.type_name()))),
    }
}

fn fn_distance(a: &Value, b: &Value) -> Result<Value> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    let (Value::Point(p1), Value::Point(p2)) = (a, b) else {
        return Err(Error::Type("distance() requires two points".into()));
    };
    if p1.crs != p2.crs {
        return Err(Error::Value("distance() requires points of the same CRS".into()));
    }
    let meters = match p1.crs {
        Crs::Wgs84 => p1.haversine_distance(p2),
        Crs::Cartesian | Crs::Cartesian3D => p1.euclidean_distance(p2),
    };
    Ok(Value::distance(meters))
}

// --- Aggregates ---------------------------------------------------------

/// Reduces one partition's worth of evaluated argument values for a single
/// aggregate expression. Kept separate from scalar evaluation because
/// aggregates see a whole group, not one row; the executor's `Project`
/// operator calls this once per group per aggregate item.
pub fn reduce_aggregate(name: &str, distinct: bool, values: Vec<Value>, extra_args: &[Value]) -> Result<Value> {
    let name = name.to_ascii_lowercase();
    let values: Vec<Value> = if distinct {
        let mut seen: Vec<Value> = Vec::new();
        values
            .into_iter()
            .filter(|v| {
                if seen.iter().any(|s| values_equal(s, v)) {
                    false
                } else {
                    seen.push(v.clone());
                    true
                }
            })
            .collect()
    } else {
        values
    };
    match name.as_str() {
        "count" => Ok(Value::Int(values.iter().filter(|v| !v.is_null()).count() as i64)),
        "collect" => Ok(Value::List(values.into_iter().filter(|v| !v.is_null()).collect())),
        "sum" => {
            let nums: Vec<f64> = non_null_numbers(&values)?;
            if nums.is_empty() {
                return Ok(Value::Int(0));
            }
            if values.iter().all(|v| matches!(v, Value::Int(_) | Value::Null)) {
                Ok(Value::Int(nums.iter().map(|n| *n as i64).sum()))
            } else {
                Ok(Value::float(nums.iter().sum()))
            }
        }
        "avg" => {
            let nums = non_null_numbers(&values)?;
            if nums.is_empty() {
                return Ok(Value::Null);
            }
            Ok(Value::float(nums.iter().sum::<f64>() / nums.len() as f64))
        }
        "min" => Ok(fold_extreme(values, Ordering::Less)),
        "max" => Ok(fold_extreme(values, Ordering::Greater)),
        "stdev" => Ok(std_dev(&values, false)?),
        "stdevp" => Ok(std_dev(&values, true)?),
        "percentiledisc" => percentile(&values, extra_args, false),
        "percentilecont" => percentile(&values, extra_args, true),
        other => Err(Error::Runtime(format!("unknown aggregate function '{other}'"))),
    }
}

fn non_null_numbers(values: &[Value]) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for v in values {
        if v.is_null() {
            continue;
        }
        out.push(v.as_f64().ok_or_else(|| Error::Type(format!("aggregate requires numeric input, got {}", v.type_name())))?);
    }
    Ok(out)
}

fn fold_extreme(values: Vec<Value>, wanted: Ordering) -> Value {
    let mut best: Option<Value> = None;
    for v in values {
        if v.is_null() {
            continue;
        }
        best = Some(match best {
            None => v,
            Some(cur) => {
                if order_compare(&v, &cur) == wanted {
                    v
                } else {
                    cur
                }
            }
        });
    }
    best.unwrap_or(Value::Null)
}

fn std_dev(values: &[Value], population: bool) -> Result<Value> {
    let nums = non_null_numbers(values)?;
    let n = nums.len();
    if (population && n == 0) || (!population && n < 2) {
        return Ok(Value::Null);
    }
    let mean = nums.iter().sum::<f64>() / n as f64;
    let sum_sq: f64 = nums.iter().map(|x| (x - mean).powi(2)).sum();
    let denom = if population { n as f64 } else { (n - 1) as f64 };
    Ok(Value::float((sum_sq / denom).sqrt()))
}

fn percentile(values: &[Value], extra_args: &[Value], continuous: bool) -> Result<Value> {
    let mut nums = non_null_numbers(values)?;
    if nums.is_empty() {
        return Ok(Value::Null);
    }
    nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let p = extra_args.first().and_then(Value::as_f64).ok_or_else(|| Error::Type("percentile requires a numeric percentile argument".into()))?;
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::Value("percentile argument must be in [0, 1]".into()));
    }
    let n = nums.len();
    if continuous {
        let rank = p * (n - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            return Ok(Value::float(nums[lo]));
        }
        let frac = rank - lo as f64;
        Ok(Value::float(nums[lo] * (1.0 - frac) + nums[hi] * frac))
    } else {
        let idx = ((p * n as f64) as usize).min(n - 1);
        Ok(Value::float(nums[idx]))
    }
}

/// A synthetic name for an unaliased non-trivial expression in a projection,
/// matching the spec's `CASE ... END_0` scheme: stable within one `Project`
/// by argument order.
pub fn synthetic_column_name(expr: &Expression, index: usize) -> String {
    format!("{}_{index}", describe_expression(expr))
}

fn describe_expression(expr: &Expression) -> String {
    match expr {
        Expression::FunctionCall(f) => f.name.clone(),
        Expression::Aggregate(a) => a.name.clone(),
        Expression::Case(_) => "CASE ... END".to_string(),
        Expression::Binary(_) => "expr".to_string(),
        _ => "expr".to_string(),
    }
}

/// Unaliased simple-variable or property-access projection items are named
/// after their source, per spec (`v` stays `v`; `v.p` stays `p`... actually
/// the spec's own example projects `r.since` under the alias `since` only
/// when aliased; unaliased it keeps the full `v.p` form expected by a
/// Cypher-literate caller).
pub fn default_column_name(expr: &Expression) -> Option<String> {
    match expr {
        Expression::Variable(name) => Some(name.clone()),
        Expression::Property(access) => match &access.base {
            Expression::Variable(v) => Some(format!("{v}.{}", access.key)),
            _ => None,
        },
        _ => None,
    }
}

pub fn node_ref_from_graph(graph: &Graph, id: corvusdb_api::NodeId) -> Result<NodeRef> {
    let node = graph.get_node(id).map_err(|e| Error::NotFound(e.to_string()))?;
    Ok(NodeRef { id: node.id, labels: node.labels.clone(), properties: node.properties.clone() })
}

pub fn edge_ref_from_graph(graph: &Graph, id: corvusdb_api::EdgeId) -> Result<EdgeRef> {
    let edge = graph.get_edge(id).map_err(|e| Error::NotFound(e.to_string()))?;
    Ok(EdgeRef { id: edge.id, rel_type: edge.rel_type.clone(), src: edge.src, dst: edge.dst, properties: edge.properties.clone() })
}

pub fn build_path(nodes: Vec<NodeRef>, relationships: Vec<EdgeRef>) -> PathValue {
    PathValue { nodes, relationships }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvusdb_storage::Graph as StorageGraph;

    struct NoSubqueries;
    impl SubqueryRunner for NoSubqueries {
        fn run_subquery(&self, _query: &Query, _outer_row: &Row) -> Result<Vec<Row>> {
            Ok(vec![])
        }
    }

    fn ctx<'a>(row: &'a Row, graph: &'a StorageGraph, params: &'a BTreeMap<String, Value>, functions: &'a FunctionRegistry, sub: &'a NoSubqueries) -> EvalContext<'a, 'a> {
        EvalContext { row, graph, params, functions, subqueries: sub }
    }

    #[test]
    fn null_propagates_through_and_or_xor() {
        let row = Row::new();
        let graph = StorageGraph::new();
        let params = BTreeMap::new();
        let funcs = FunctionRegistry::new();
        let sub = NoSubqueries;
        let c = ctx(&row, &graph, &params, &funcs, &sub);

        let not_null = Expression::Unary(Box::new(UnaryExpression { op: UnaryOperator::Not, operand: Expression::Literal(Literal::Null) }));
        assert_eq!(evaluate(&not_null, &c).unwrap(), Value::Null);

        let null_and_false = Expression::Binary(Box::new(BinaryExpression {
            op: BinaryOperator::And,
            left: Expression::Literal(Literal::Null),
            right: Expression::Literal(Literal::Bool(false)),
        }));
        assert_eq!(evaluate(&null_and_false, &c).unwrap(), Value::Bool(false));

        let null_or_true = Expression::Binary(Box::new(BinaryExpression {
            op: BinaryOperator::Or,
            left: Expression::Literal(Literal::Null),
            right: Expression::Literal(Literal::Bool(true)),
        }));
        assert_eq!(evaluate(&null_or_true, &c).unwrap(), Value::Bool(true));
    }

    #[test]
    fn division_by_zero_is_null() {
        let row = Row::new();
        let graph = StorageGraph::new();
        let params = BTreeMap::new();
        let funcs = FunctionRegistry::new();
        let sub = NoSubqueries;
        let c = ctx(&row, &graph, &params, &funcs, &sub);
        let expr = Expression::Binary(Box::new(BinaryExpression {
            op: BinaryOperator::Div,
            left: Expression::Literal(Literal::Int(1)),
            right: Expression::Literal(Literal::Int(0)),
        }));
        assert_eq!(evaluate(&expr, &c).unwrap(), Value::Null);
    }

    #[test]
    fn order_compare_puts_nulls_last() {
        assert_eq!(order_compare(&Value::Null, &Value::Int(1)), Ordering::Greater);
        assert_eq!(order_compare(&Value::Int(1), &Value::Null), Ordering::Less);
    }

    #[test]
    fn in_operator_three_valued() {
        let row = Row::new();
        let graph = StorageGraph::new();
        let params = BTreeMap::new();
        let funcs = FunctionRegistry::new();
        let sub = NoSubqueries;
        let c = ctx(&row, &graph, &params, &funcs, &sub);
        let list = Expression::ListLiteral(vec![Expression::Literal(Literal::Int(1)), Expression::Literal(Literal::Null)]);
        let expr = Expression::In { item: Box::new(Expression::Literal(Literal::Int(2))), list: Box::new(list) };
        assert_eq!(evaluate(&expr, &c).unwrap(), Value::Null);
    }

    #[test]
    fn round_half_to_even() {
        assert_eq!(round_half_to_even(0.5), 0.0);
        assert_eq!(round_half_to_even(1.5), 2.0);
        assert_eq!(round_half_to_even(2.5), 2.0);
    }
}
