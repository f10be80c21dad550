//! Typed predicate accumulation for read queries.
//!
//! Callers push `(column, operator, value)` predicates; `build` renders a
//! statement whose every value is a positional parameter. Substring patterns
//! carry their `%` wildcards inside the bound value, never in the SQL text.

use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gte,
    Lte,
    Like,
}

impl Op {
    fn render(self, column: &str, placeholder: &str) -> String {
        match self {
            Op::Eq => format!("{column} = {placeholder}"),
            Op::Gte => format!("{column} >= {placeholder}"),
            Op::Lte => format!("{column} <= {placeholder}"),
            Op::Like => format!("{column} LIKE {placeholder} ESCAPE '\\'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: &'static str,
    pub op: Op,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: &'static str, op: Op, value: impl Into<Value>) -> Self {
        Self {
            column,
            op,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    All(Predicate),
    Any(Vec<Predicate>),
}

/// Escape LIKE metacharacters so user text matches literally.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `%text%` with `text` escaped.
pub fn contains_pattern(text: &str) -> String {
    format!("%{}%", escape_like(text))
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    select: String,
    clauses: Vec<Clause>,
    order_by: Option<&'static str>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl QueryBuilder {
    /// `select` is everything before the WHERE clause.
    pub fn new(select: impl Into<String>) -> Self {
        Self {
            select: select.into(),
            clauses: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn push(&mut self, predicate: Predicate) -> &mut Self {
        self.clauses.push(Clause::All(predicate));
        self
    }

    /// AND-ed predicate applied only when `value` is present.
    pub fn push_opt<V: Into<Value>>(
        &mut self,
        column: &'static str,
        op: Op,
        value: Option<V>,
    ) -> &mut Self {
        if let Some(v) = value {
            self.push(Predicate::new(column, op, v));
        }
        self
    }

    /// Predicates OR-ed together as one AND-ed group. Empty groups are dropped.
    pub fn push_any(&mut self, predicates: Vec<Predicate>) -> &mut Self {
        if !predicates.is_empty() {
            self.clauses.push(Clause::Any(predicates));
        }
        self
    }

    pub fn order_by(&mut self, order: &'static str) -> &mut Self {
        self.order_by = Some(order);
        self
    }

    pub fn paginate(&mut self, limit: i64, offset: i64) -> &mut Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let mut sql = self.select.clone();
        let mut values: Vec<Value> = Vec::new();

        let bind = |p: &Predicate, values: &mut Vec<Value>| {
            values.push(p.value.clone());
            p.op.render(p.column, &format!("?{}", values.len()))
        };

        let rendered: Vec<String> = self
            .clauses
            .iter()
            .map(|clause| match clause {
                Clause::All(p) => bind(p, &mut values),
                Clause::Any(group) => {
                    let parts: Vec<String> = group.iter().map(|p| bind(p, &mut values)).collect();
                    format!("({})", parts.join(" OR "))
                }
            })
            .collect();

        if !rendered.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&rendered.join(" AND "));
        }
        if let Some(order) = self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = self.limit {
            values.push(Value::Integer(limit));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }
        if let Some(offset) = self.offset {
            values.push(Value::Integer(offset));
            sql.push_str(&format!(" OFFSET ?{}", values.len()));
        }

        (sql, values)
    }
}
