//! Object filter expressions
//!
//! Parses query-string filters such as `host_name=web*&(hostgroup_name=linux|_host_os=debian)`
//! and checks every referenced column against a safelist before any query runs.
//!
//! Grammar (`&` binds tighter than `|`):
//!
//! ```text
//! expr      := and ('|' and)*
//! and       := unary ('&' unary)*
//! unary     := '!' unary | '(' expr ')' | condition
//! condition := column op value
//! op        := '=' | '!=' | '<' | '<=' | '>' | '>='
//! ```
//!
//! The literal `*` disables filtering.

use crate::error::{ReportError, Result};
use globset::{GlobBuilder, GlobMatcher};
use std::collections::BTreeMap;

/// Attribute values of one monitored object, keyed by filter column
///
/// Columns may carry several values (group memberships).
pub type Attributes = BTreeMap<String, Vec<String>>;

/// Literal meaning "no filtering"
pub const MATCH_ALL: &str = "*";

/// Description of the custom variable rule shown to users
const CUSTOMVAR_DESCRIPTION: &str = "_(host|service)_<customvar-name>";

/// One entry of a column safelist
#[derive(Debug, Clone)]
pub enum ColumnRule {
    Exact(&'static str),
    Pattern {
        description: &'static str,
        matches: fn(&str) -> bool,
    },
}

impl ColumnRule {
    fn allows(&self, column: &str) -> bool {
        match self {
            ColumnRule::Exact(name) => *name == column,
            ColumnRule::Pattern { matches, .. } => matches(column),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ColumnRule::Exact(name) => *name,
            ColumnRule::Pattern { description, .. } => *description,
        }
    }
}

/// Whether a column names a host or service custom variable
///
/// The `_host_` / `_service_` prefix is matched case-insensitively.
pub fn is_custom_variable(column: &str) -> bool {
    ["_host_", "_service_"].iter().any(|prefix| {
        column
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

/// Ordered set of columns a filter may reference
#[derive(Debug, Clone)]
pub struct Safelist {
    rules: Vec<ColumnRule>,
}

impl Safelist {
    pub fn new(rules: Vec<ColumnRule>) -> Self {
        Safelist { rules }
    }

    /// Columns available to host reports
    pub fn host() -> Self {
        Safelist::new(vec![
            ColumnRule::Exact("instance_name"),
            ColumnRule::Exact("host_name"),
            ColumnRule::Exact("hostgroup_name"),
            customvar_rule(),
        ])
    }

    /// Columns available to service reports
    pub fn service() -> Self {
        Safelist::new(vec![
            ColumnRule::Exact("instance_name"),
            ColumnRule::Exact("host_name"),
            ColumnRule::Exact("hostgroup_name"),
            ColumnRule::Exact("service_description"),
            ColumnRule::Exact("servicegroup_name"),
            customvar_rule(),
        ])
    }

    pub fn allows(&self, column: &str) -> bool {
        self.rules.iter().any(|rule| rule.allows(column))
    }

    /// Human-readable list of permitted columns, in safelist order
    pub fn describe(&self) -> String {
        self.rules
            .iter()
            .map(ColumnRule::describe)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn customvar_rule() -> ColumnRule {
    ColumnRule::Pattern {
        description: CUSTOMVAR_DESCRIPTION,
        matches: is_custom_variable,
    }
}

/// Comparison operator of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

/// Single `column op value` test
#[derive(Debug, Clone)]
pub struct Condition {
    pub column: String,
    pub op: Operator,
    pub value: String,
    matcher: GlobMatcher,
}

impl Condition {
    fn new(column: String, op: Operator, value: String) -> std::result::Result<Self, String> {
        let matcher = GlobBuilder::new(&escape_wildcard_value(&value))
            .case_insensitive(true)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| format!("invalid value '{}': {}", value, e))?
            .compile_matcher();
        Ok(Condition {
            column,
            op,
            value,
            matcher,
        })
    }

    fn evaluate(&self, attributes: &Attributes) -> bool {
        let values = lookup(attributes, &self.column);
        match self.op {
            Operator::Eq => values.iter().any(|v| self.matcher.is_match(v)),
            Operator::NotEq => !values.iter().any(|v| self.matcher.is_match(v)),
            Operator::Lt => values.iter().any(|v| compare(v, &self.value).is_lt()),
            Operator::Le => values.iter().any(|v| compare(v, &self.value).is_le()),
            Operator::Gt => values.iter().any(|v| compare(v, &self.value).is_gt()),
            Operator::Ge => values.iter().any(|v| compare(v, &self.value).is_ge()),
        }
    }
}

/// Custom variable columns are looked up case-insensitively
fn lookup<'a>(attributes: &'a Attributes, column: &str) -> &'a [String] {
    let found = if is_custom_variable(column) {
        attributes.get(&column.to_ascii_lowercase())
    } else {
        attributes.get(column)
    };
    found.map(Vec::as_slice).unwrap_or(&[])
}

/// Numeric comparison when both sides are numbers, lexical otherwise
fn compare(actual: &str, expected: &str) -> std::cmp::Ordering {
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
        _ => actual.cmp(expected),
    }
}

/// Keep `*` as the only wildcard; everything else matches literally
fn escape_wildcard_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '?' | '[' | ']' | '{' | '}' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Parsed filter expression tree
#[derive(Debug, Clone)]
pub enum FilterExpr {
    All,
    Condition(Condition),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    fn evaluate(&self, attributes: &Attributes) -> bool {
        match self {
            FilterExpr::All => true,
            FilterExpr::Condition(c) => c.evaluate(attributes),
            FilterExpr::And(parts) => parts.iter().all(|p| p.evaluate(attributes)),
            FilterExpr::Or(parts) => parts.iter().any(|p| p.evaluate(attributes)),
            FilterExpr::Not(inner) => !inner.evaluate(attributes),
        }
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterExpr::All => {}
            FilterExpr::Condition(c) => out.push(&c.column),
            FilterExpr::And(parts) | FilterExpr::Or(parts) => {
                for p in parts {
                    p.collect_columns(out);
                }
            }
            FilterExpr::Not(inner) => inner.collect_columns(out),
        }
    }
}

/// Filter whose columns all passed the safelist
#[derive(Debug, Clone)]
pub struct ValidatedFilter {
    expression: String,
    expr: FilterExpr,
}

impl ValidatedFilter {
    /// Filter that selects every object
    pub fn match_all() -> Self {
        ValidatedFilter {
            expression: MATCH_ALL.to_string(),
            expr: FilterExpr::All,
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self.expr, FilterExpr::All)
    }

    /// Referenced columns in expression order
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        self.expr.collect_columns(&mut columns);
        columns
    }

    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.expr.evaluate(attributes)
    }
}

/// Parse `expression` and check every column against `safelist`
pub fn validate(expression: &str, safelist: &Safelist) -> Result<ValidatedFilter> {
    let trimmed = expression.trim();
    if trimmed == MATCH_ALL {
        return Ok(ValidatedFilter::match_all());
    }

    let rejected = |reason: String| ReportError::InvalidFilterExpression {
        expression: expression.to_string(),
        allowed: safelist.describe(),
        reason,
    };

    let expr = Parser::new(trimmed).parse().map_err(rejected)?;

    let mut columns = Vec::new();
    expr.collect_columns(&mut columns);
    if let Some(column) = columns.iter().find(|c| !safelist.allows(c)) {
        return Err(rejected(format!("column '{}' is not allowed", column)));
    }

    Ok(ValidatedFilter {
        expression: trimmed.to_string(),
        expr,
    })
}

/// Deepest parenthesis nesting a filter may use
const MAX_NESTING: usize = 64;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            input,
            pos: 0,
            depth: 0,
        }
    }

    fn parse(mut self) -> std::result::Result<FilterExpr, String> {
        if self.input.is_empty() {
            return Err("empty filter expression".to_string());
        }
        let expr = self.parse_or()?;
        self.skip_whitespace();
        match self.peek() {
            None => Ok(expr),
            Some(c) => Err(format!("unexpected '{}' at position {}", c, self.pos)),
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.input[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn parse_or(&mut self) -> std::result::Result<FilterExpr, String> {
        let mut parts = vec![self.parse_and()?];
        loop {
            self.skip_whitespace();
            if !self.eat("|") {
                break;
            }
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            FilterExpr::Or(parts)
        })
    }

    fn parse_and(&mut self) -> std::result::Result<FilterExpr, String> {
        let mut parts = vec![self.parse_unary()?];
        loop {
            self.skip_whitespace();
            if !self.eat("&") {
                break;
            }
            parts.push(self.parse_unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            FilterExpr::And(parts)
        })
    }

    fn parse_unary(&mut self) -> std::result::Result<FilterExpr, String> {
        // `!` chains fold to a single negation or none
        let mut negated = false;
        loop {
            self.skip_whitespace();
            if !self.eat("!") {
                break;
            }
            negated = !negated;
        }

        let expr = if self.eat("(") {
            self.depth += 1;
            if self.depth > MAX_NESTING {
                return Err(format!(
                    "filter nested too deeply (more than {} levels) at position {}",
                    MAX_NESTING, self.pos
                ));
            }
            let inner = self.parse_or()?;
            self.skip_whitespace();
            if !self.eat(")") {
                return Err(format!("missing ')' at position {}", self.pos));
            }
            self.depth -= 1;
            inner
        } else {
            self.parse_condition()?
        };

        Ok(if negated {
            FilterExpr::Not(Box::new(expr))
        } else {
            expr
        })
    }

    fn parse_condition(&mut self) -> std::result::Result<FilterExpr, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            self.bump();
        }
        let column = &self.input[start..self.pos];
        if column.is_empty() {
            return Err(match self.peek() {
                Some(c) => format!("expected a column name at position {}, found '{}'", start, c),
                None => format!("expected a column name at position {}", start),
            });
        }
        let column = column.to_string();

        self.skip_whitespace();
        let op = if self.eat("!=") {
            Operator::NotEq
        } else if self.eat("<=") {
            Operator::Le
        } else if self.eat(">=") {
            Operator::Ge
        } else if self.eat("=") {
            Operator::Eq
        } else if self.eat("<") {
            Operator::Lt
        } else if self.eat(">") {
            Operator::Gt
        } else {
            return Err(format!(
                "expected an operator after '{}' at position {}",
                column, self.pos
            ));
        };

        let value_start = self.pos;
        while self.peek().is_some_and(|c| !matches!(c, '&' | '|' | ')')) {
            self.bump();
        }
        let raw = self.input[value_start..self.pos].trim();
        if raw.is_empty() {
            return Err(format!(
                "missing value for '{}{}' at position {}",
                column,
                op.as_str(),
                value_start
            ));
        }
        let value = urlencoding::decode(raw)
            .map_err(|e| format!("invalid percent-encoding in '{}': {}", raw, e))?
            .into_owned();

        Condition::new(column, op, value).map(FilterExpr::Condition)
    }
}
