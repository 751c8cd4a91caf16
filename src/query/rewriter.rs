//! Query rewriter. Parses the tokenizer's output into an AST and compiles
//! it into a boxed predicate closure over a candidate record — the AST
//! itself is throwaway; `compile` walks it once and produces the closure
//! that actually gets called per candidate record.

use chrono::DateTime;

use crate::error::{Result, TableStoreError};
use crate::model::PropertyValue;

/// Which query target a filter is being compiled for. Table-name queries
/// forbid custom property references entirely; entity queries allow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    TableName,
    Entity,
}

impl QueryMode {
    /// Maps identifier token text (already keyword-remapped by the
    /// tokenizer) to the candidate's top-level field name.
    fn system_field(self, ident: &str) -> Option<&'static str> {
        match self {
            QueryMode::TableName => (ident == "name").then_some("table"),
            QueryMode::Entity => match ident {
                "PartitionKey" => Some("PartitionKey"),
                "RowKey" => Some("RowKey"),
                _ => None,
            },
        }
    }

    fn allows_custom_properties(self) -> bool {
        matches!(self, QueryMode::Entity)
    }
}

/// A value a compiled predicate compares at evaluation time.
#[derive(Debug, Clone)]
enum Val {
    Str(String),
    Num(f64),
    Bool(bool),
    Millis(i64),
    Missing,
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// One side of a comparison.
#[derive(Debug, Clone)]
enum Operand {
    SystemField(&'static str),
    Property(String),
    PropertyAsDateTime(String),
    StringLit(String),
    NumberLit(f64),
    BoolLit(bool),
    DateTimeLit(i64),
}

#[derive(Debug, Clone)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Operand, CmpOp, Operand),
}

/// Anything the compiled predicate can be evaluated against: a table record
/// (table-name queries) or an entity record (entity queries).
pub trait FilterTarget {
    fn system_field(&self, mapped: &str) -> Option<PropertyValue>;
    fn property(&self, name: &str) -> Option<PropertyValue>;
}

pub type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Parse + compile a filter string into a predicate. An empty filter admits
/// every record.
pub fn compile<T: FilterTarget + 'static>(filter: &str, mode: QueryMode) -> Result<Predicate<T>> {
    let trimmed = filter.trim();
    if trimmed.is_empty() {
        return Ok(Box::new(|_| true));
    }
    let tokens = super::tokenizer::tokenize(trimmed);
    let mut parser = Parser { tokens: &tokens, pos: 0, mode };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(TableStoreError::QueryConditionInvalid(format!(
            "unexpected trailing tokens in filter: {filter}"
        )));
    }
    Ok(compile_expr(expr))
}

struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
    mode: QueryMode,
}

fn is_paren(tok: &str) -> Option<char> {
    if tok == "(" || tok == ")" {
        tok.chars().next()
    } else {
        None
    }
}

fn is_cmp_op(tok: &str) -> Option<CmpOp> {
    match tok {
        "===" => Some(CmpOp::Eq),
        "!==" => Some(CmpOp::Ne),
        ">" => Some(CmpOp::Gt),
        ">=" => Some(CmpOp::Ge),
        "<" => Some(CmpOp::Lt),
        "<=" => Some(CmpOp::Le),
        _ => None,
    }
}

fn is_backtick_string(tok: &str) -> Option<(&str, &str)> {
    let open = tok.find('`')?;
    if !tok.ends_with('`') || tok.len() < open + 1 {
        return None;
    }
    let prefix = &tok[..open];
    let body = &tok[open + 1..tok.len() - 1];
    Some((prefix, body))
}

fn is_long_int(tok: &str) -> bool {
    tok.len() > 1
        && tok.ends_with('L')
        && tok[..tok.len() - 1].chars().all(|c| c.is_ascii_digit())
        && !tok[..tok.len() - 1].is_empty()
}

fn is_number(tok: &str) -> bool {
    tok.parse::<f64>().is_ok()
}

fn is_bool(tok: &str) -> Option<bool> {
    match tok {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(|s| s.as_str())
    }

    fn bump(&mut self) -> Option<&str> {
        let t = self.tokens.get(self.pos).map(|s| s.as_str());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &str) -> Result<()> {
        match self.bump() {
            Some(t) if t == expected => Ok(()),
            other => Err(TableStoreError::QueryConditionInvalid(format!(
                "expected `{expected}`, got {other:?}"
            ))),
        }
    }

    // expr := or_expr
    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    // or_expr := and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some("||") {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // and_expr := unary ("&&" unary)*
    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some("&&") {
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // unary := "!" unary | primary
    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some("!") {
            self.bump();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    // primary := "(" expr ")" | comparison
    fn parse_primary(&mut self) -> Result<Expr> {
        if self.peek() == Some("(") {
            self.bump();
            let inner = self.parse_expr()?;
            self.expect(")")?;
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs_tok = self
            .bump()
            .ok_or_else(|| TableStoreError::QueryConditionInvalid("unexpected end of filter".to_string()))?
            .to_string();
        if is_paren(&lhs_tok).is_some() {
            return Err(TableStoreError::QueryConditionInvalid("unexpected `(` in operand position".to_string()));
        }
        let op_tok = self
            .bump()
            .ok_or_else(|| TableStoreError::QueryConditionInvalid("expected comparison operator".to_string()))?;
        let op = is_cmp_op(op_tok)
            .ok_or_else(|| TableStoreError::QueryConditionInvalid(format!("expected comparison operator, got {op_tok}")))?;
        let rhs_tok = self
            .bump()
            .ok_or_else(|| TableStoreError::QueryConditionInvalid("expected right-hand operand".to_string()))?
            .to_string();

        let lhs = self.build_operand(&lhs_tok, &rhs_tok)?;
        let rhs = self.build_operand(&rhs_tok, &lhs_tok)?;
        Ok(Expr::Compare(lhs, op, rhs))
    }

    /// Build one comparison operand. `other` is the token on the opposite
    /// side of the comparator, used only to decide whether an identifier is
    /// being compared against a `datetime'...'` literal.
    fn build_operand(&self, tok: &str, other: &str) -> Result<Operand> {
        if is_paren(tok).is_some() || is_cmp_op(tok).is_some() || matches!(tok, "&&" | "||" | "!") {
            return Err(TableStoreError::QueryConditionInvalid(format!("unexpected token in operand position: {tok}")));
        }
        if let Some((prefix, body)) = is_backtick_string(tok) {
            return match prefix {
                "binary" | "X" => Err(TableStoreError::QueryConditionInvalid(
                    "binary filters are unsupported".to_string(),
                )),
                "datetime" => {
                    let millis = DateTime::parse_from_rfc3339(body)
                        .map_err(|_| TableStoreError::QueryConditionInvalid(format!("invalid datetime literal: {body}")))?
                        .timestamp_millis();
                    Ok(Operand::DateTimeLit(millis))
                }
                _ => Ok(Operand::StringLit(body.to_string())),
            };
        }
        if is_long_int(tok) {
            // Long integers are stored as strings.
            return Ok(Operand::StringLit(tok[..tok.len() - 1].to_string()));
        }
        if let Some(b) = is_bool(tok) {
            return Ok(Operand::BoolLit(b));
        }
        if is_number(tok) {
            return Ok(Operand::NumberLit(tok.parse().unwrap()));
        }
        // Identifier.
        if let Some(mapped) = self.mode.system_field(tok) {
            return Ok(Operand::SystemField(mapped));
        }
        if self.mode.allows_custom_properties() {
            let other_is_datetime = is_backtick_string(other).map(|(p, _)| p == "datetime").unwrap_or(false);
            if other_is_datetime {
                Ok(Operand::PropertyAsDateTime(tok.to_string()))
            } else {
                Ok(Operand::Property(tok.to_string()))
            }
        } else {
            Err(TableStoreError::QueryConditionInvalid(format!(
                "custom property reference not allowed in this query: {tok}"
            )))
        }
    }
}

fn resolve_operand<T: FilterTarget>(op: &Operand, target: &T) -> Val {
    match op {
        Operand::SystemField(name) => property_value_to_val(target.system_field(name)),
        Operand::Property(name) => property_value_to_val(target.property(name)),
        Operand::PropertyAsDateTime(name) => target
            .property(name)
            .and_then(|v| v.as_datetime_millis())
            .map(Val::Millis)
            .unwrap_or(Val::Missing),
        Operand::StringLit(s) => Val::Str(s.clone()),
        Operand::NumberLit(n) => Val::Num(*n),
        Operand::BoolLit(b) => Val::Bool(*b),
        Operand::DateTimeLit(ms) => Val::Millis(*ms),
    }
}

fn property_value_to_val(v: Option<PropertyValue>) -> Val {
    match v {
        Some(PropertyValue::String(s)) => Val::Str(s),
        Some(PropertyValue::Number(n)) => Val::Num(n),
        Some(PropertyValue::Bool(b)) => Val::Bool(b),
        None => Val::Missing,
    }
}

fn eval_cmp(lhs: Val, op: CmpOp, rhs: Val) -> bool {
    use std::cmp::Ordering as Ord;
    let ordering = match (&lhs, &rhs) {
        (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
        (Val::Num(a), Val::Num(b)) => a.partial_cmp(b),
        (Val::Millis(a), Val::Millis(b)) => Some(a.cmp(b)),
        (Val::Bool(a), Val::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        // Missing values, or mismatched types, never satisfy any comparison.
        return false;
    };
    match op {
        CmpOp::Eq => ordering == Ord::Equal,
        CmpOp::Ne => ordering != Ord::Equal,
        CmpOp::Gt => ordering == Ord::Greater,
        CmpOp::Ge => ordering != Ord::Less,
        CmpOp::Lt => ordering == Ord::Less,
        CmpOp::Le => ordering != Ord::Greater,
    }
}

fn compile_expr<T: FilterTarget + 'static>(expr: Expr) -> Predicate<T> {
    match expr {
        Expr::And(l, r) => {
            let lf = compile_expr::<T>(*l);
            let rf = compile_expr::<T>(*r);
            Box::new(move |t| lf(t) && rf(t))
        }
        Expr::Or(l, r) => {
            let lf = compile_expr::<T>(*l);
            let rf = compile_expr::<T>(*r);
            Box::new(move |t| lf(t) || rf(t))
        }
        Expr::Not(inner) => {
            let f = compile_expr::<T>(*inner);
            Box::new(move |t| !f(t))
        }
        Expr::Compare(lhs, op, rhs) => Box::new(move |t| eval_cmp(resolve_operand(&lhs, t), op, resolve_operand(&rhs, t))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        table: String,
        partition_key: String,
        row_key: String,
        props: Vec<(String, PropertyValue)>,
    }

    impl FilterTarget for Fixture {
        fn system_field(&self, mapped: &str) -> Option<PropertyValue> {
            match mapped {
                "table" => Some(PropertyValue::String(self.table.clone())),
                "PartitionKey" => Some(PropertyValue::String(self.partition_key.clone())),
                "RowKey" => Some(PropertyValue::String(self.row_key.clone())),
                _ => None,
            }
        }
        fn property(&self, name: &str) -> Option<PropertyValue> {
            self.props.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
        }
    }

    fn entity(pk: &str, rk: &str, props: &[(&str, PropertyValue)]) -> Fixture {
        Fixture {
            table: String::new(),
            partition_key: pk.to_string(),
            row_key: rk.to_string(),
            props: props.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn empty_filter_admits_all() {
        let pred = compile::<Fixture>("", QueryMode::Entity).unwrap();
        assert!(pred(&entity("p", "r", &[])));
    }

    #[test]
    fn string_equality_on_system_field() {
        let pred = compile::<Fixture>("RowKey eq 'b'", QueryMode::Entity).unwrap();
        assert!(pred(&entity("p", "b", &[])));
        assert!(!pred(&entity("p", "a", &[])));
    }

    #[test]
    fn range_filter_with_and() {
        let pred = compile::<Fixture>("RowKey ge 'b' and RowKey lt 'c'", QueryMode::Entity).unwrap();
        assert!(pred(&entity("p", "b", &[])));
        assert!(!pred(&entity("p", "c", &[])));
        assert!(!pred(&entity("p", "a", &[])));
    }

    #[test]
    fn datetime_literal_comparison_on_custom_property() {
        let f = entity("p", "r", &[("When", PropertyValue::String("2024-01-02T03:04:05Z".to_string()))]);
        let gt = compile::<Fixture>("When gt datetime'2024-01-01T00:00:00Z'", QueryMode::Entity).unwrap();
        assert!(gt(&f));
        let lt = compile::<Fixture>("When lt datetime'2024-01-01T00:00:00Z'", QueryMode::Entity).unwrap();
        assert!(!lt(&f));
    }

    #[test]
    fn long_int_literal_compares_as_string() {
        let f = entity("p", "r", &[("Count", PropertyValue::String("42".to_string()))]);
        let pred = compile::<Fixture>("Count eq 42L", QueryMode::Entity).unwrap();
        assert!(pred(&f));
    }

    #[test]
    fn guid_literal_compares_as_plain_string() {
        let f = entity("p", "r", &[("Id", PropertyValue::String("abc-123".to_string()))]);
        let pred = compile::<Fixture>("Id eq guid'abc-123'", QueryMode::Entity).unwrap();
        assert!(pred(&f));
    }

    #[test]
    fn binary_literal_rejected() {
        let err = compile::<Fixture>("Blob eq X'deadbeef'", QueryMode::Entity).unwrap_err();
        assert!(matches!(err, TableStoreError::QueryConditionInvalid(_)));
    }

    #[test]
    fn custom_property_rejected_in_table_name_mode() {
        let err = compile::<Fixture>("Foo eq 'bar'", QueryMode::TableName).unwrap_err();
        assert!(matches!(err, TableStoreError::QueryConditionInvalid(_)));
    }

    #[test]
    fn table_name_system_field_maps_name_to_table() {
        let pred = compile::<Fixture>("TableName eq 'orders'", QueryMode::TableName).unwrap();
        let mut f = entity("", "", &[]);
        f.table = "orders".to_string();
        assert!(pred(&f));
    }

    #[test]
    fn parenthesized_or_and_not() {
        let pred = compile::<Fixture>("not (RowKey eq 'a' or RowKey eq 'b')", QueryMode::Entity).unwrap();
        assert!(!pred(&entity("p", "a", &[])));
        assert!(!pred(&entity("p", "b", &[])));
        assert!(pred(&entity("p", "c", &[])));
    }
}
