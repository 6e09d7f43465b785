// src/blocks/formula.rs
// Invocation contract for derived columns plus the default arithmetic evaluator.
//
// The engine never assumes a grammar: it only asks an evaluator which columns an
// expression reads (for the dependency graph) and what value it produces for a row.

use serde_json::{Number, Value};
use thiserror::Error;

use super::column_definition::Column;
use super::definitions::RowData;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("unknown column reference '{0}'")]
    UnknownReference(String),
    #[error("column '{column}' holds {value}, which is not a number")]
    Type { column: String, value: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
}

/// Read-only view of a row handed to an evaluator. Lookups resolve a reference
/// by column id first and by column name second.
pub struct RowContext<'a> {
    pub columns: &'a [Column],
    pub data: &'a RowData,
    pub computed: &'a RowData,
}

impl<'a> RowContext<'a> {
    pub fn new(columns: &'a [Column], data: &'a RowData, computed: &'a RowData) -> Self {
        Self {
            columns,
            data,
            computed,
        }
    }

    pub fn resolve_column(&self, reference: &str) -> Option<&'a Column> {
        self.columns
            .iter()
            .find(|c| c.column_id == reference)
            .or_else(|| self.columns.iter().find(|c| c.name == reference))
    }

    /// Value of the referenced column, `Null` when the row has none yet.
    pub fn value(&self, reference: &str) -> Result<&'a Value, EvalError> {
        let column = self
            .resolve_column(reference)
            .ok_or_else(|| EvalError::UnknownReference(reference.to_string()))?;
        let source = if column.is_derived() { self.computed } else { self.data };
        Ok(source.get(&column.column_id).unwrap_or(&Value::Null))
    }
}

/// Pure and total: every call returns a value or a typed error, with no side effects.
pub trait FormulaEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, row: &RowContext<'_>) -> Result<Value, EvalError>;

    /// Column references (ids or names) appearing in `expression`.
    fn references(&self, expression: &str) -> Result<Vec<String>, EvalError>;
}

/// Evaluates `+ - * /`, parentheses, numeric literals and column references.
/// References are bare identifiers (`Quantity`) or braced names (`{Unit Price}`).
/// An expression made of a single reference returns that column's value unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArithmeticEvaluator;

impl FormulaEvaluator for ArithmeticEvaluator {
    fn evaluate(&self, expression: &str, row: &RowContext<'_>) -> Result<Value, EvalError> {
        let expr = Parser::new(tokenize(expression)?).parse()?;
        if let Expr::Ref(name) = &expr {
            return Ok(row.value(name)?.clone());
        }
        number_value(eval(&expr, row)?)
    }

    fn references(&self, expression: &str) -> Result<Vec<String>, EvalError> {
        let tokens = tokenize(expression)?;
        // Parse for syntax errors; the reference list comes from the tokens.
        Parser::new(tokens.clone()).parse()?;
        let mut refs = Vec::new();
        for (_, token) in tokens {
            if let Token::Ident(name) = token {
                if !refs.contains(&name) {
                    refs.push(name);
                }
            }
        }
        Ok(refs)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => tokens.push((start, Token::Plus)),
            '-' => tokens.push((start, Token::Minus)),
            '*' => tokens.push((start, Token::Star)),
            '/' => tokens.push((start, Token::Slash)),
            '(' => tokens.push((start, Token::LParen)),
            ')' => tokens.push((start, Token::RParen)),
            '{' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '}')
                    .ok_or_else(|| EvalError::Syntax {
                        position: start,
                        message: "unterminated '{'".to_string(),
                    })?;
                let name: String = chars[i + 1..i + 1 + close].iter().collect();
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(EvalError::Syntax {
                        position: start,
                        message: "empty column reference".to_string(),
                    });
                }
                tokens.push((start, Token::Ident(name)));
                i += close + 2;
                continue;
            }
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| EvalError::Syntax {
                    position: start,
                    message: format!("invalid number '{}'", text),
                })?;
                tokens.push((start, Token::Num(n)));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
                continue;
            }
            other => {
                return Err(EvalError::Syntax {
                    position: start,
                    message: format!("unexpected character '{}'", other),
                })
            }
        }
        i += 1;
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Ref(String),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<(usize, Token)>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> Result<Expr, EvalError> {
        if self.tokens.is_empty() {
            return Err(EvalError::Syntax {
                position: 0,
                message: "empty expression".to_string(),
            });
        }
        let expr = self.sum()?;
        match self.tokens.get(self.pos) {
            None => Ok(expr),
            Some((position, token)) => Err(EvalError::Syntax {
                position: *position,
                message: format!("unexpected {:?}", token),
            }),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(p, _)| *p)
            .unwrap_or(0)
    }

    fn sum(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.product()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn product(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, EvalError> {
        let position = self.position();
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        match token {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) => Ok(Expr::Ref(name)),
            Some(Token::LParen) => {
                let inner = self.sum()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(EvalError::Syntax {
                        position: self.position(),
                        message: "expected ')'".to_string(),
                    });
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(other) => Err(EvalError::Syntax {
                position,
                message: format!("unexpected {:?}", other),
            }),
            None => Err(EvalError::Syntax {
                position,
                message: "unexpected end of expression".to_string(),
            }),
        }
    }
}

fn eval(expr: &Expr, row: &RowContext<'_>) -> Result<f64, EvalError> {
    match expr {
        Expr::Num(n) => Ok(*n),
        Expr::Ref(name) => as_number(name, row.value(name)?),
        Expr::Neg(inner) => Ok(-eval(inner, row)?),
        Expr::Bin(op, lhs, rhs) => {
            let l = eval(lhs, row)?;
            let r = eval(rhs, row)?;
            match op {
                BinOp::Add => Ok(l + r),
                BinOp::Sub => Ok(l - r),
                BinOp::Mul => Ok(l * r),
                BinOp::Div if r == 0.0 => Err(EvalError::DivisionByZero),
                BinOp::Div => Ok(l / r),
            }
        }
    }
}

// Empty cells count as zero, like a spreadsheet.
fn as_number(column: &str, value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64().ok_or(EvalError::NonFinite),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| EvalError::Type {
            column: column.to_string(),
            value: value.to_string(),
        }),
        Value::Array(_) | Value::Object(_) => Err(EvalError::Type {
            column: column.to_string(),
            value: value.to_string(),
        }),
    }
}

const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

fn number_value(n: f64) -> Result<Value, EvalError> {
    if !n.is_finite() {
        return Err(EvalError::NonFinite);
    }
    if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or(EvalError::NonFinite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::column_type::ColumnType;
    use serde_json::json;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("Quantity", ColumnType::Number),
            Column::new("price", ColumnType::Currency).named("Unit Price"),
            Column::new("Label", ColumnType::Text),
            Column::formula("Total", "Quantity*price"),
        ]
    }

    fn eval_with(expression: &str, data: serde_json::Value) -> Result<Value, EvalError> {
        let cols = columns();
        let data = data.as_object().cloned().unwrap_or_default();
        let computed = RowData::new();
        ArithmeticEvaluator.evaluate(expression, &RowContext::new(&cols, &data, &computed))
    }

    #[test]
    fn multiplies_columns() {
        let v = eval_with("Quantity*price", json!({"Quantity": 3, "price": 10})).unwrap();
        assert_eq!(v, json!(30));
    }

    #[test]
    fn precedence_parentheses_and_unary() {
        let data = json!({"Quantity": 2, "price": 2.5});
        assert_eq!(eval_with("1 + Quantity * 3", data.clone()).unwrap(), json!(7));
        assert_eq!(eval_with("(1 + Quantity) * 3", data.clone()).unwrap(), json!(9));
        assert_eq!(eval_with("-Quantity + 1", data.clone()).unwrap(), json!(-1));
        assert_eq!(eval_with("{Unit Price} / 2", data).unwrap(), json!(1.25));
    }

    #[test]
    fn empty_cells_are_zero_and_single_reference_passes_through() {
        assert_eq!(eval_with("Quantity + 1", json!({})).unwrap(), json!(1));
        assert_eq!(eval_with("Label", json!({"Label": "hi"})).unwrap(), json!("hi"));
    }

    #[test]
    fn typed_errors() {
        assert_eq!(
            eval_with("Quantity / 0", json!({"Quantity": 1})),
            Err(EvalError::DivisionByZero)
        );
        assert!(matches!(
            eval_with("Label * 2", json!({"Label": "abc"})),
            Err(EvalError::Type { .. })
        ));
        assert!(matches!(
            eval_with("Missing + 1", json!({})),
            Err(EvalError::UnknownReference(_))
        ));
        assert!(matches!(eval_with("(1 + 2", json!({})), Err(EvalError::Syntax { .. })));
        assert!(matches!(eval_with("1 $ 2", json!({})), Err(EvalError::Syntax { .. })));
        assert!(matches!(eval_with("", json!({})), Err(EvalError::Syntax { .. })));
    }

    #[test]
    fn references_are_deduplicated_in_order() {
        let refs = ArithmeticEvaluator
            .references("Quantity * {Unit Price} + Quantity")
            .unwrap();
        assert_eq!(refs, vec!["Quantity".to_string(), "Unit Price".to_string()]);
        assert!(ArithmeticEvaluator.references("Quantity *").is_err());
    }
}
