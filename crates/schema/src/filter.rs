use std::collections::BTreeMap;

use redolink_common::{RedoError, Result, RowImage};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::table::TableOptions;

/// One `{owner, table, options, key?, condition?, tag?}` replication entry.
/// Owner and table are anchored regular expressions, precompiled at reload;
/// the whole element set is committed atomically.
#[derive(Clone, Debug)]
pub struct SchemaElement {
    pub owner: String,
    pub table: String,
    pub options: TableOptions,
    pub key_columns: Vec<String>,
    pub condition: Option<Condition>,
    pub tag: Option<String>,
    owner_re: Regex,
    table_re: Regex,
}

impl SchemaElement {
    pub fn new(owner: &str, table: &str) -> Result<SchemaElement> {
        let compile = |pattern: &str| -> Result<Regex> {
            Regex::new(&format!("^{}$", pattern)).map_err(|e| {
                RedoError::Configuration(format!("bad name pattern {:?}: {}", pattern, e))
            })
        };
        Ok(SchemaElement {
            owner: owner.to_string(),
            table: table.to_string(),
            options: TableOptions::default(),
            key_columns: Vec::new(),
            condition: None,
            tag: None,
            owner_re: compile(owner)?,
            table_re: compile(table)?,
        })
    }

    pub fn with_options(mut self, options: TableOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_key(mut self, columns: Vec<String>) -> Self {
        self.key_columns = columns;
        self
    }

    pub fn with_condition(mut self, source: &str) -> Result<Self> {
        self.condition = Some(Condition::compile(source)?);
        Ok(self)
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn matches(&self, owner: &str, table: &str) -> bool {
        self.owner_re.is_match(owner) && self.table_re.is_match(table)
    }
}

// ---------------------------------------------------------------------------
// Row filter condition
// ---------------------------------------------------------------------------

/// Compiled boolean row filter over column names and transaction
/// attributes. Grammar:
///   expr    := and ('or' and)*
///   and     := unary ('and' unary)*
///   unary   := 'not' unary | primary
///   primary := ident ('=' | '!=') string | '(' expr ')'
/// Identifiers name columns; `@name` names a transaction attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Or(Box<Condition>, Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    ColumnEq { column: String, value: String },
    ColumnNe { column: String, value: String },
    AttributeEq { attribute: String, value: String },
    AttributeNe { attribute: String, value: String },
}

impl Condition {
    pub fn compile(source: &str) -> Result<Condition> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(RedoError::Configuration(format!(
                "trailing input in condition {:?}",
                source
            )));
        }
        Ok(expr)
    }

    /// Evaluate against a row image (column bytes compared as UTF-8) and the
    /// transaction attribute map.
    pub fn eval(&self, row: &RowImage, attributes: &BTreeMap<String, String>) -> bool {
        match self {
            Condition::Or(a, b) => a.eval(row, attributes) || b.eval(row, attributes),
            Condition::And(a, b) => a.eval(row, attributes) && b.eval(row, attributes),
            Condition::Not(inner) => !inner.eval(row, attributes),
            Condition::ColumnEq { column, value } => {
                row.get(column).is_some_and(|bytes| bytes == value.as_bytes())
            }
            Condition::ColumnNe { column, value } => {
                row.get(column).map_or(true, |bytes| bytes != value.as_bytes())
            }
            Condition::AttributeEq { attribute, value } => {
                attributes.get(attribute).is_some_and(|v| v == value)
            }
            Condition::AttributeNe { attribute, value } => {
                attributes.get(attribute).map_or(true, |v| v != value)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Ident(String),
    Attribute(String),
    Literal(String),
    Eq,
    Ne,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '\'' => {
                let mut value = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    value.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(RedoError::Configuration(format!(
                        "unterminated string in condition {:?}",
                        source
                    )));
                }
                i += 1;
                tokens.push(Token::Literal(value));
            }
            '@' => {
                let mut name = String::new();
                i += 1;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    name.push(chars[i]);
                    i += 1;
                }
                tokens.push(Token::Attribute(name));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$' || chars[i] == '#')
                {
                    word.push(chars[i]);
                    i += 1;
                }
                match word.to_ascii_lowercase().as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "not" => tokens.push(Token::Not),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => {
                return Err(RedoError::Configuration(format!(
                    "unexpected {:?} in condition {:?}",
                    other, source
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expr(&mut self) -> Result<Condition> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            let right = self.and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Condition> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.bump();
            let right = self.unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Condition> {
        if self.peek() == Some(&Token::Not) {
            self.bump();
            return Ok(Condition::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Condition> {
        match self.bump() {
            Some(Token::LParen) => {
                let inner = self.expr()?;
                if self.bump() != Some(Token::RParen) {
                    return Err(RedoError::Configuration("missing ')' in condition".into()));
                }
                Ok(inner)
            }
            Some(Token::Ident(column)) => self.comparison(column, false),
            Some(Token::Attribute(attribute)) => self.comparison(attribute, true),
            other => Err(RedoError::Configuration(format!(
                "expected comparison, found {:?}",
                other
            ))),
        }
    }

    fn comparison(&mut self, name: String, attribute: bool) -> Result<Condition> {
        let negated = match self.bump() {
            Some(Token::Eq) => false,
            Some(Token::Ne) => true,
            other => {
                return Err(RedoError::Configuration(format!(
                    "expected = or != after {:?}, found {:?}",
                    name, other
                )))
            }
        };
        let value = match self.bump() {
            Some(Token::Literal(v)) => v,
            other => {
                return Err(RedoError::Configuration(format!(
                    "expected string literal, found {:?}",
                    other
                )))
            }
        };
        Ok(match (attribute, negated) {
            (false, false) => Condition::ColumnEq { column: name, value },
            (false, true) => Condition::ColumnNe { column: name, value },
            (true, false) => Condition::AttributeEq { attribute: name, value },
            (true, true) => Condition::AttributeNe { attribute: name, value },
        })
    }
}
