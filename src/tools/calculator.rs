//! Local arithmetic tool.
//!
//! Supports percentages (`percent` of `value`) and plain arithmetic
//! expressions over `+ - * / ( )` with decimals and unary minus.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext};
use crate::error::ToolError;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Compute percentages (percent of value) or evaluate arithmetic expressions"
    }

    fn category(&self) -> &str {
        "calculator"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["percentage", "evaluate"],
                    "description": "percentage: percent of value; evaluate: arithmetic expression"
                },
                "percent": { "type": "number", "description": "Percentage, e.g. 15 for 15%" },
                "value": { "type": "number", "description": "Base value the percentage applies to" },
                "expression": { "type": "string", "description": "Arithmetic expression, e.g. (120 - 20) * 1.5" }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        match params["operation"].as_str().unwrap_or("") {
            "percentage" => {
                let percent = number_param(&params, "percent")?;
                let value = number_param(&params, "value")?;
                let result = percentage(percent, value);
                Ok(json!({
                    "result": number_value(result),
                    "expression": format!("{}% of {}", fmt_number(percent), fmt_number(value)),
                }))
            }
            "evaluate" => {
                let expression = super::required_str(&params, "expression")?;
                let result = evaluate(expression)?;
                Ok(json!({
                    "result": number_value(result),
                    "expression": expression,
                }))
            }
            other => Err(ToolError::InvalidInput(format!(
                "unsupported operation '{}'",
                other
            ))),
        }
    }
}

fn number_param(params: &Value, name: &str) -> Result<f64, ToolError> {
    params
        .get(name)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| ToolError::InvalidInput(format!("missing required parameter: {}", name)))
}

pub fn percentage(percent: f64, value: f64) -> f64 {
    value * percent / 100.0
}

/// Whole numbers are emitted as JSON integers so `30` renders as `30`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

fn fmt_number(n: f64) -> String {
    number_value(n).to_string()
}

/// Longest expression accepted, in characters.
pub const MAX_EXPRESSION_CHARS: usize = 512;
/// Deepest nesting of parentheses and unary signs.
const MAX_DEPTH: usize = 64;

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, ToolError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ToolError::InvalidInput(format!(
            "unexpected trailing input in '{}'",
            expression
        )));
    }
    if !value.is_finite() {
        return Err(ToolError::InvalidInput("result is not finite".to_string()));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ToolError> {
    if input.chars().nth(MAX_EXPRESSION_CHARS).is_some() {
        return Err(ToolError::InvalidInput(format!(
            "expression longer than {} characters",
            MAX_EXPRESSION_CHARS
        )));
    }
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | ',' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ToolError::InvalidInput(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Num(n));
            }
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            'x' | '×' => {
                tokens.push(Token::Op('*'));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "unexpected character '{}'",
                    other
                )))
            }
        }
    }

    if tokens.is_empty() {
        return Err(ToolError::InvalidInput("expression is empty".to_string()));
    }
    Ok(tokens)
}

// expr   := term (('+' | '-') term)*
// term   := factor (('*' | '/') factor)*
// factor := '-' factor | '+' factor | NUM | '(' expr ')'
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> Result<f64, ToolError> {
        let mut acc = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            if op == '+' {
                acc += rhs;
            } else {
                acc -= rhs;
            }
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<f64, ToolError> {
        let mut acc = self.factor()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '*' {
                acc *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err(ToolError::InvalidInput("division by zero".to_string()));
                }
                acc /= rhs;
            }
        }
        Ok(acc)
    }

    /// Recurse into a nested factor or sub-expression, bounded by `MAX_DEPTH`.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ToolError>,
    ) -> Result<T, ToolError> {
        if self.depth >= MAX_DEPTH {
            return Err(ToolError::InvalidInput(
                "expression nested too deeply".to_string(),
            ));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn factor(&mut self) -> Result<f64, ToolError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Op('-')) => Ok(-self.nested(Self::factor)?),
            Some(Token::Op('+')) => self.nested(Self::factor),
            Some(Token::LParen) => {
                let value = self.nested(Self::expr)?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(ToolError::InvalidInput("missing closing parenthesis".to_string())),
                }
            }
            Some(tok) => Err(ToolError::InvalidInput(format!(
                "unexpected token {:?}",
                tok
            ))),
            None => Err(ToolError::InvalidInput(
                "unexpected end of expression".to_string(),
            )),
        }
    }
}
