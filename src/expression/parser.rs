//! Precedence-climbing parser producing [`Expr`] trees

use super::lexer::{tokenize, Lexeme};
use super::{number_value, BinaryOp, Expr, ExpressionError, ExpressionFlags, Function};
use serde_json::Value;

const UNARY_BINDING: u8 = 5;

/// Parse the body of a `${{ }}` block
pub fn parse(source: &str, flags: ExpressionFlags) -> Result<Expr, ExpressionError> {
    let lexemes = tokenize(source)?;
    if lexemes.is_empty() {
        return Err(ExpressionError::UnexpectedEnd(source.to_string()));
    }

    let mut parser = Parser {
        source,
        lexemes,
        position: 0,
        flags,
    };
    let expr = parser.expression(0)?;
    if let Some((lexeme, offset)) = parser.lexemes.get(parser.position) {
        return Err(parser.unexpected(lexeme, *offset));
    }
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    lexemes: Vec<(Lexeme, usize)>,
    position: usize,
    flags: ExpressionFlags,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.position).map(|(l, _)| l)
    }

    fn advance(&mut self) -> Result<(Lexeme, usize), ExpressionError> {
        let item = self
            .lexemes
            .get(self.position)
            .cloned()
            .ok_or_else(|| ExpressionError::UnexpectedEnd(self.source.to_string()))?;
        self.position += 1;
        Ok(item)
    }

    fn expect(&mut self, expected: Lexeme) -> Result<(), ExpressionError> {
        let (lexeme, offset) = self.advance()?;
        if lexeme != expected {
            return Err(self.unexpected(&lexeme, offset));
        }
        Ok(())
    }

    fn unexpected(&self, lexeme: &Lexeme, offset: usize) -> ExpressionError {
        ExpressionError::UnexpectedSymbol {
            symbol: describe(lexeme),
            position: offset,
            expression: self.source.to_string(),
        }
    }

    fn require_operators(&self) -> Result<(), ExpressionError> {
        if self.flags.allow_operators {
            Ok(())
        } else {
            Err(ExpressionError::OperatorsDisabled(self.source.to_string()))
        }
    }

    fn expression(&mut self, min_binding: u8) -> Result<Expr, ExpressionError> {
        let mut left = self.unary()?;

        loop {
            let (op, binding) = match self.peek() {
                Some(Lexeme::Or) => (BinaryOp::Or, 1),
                Some(Lexeme::And) => (BinaryOp::And, 2),
                Some(Lexeme::Equal) => (BinaryOp::Eq, 3),
                Some(Lexeme::NotEqual) => (BinaryOp::Ne, 3),
                Some(Lexeme::Less) => (BinaryOp::Lt, 4),
                Some(Lexeme::LessEqual) => (BinaryOp::Le, 4),
                Some(Lexeme::Greater) => (BinaryOp::Gt, 4),
                Some(Lexeme::GreaterEqual) => (BinaryOp::Ge, 4),
                _ => break,
            };
            if binding < min_binding {
                break;
            }
            self.require_operators()?;
            self.position += 1;
            let right = self.expression(binding + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Lexeme::Bang) {
            self.require_operators()?;
            self.position += 1;
            let operand = self.expression(UNARY_BINDING)?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        let primary = self.primary()?;
        self.postfix(primary)
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let (lexeme, offset) = self.advance()?;
        match lexeme {
            Lexeme::String(s) => Ok(Expr::Literal(Value::String(s))),
            Lexeme::Number(n) => Ok(Expr::Literal(number_value(n))),
            Lexeme::True => Ok(Expr::Literal(Value::Bool(true))),
            Lexeme::False => Ok(Expr::Literal(Value::Bool(false))),
            Lexeme::Null => Ok(Expr::Literal(Value::Null)),
            Lexeme::LeftParen => {
                let inner = self.expression(0)?;
                self.expect(Lexeme::RightParen)?;
                Ok(inner)
            }
            Lexeme::Identifier(name) => {
                if self.peek() == Some(&Lexeme::LeftParen) {
                    self.position += 1;
                    self.call(&name)
                } else {
                    Ok(Expr::NamedValue(name))
                }
            }
            other => Err(self.unexpected(&other, offset)),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr, ExpressionError> {
        let function = Function::lookup(name)
            .ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()))?;

        let mut args = Vec::new();
        if self.peek() == Some(&Lexeme::RightParen) {
            self.position += 1;
        } else {
            loop {
                args.push(self.expression(0)?);
                let (lexeme, offset) = self.advance()?;
                match lexeme {
                    Lexeme::Comma => continue,
                    Lexeme::RightParen => break,
                    other => return Err(self.unexpected(&other, offset)),
                }
            }
        }

        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else if max == usize::MAX {
                format!("at least {}", min)
            } else {
                format!("{} to {}", min, max)
            };
            return Err(ExpressionError::ArgumentCount {
                name: function.name().to_string(),
                expected,
                found: args.len(),
            });
        }

        Ok(Expr::Call { function, args })
    }

    fn postfix(&mut self, mut target: Expr) -> Result<Expr, ExpressionError> {
        loop {
            match self.peek() {
                Some(Lexeme::Dot) => {
                    self.position += 1;
                    let (lexeme, offset) = self.advance()?;
                    let property = match lexeme {
                        Lexeme::Identifier(name) => name,
                        // keywords are valid property names
                        Lexeme::True => "true".to_string(),
                        Lexeme::False => "false".to_string(),
                        Lexeme::Null => "null".to_string(),
                        other => return Err(self.unexpected(&other, offset)),
                    };
                    target = Expr::Index {
                        target: Box::new(target),
                        index: Box::new(Expr::Literal(Value::String(property))),
                    };
                }
                Some(Lexeme::LeftBracket) => {
                    self.position += 1;
                    let index = self.expression(0)?;
                    self.expect(Lexeme::RightBracket)?;
                    target = Expr::Index {
                        target: Box::new(target),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(target),
            }
        }
    }
}

fn describe(lexeme: &Lexeme) -> String {
    match lexeme {
        Lexeme::String(s) => format!("'{}'", s),
        Lexeme::Number(n) => super::format_number(*n),
        Lexeme::True => "true".to_string(),
        Lexeme::False => "false".to_string(),
        Lexeme::Null => "null".to_string(),
        Lexeme::Identifier(name) => name.clone(),
        Lexeme::Dot => ".".to_string(),
        Lexeme::Comma => ",".to_string(),
        Lexeme::LeftParen => "(".to_string(),
        Lexeme::RightParen => ")".to_string(),
        Lexeme::LeftBracket => "[".to_string(),
        Lexeme::RightBracket => "]".to_string(),
        Lexeme::Equal => "==".to_string(),
        Lexeme::NotEqual => "!=".to_string(),
        Lexeme::Less => "<".to_string(),
        Lexeme::LessEqual => "<=".to_string(),
        Lexeme::Greater => ">".to_string(),
        Lexeme::GreaterEqual => ">=".to_string(),
        Lexeme::And => "&&".to_string(),
        Lexeme::Or => "||".to_string(),
        Lexeme::Bang => "!".to_string(),
    }
}
