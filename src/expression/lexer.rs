//! Expression tokenizer

use super::{parse_number, ExpressionError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Lexeme {
    String(String),
    Number(f64),
    True,
    False,
    Null,
    Identifier(String),
    Dot,
    Comma,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Bang,
}

impl Lexeme {
    /// Whether a `-` following this lexeme could start a negative number
    fn allows_signed_number(previous: Option<&Lexeme>) -> bool {
        !matches!(
            previous,
            Some(
                Lexeme::String(_)
                    | Lexeme::Number(_)
                    | Lexeme::True
                    | Lexeme::False
                    | Lexeme::Null
                    | Lexeme::Identifier(_)
                    | Lexeme::RightParen
                    | Lexeme::RightBracket
            )
        )
    }
}

/// Split an expression into lexemes paired with their byte offsets
pub(crate) fn tokenize(source: &str) -> Result<Vec<(Lexeme, usize)>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut lexemes: Vec<(Lexeme, usize)> = Vec::new();
    let mut i = 0;

    let unexpected = |symbol: &str, position: usize| ExpressionError::UnexpectedSymbol {
        symbol: symbol.to_string(),
        position,
        expression: source.to_string(),
    };

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let single = match c {
            '.' if !next.map(|n| n.is_ascii_digit()).unwrap_or(false) => Some(Lexeme::Dot),
            ',' => Some(Lexeme::Comma),
            '(' => Some(Lexeme::LeftParen),
            ')' => Some(Lexeme::RightParen),
            '[' => Some(Lexeme::LeftBracket),
            ']' => Some(Lexeme::RightBracket),
            _ => None,
        };
        if let Some(lexeme) = single {
            lexemes.push((lexeme, offset));
            i += 1;
            continue;
        }

        let pair = match (c, next) {
            ('=', Some('=')) => Some(Lexeme::Equal),
            ('!', Some('=')) => Some(Lexeme::NotEqual),
            ('<', Some('=')) => Some(Lexeme::LessEqual),
            ('>', Some('=')) => Some(Lexeme::GreaterEqual),
            ('&', Some('&')) => Some(Lexeme::And),
            ('|', Some('|')) => Some(Lexeme::Or),
            _ => None,
        };
        if let Some(lexeme) = pair {
            lexemes.push((lexeme, offset));
            i += 2;
            continue;
        }

        match c {
            '<' => {
                lexemes.push((Lexeme::Less, offset));
                i += 1;
            }
            '>' => {
                lexemes.push((Lexeme::Greater, offset));
                i += 1;
            }
            '!' => {
                lexemes.push((Lexeme::Bang, offset));
                i += 1;
            }
            '\'' => {
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(ExpressionError::UnexpectedEnd(source.to_string())),
                        Some((_, '\'')) => {
                            if chars.get(j + 1).map(|(_, c)| *c) == Some('\'') {
                                value.push('\'');
                                j += 2;
                            } else {
                                j += 1;
                                break;
                            }
                        }
                        Some((_, ch)) => {
                            value.push(*ch);
                            j += 1;
                        }
                    }
                }
                lexemes.push((Lexeme::String(value), offset));
                i = j;
            }
            c if c.is_ascii_digit()
                || c == '.'
                || ((c == '-' || c == '+')
                    && next.map(|n| n.is_ascii_digit() || n == '.').unwrap_or(false)
                    && Lexeme::allows_signed_number(lexemes.last().map(|(l, _)| l))) =>
            {
                let mut j = i + 1;
                while let Some((_, ch)) = chars.get(j) {
                    let prev = chars[j - 1].1;
                    let continues = ch.is_ascii_alphanumeric()
                        || *ch == '.'
                        || ((*ch == '-' || *ch == '+') && (prev == 'e' || prev == 'E'));
                    if !continues {
                        break;
                    }
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let text = &source[offset..end];
                let (sign, digits) = match text.strip_prefix('-') {
                    Some(rest) => (-1.0, rest),
                    None => (1.0, text.trim_start_matches('+')),
                };
                let value = parse_number(digits).ok_or_else(|| unexpected(text, offset))?;
                lexemes.push((Lexeme::Number(sign * value), offset));
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while let Some((_, ch)) = chars.get(j) {
                    if ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-' {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let word = &source[offset..end];
                let lexeme = if word.eq_ignore_ascii_case("true") {
                    Lexeme::True
                } else if word.eq_ignore_ascii_case("false") {
                    Lexeme::False
                } else if word.eq_ignore_ascii_case("null") {
                    Lexeme::Null
                } else {
                    Lexeme::Identifier(word.to_string())
                };
                lexemes.push((lexeme, offset));
                i = j;
            }
            other => return Err(unexpected(&other.to_string(), offset)),
        }
    }

    Ok(lexemes)
}
