//! Tokenizer for the condition expression language.

use super::ExprError;

/// One lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),

    // Keywords
    And,
    Or,
    Not,
    In,
    Is,
    NoneLit,
    TrueLit,
    FalseLit,
    Lambda,
    For,
    If,
    Else,

    // Operators
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Assign,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
}

fn keyword(word: &str) -> Option<Token> {
    match word {
        "and" => Some(Token::And),
        "or" => Some(Token::Or),
        "not" => Some(Token::Not),
        "in" => Some(Token::In),
        "is" => Some(Token::Is),
        "None" | "null" => Some(Token::NoneLit),
        "True" | "true" => Some(Token::TrueLit),
        "False" | "false" => Some(Token::FalseLit),
        "lambda" => Some(Token::Lambda),
        "for" => Some(Token::For),
        "if" => Some(Token::If),
        "else" => Some(Token::Else),
        _ => None,
    }
}

/// Tokenize an expression string
pub fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];

        if ch.is_whitespace() {
            pos += 1;
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            tokens.push(keyword(&word).unwrap_or(Token::Ident(word)));
            continue;
        }

        if ch.is_ascii_digit() {
            let start = pos;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
            let mut is_float = false;
            if pos + 1 < chars.len() && chars[pos] == '.' && chars[pos + 1].is_ascii_digit() {
                is_float = true;
                pos += 1;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            let text: String = chars[start..pos].iter().collect();
            if is_float {
                let value = text
                    .parse::<f64>()
                    .map_err(|e| ExprError::Parse(format!("bad float literal '{text}': {e}")))?;
                tokens.push(Token::Float(value));
            } else {
                let value = text
                    .parse::<i64>()
                    .map_err(|e| ExprError::Parse(format!("bad integer literal '{text}': {e}")))?;
                tokens.push(Token::Int(value));
            }
            continue;
        }

        if ch == '"' || ch == '\'' {
            let quote = ch;
            pos += 1;
            let mut text = String::new();
            loop {
                if pos >= chars.len() {
                    return Err(ExprError::Parse("unterminated string literal".to_string()));
                }
                let c = chars[pos];
                pos += 1;
                if c == quote {
                    break;
                }
                if c == '\\' {
                    if pos >= chars.len() {
                        return Err(ExprError::Parse("unterminated escape".to_string()));
                    }
                    let escaped = chars[pos];
                    pos += 1;
                    match escaped {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        '\\' => text.push('\\'),
                        '\'' => text.push('\''),
                        '"' => text.push('"'),
                        other => {
                            return Err(ExprError::Parse(format!("unknown escape '\\{other}'")))
                        }
                    }
                } else {
                    text.push(c);
                }
            }
            tokens.push(Token::Str(text));
            continue;
        }

        let two: Option<Token> = if pos + 1 < chars.len() {
            match (ch, chars[pos + 1]) {
                ('=', '=') => Some(Token::Eq),
                ('!', '=') => Some(Token::Ne),
                ('<', '=') => Some(Token::Le),
                ('>', '=') => Some(Token::Ge),
                ('/', '/') => Some(Token::SlashSlash),
                _ => None,
            }
        } else {
            None
        };
        if let Some(token) = two {
            tokens.push(token);
            pos += 2;
            continue;
        }

        let single = match ch {
            '<' => Token::Lt,
            '>' => Token::Gt,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' => Token::Assign,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '.' => Token::Dot,
            other => return Err(ExprError::Parse(format!("unexpected character '{other}'"))),
        };
        tokens.push(single);
        pos += 1;
    }

    Ok(tokens)
}
