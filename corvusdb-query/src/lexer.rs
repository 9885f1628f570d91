//! Tokenizer for the Cypher subset. Keywords are matched case-insensitively;
//! identifiers, labels, and relationship types are case-sensitive.

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Parameter(String),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(Keyword),
    Symbol(Symbol),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Match,
    Optional,
    Where,
    Return,
    With,
    Create,
    Merge,
    Set,
    Remove,
    Delete,
    Detach,
    Unwind,
    As,
    Call,
    Yield,
    Union,
    All,
    Distinct,
    OrderBy,
    By,
    Skip,
    Limit,
    Asc,
    Desc,
    And,
    Or,
    Xor,
    Not,
    In,
    Is,
    Null,
    True,
    False,
    StartsWith,
    EndsWith,
    Contains,
    Case,
    When,
    Then,
    Else,
    End,
    Exists,
    Count,
    Any,
    None,
    Single,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    DotDot,
    Pipe,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Arrow,       // ->
    BackArrow,   // <-
    Dash,        // -
    PlusEq,      // +=
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

#[derive(Debug)]
pub struct LexError(pub String);

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { chars: src.char_indices().peekable(), src }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let Some(&(start, c)) = self.chars.peek() else {
                tokens.push(Token::Eof);
                break;
            };
            if c.is_ascii_digit() {
                tokens.push(self.lex_number()?);
            } else if c == '"' || c == '\'' {
                tokens.push(self.lex_string(c)?);
            } else if c == '$' {
                self.chars.next();
                let name = self.lex_ident_text();
                tokens.push(Token::Parameter(name));
            } else if c == '`' {
                self.chars.next();
                let name = self.lex_backtick_ident()?;
                tokens.push(Token::Ident(name));
            } else if c.is_alphabetic() || c == '_' {
                let text = self.lex_ident_text();
                tokens.push(keyword_or_ident(&text));
            } else {
                tokens.push(self.lex_symbol(start)?);
            }
        }
        Ok(tokens)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while let Some(&(_, c)) = self.chars.peek() {
                if c.is_whitespace() {
                    self.chars.next();
                } else {
                    break;
                }
            }
            if self.starts_with("//") {
                while let Some(&(_, c)) = self.chars.peek() {
                    self.chars.next();
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }
            if self.starts_with("/*") {
                self.chars.next();
                self.chars.next();
                while let Some(&(_, c)) = self.chars.peek() {
                    self.chars.next();
                    if c == '*' && self.chars.peek().map(|&(_, c2)| c2) == Some('/') {
                        self.chars.next();
                        break;
                    }
                }
                continue;
            }
            break;
        }
    }

    fn starts_with(&mut self, pat: &str) -> bool {
        let rest = self.remaining();
        rest.starts_with(pat)
    }

    fn remaining(&mut self) -> &'a str {
        match self.chars.peek() {
            Some(&(i, _)) => &self.src[i..],
            None => "",
        }
    }

    fn lex_ident_text(&mut self) -> String {
        let mut s = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        s
    }

    fn lex_backtick_ident(&mut self) -> Result<String, LexError> {
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, '`')) => return Ok(s),
                Some((_, c)) => s.push(c),
                None => return Err(LexError("unterminated backtick identifier".into())),
            }
        }
    }

    fn lex_number(&mut self) -> Result<Token, LexError> {
        let mut s = String::new();
        let mut is_float = false;
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.chars.next();
            } else if c == '.' && !is_float {
                let mut clone = self.chars.clone();
                clone.next();
                if matches!(clone.peek(), Some((_, c2)) if c2.is_ascii_digit()) {
                    is_float = true;
                    s.push(c);
                    self.chars.next();
                } else {
                    break;
                }
            } else if (c == 'e' || c == 'E') && !s.is_empty() {
                is_float = true;
                s.push(c);
                self.chars.next();
                if let Some(&(_, sign)) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        s.push(sign);
                        self.chars.next();
                    }
                }
            } else {
                break;
            }
        }
        if is_float {
            s.parse::<f64>().map(Token::Float).map_err(|e| LexError(e.to_string()))
        } else {
            s.parse::<i64>().map(Token::Int).map_err(|e| LexError(e.to_string()))
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, LexError> {
        self.chars.next();
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => return Ok(Token::Str(s)),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => s.push('\n'),
                    Some((_, 't')) => s.push('\t'),
                    Some((_, 'r')) => s.push('\r'),
                    Some((_, c)) => s.push(c),
                    None => return Err(LexError("unterminated string".into())),
                },
                Some((_, c)) => s.push(c),
                None => return Err(LexError("unterminated string".into())),
            }
        }
    }

    fn lex_symbol(&mut self, _start: usize) -> Result<Token, LexError> {
        let (_, c) = self.chars.next().unwrap();
        let peek = self.chars.peek().map(|&(_, c)| c);
        let sym = match c {
            '(' => Symbol::LParen,
            ')' => Symbol::RParen,
            '[' => Symbol::LBracket,
            ']' => Symbol::RBracket,
            '{' => Symbol::LBrace,
            '}' => Symbol::RBrace,
            ':' => Symbol::Colon,
            ',' => Symbol::Comma,
            '.' => {
                if peek == Some('.') {
                    self.chars.next();
                    Symbol::DotDot
                } else {
                    Symbol::Dot
                }
            }
            '|' => Symbol::Pipe,
            '+' => {
                if peek == Some('=') {
                    self.chars.next();
                    Symbol::PlusEq
                } else {
                    Symbol::Plus
                }
            }
            '*' => Symbol::Star,
            '/' => Symbol::Slash,
            '%' => Symbol::Percent,
            '^' => Symbol::Caret,
            '=' => Symbol::Eq,
            '<' => match peek {
                Some('>') => {
                    self.chars.next();
                    Symbol::Ne
                }
                Some('=') => {
                    self.chars.next();
                    Symbol::Le
                }
                Some('-') => {
                    self.chars.next();
                    Symbol::BackArrow
                }
                _ => Symbol::Lt,
            },
            '>' => {
                if peek == Some('=') {
                    self.chars.next();
                    Symbol::Ge
                } else {
                    Symbol::Gt
                }
            }
            '-' => {
                if peek == Some('>') {
                    self.chars.next();
                    Symbol::Arrow
                } else {
                    Symbol::Dash
                }
            }
            other => return Err(LexError(format!("unexpected character '{other}'"))),
        };
        Ok(Token::Symbol(sym))
    }
}

fn keyword_or_ident(text: &str) -> Token {
    let lower = text.to_ascii_lowercase();
    let kw = match lower.as_str() {
        "match" => Some(Keyword::Match),
        "optional" => Some(Keyword::Optional),
        "where" => Some(Keyword::Where),
        "return" => Some(Keyword::Return),
        "with" => Some(Keyword::With),
        "create" => Some(Keyword::Create),
        "merge" => Some(Keyword::Merge),
        "set" => Some(Keyword::Set),
        "remove" => Some(Keyword::Remove),
        "delete" => Some(Keyword::Delete),
        "detach" => Some(Keyword::Detach),
        "unwind" => Some(Keyword::Unwind),
        "as" => Some(Keyword::As),
        "call" => Some(Keyword::Call),
        "yield" => Some(Keyword::Yield),
        "union" => Some(Keyword::Union),
        "all" => Some(Keyword::All),
        "distinct" => Some(Keyword::Distinct),
        "order" => Some(Keyword::OrderBy),
        "by" => Some(Keyword::By),
        "skip" => Some(Keyword::Skip),
        "limit" => Some(Keyword::Limit),
        "asc" | "ascending" => Some(Keyword::Asc),
        "desc" | "descending" => Some(Keyword::Desc),
        "and" => Some(Keyword::And),
        "or" => Some(Keyword::Or),
        "xor" => Some(Keyword::Xor),
        "not" => Some(Keyword::Not),
        "in" => Some(Keyword::In),
        "is" => Some(Keyword::Is),
        "null" => Some(Keyword::Null),
        "true" => Some(Keyword::True),
        "false" => Some(Keyword::False),
        "starts" => Some(Keyword::StartsWith),
        "ends" => Some(Keyword::EndsWith),
        "contains" => Some(Keyword::Contains),
        "case" => Some(Keyword::Case),
        "when" => Some(Keyword::When),
        "then" => Some(Keyword::Then),
        "else" => Some(Keyword::Else),
        "end" => Some(Keyword::End),
        "exists" => Some(Keyword::Exists),
        "count" => Some(Keyword::Count),
        "any" => Some(Keyword::Any),
        "none" => Some(Keyword::None),
        "single" => Some(Keyword::Single),
        "on" => Some(Keyword::On),
        _ => None,
    };
    match kw {
        Some(k) => Token::Keyword(k),
        None => Token::Ident(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_simple_match_query() {
        let tokens = Lexer::new("MATCH (n:Person) RETURN n.name").tokenize().unwrap();
        assert!(matches!(tokens[0], Token::Keyword(Keyword::Match)));
        assert!(matches!(tokens[1], Token::Symbol(Symbol::LParen)));
        assert!(matches!(&tokens[2], Token::Ident(s) if s == "n"));
    }

    #[test]
    fn keywords_are_case_insensitive_identifiers_are_not() {
        let tokens = Lexer::new("match (N) return N").tokenize().unwrap();
        assert!(matches!(tokens[0], Token::Keyword(Keyword::Match)));
        assert!(matches!(&tokens[2], Token::Ident(s) if s == "N"));
    }

    #[test]
    fn lexes_float_and_parameter() {
        let tokens = Lexer::new("1.5 $foo").tokenize().unwrap();
        assert!(matches!(tokens[0], Token::Float(f) if (f - 1.5).abs() < 1e-9));
        assert!(matches!(&tokens[1], Token::Parameter(s) if s == "foo"));
    }
}
