use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Keyword {
    If,
    Then,
    Else,
    Def,
    Extern,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Keyword> {
        match word {
            "if" => Some(Keyword::If),
            "then" => Some(Keyword::Then),
            "else" => Some(Keyword::Else),
            "def" => Some(Keyword::Def),
            "extern" => Some(Keyword::Extern),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Then => "then",
            Keyword::Else => "else",
            Keyword::Def => "def",
            Keyword::Extern => "extern",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Symbol {
    OpenParen,
    CloseParen,
    Comma,
    Delimiter,
    // the lexer treats newline as whitespace; the parser skips it if a token source yields one
    NewLine,
}

impl Symbol {
    pub fn from_char(ch: char) -> Option<Symbol> {
        match ch {
            '(' => Some(Symbol::OpenParen),
            ')' => Some(Symbol::CloseParen),
            ',' => Some(Symbol::Comma),
            ';' => Some(Symbol::Delimiter),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Operator {
    Plus,
    Minus,
    Times,
    Divide,
    Modulo,
    Equals,
}

impl Operator {
    pub fn from_char(ch: char) -> Option<Operator> {
        match ch {
            '+' => Some(Operator::Plus),
            '-' => Some(Operator::Minus),
            '*' => Some(Operator::Times),
            '/' => Some(Operator::Divide),
            '%' => Some(Operator::Modulo),
            '=' => Some(Operator::Equals),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Operator::Plus => '+',
            Operator::Minus => '-',
            Operator::Times => '*',
            Operator::Divide => '/',
            Operator::Modulo => '%',
            Operator::Equals => '=',
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Keyword(Keyword),
    Ident(String),
    Number(f64),
    Operator(Operator),
    Symbol(Symbol),
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::OpenParen => write!(f, "\"(\""),
            Symbol::CloseParen => write!(f, "\")\""),
            Symbol::Comma => write!(f, "\",\""),
            Symbol::Delimiter => write!(f, "\";\""),
            Symbol::NewLine => write!(f, "newline"),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Keyword(keyword) => write!(f, "keyword `{}`", keyword),
            Token::Ident(name) => write!(f, "identifier `{}`", name),
            Token::Number(value) => write!(f, "number {}", value),
            Token::Operator(op) => write!(f, "operator `{}`", op),
            Token::Symbol(symbol) => write!(f, "symbol {}", symbol),
        }
    }
}
