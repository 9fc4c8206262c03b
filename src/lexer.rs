use crate::token::{Keyword, Operator, Symbol, Token};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum LexError {
    #[error("invalid character {0:?}")]
    InvalidCharacter(char),
    #[error("multi-line comment was not closed")]
    UnterminatedComment,
    #[error("malformed numeric literal {0}")]
    MalformedNumericLiteral(String),
}

pub type LexResult = Result<Option<Token>, LexError>;

/// A cursor over one source text. Each compilation owns its own lexer.
#[derive(Debug, Clone)]
pub struct Lexer {
    text: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(text: &str) -> Lexer {
        Lexer {
            text: text.chars().collect(),
            position: 0,
        }
    }

    /// Index of the next character that has not been consumed.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the character `stride` places ahead of the cursor without moving it.
    /// A stride of 1 is the current character.
    fn peek_character(&self, stride: usize) -> Option<char> {
        debug_assert!(stride >= 1);
        self.text.get(self.position + stride - 1).copied()
    }

    fn consume_character(&mut self) -> Option<char> {
        let ch = self.peek_character(1)?;
        self.position += 1;
        Some(ch)
    }

    fn current_is(&self, predicate: impl Fn(char) -> bool) -> bool {
        self.peek_character(1).map_or(false, predicate)
    }

    /// Returns the next token, `Ok(None)` once the text is exhausted.
    pub fn next_token(&mut self) -> LexResult {
        self.skip_skippables()?;

        let ch = match self.peek_character(1) {
            Some(ch) => ch,
            None => return Ok(None),
        };

        if is_identifier_head(ch) {
            return Ok(Some(self.lex_identifier()));
        }
        if ch.is_ascii_digit() {
            return self.lex_number().map(Some);
        }
        if let Some(token) = self.lex_single_character() {
            return Ok(Some(token));
        }

        self.consume_character();
        Err(LexError::InvalidCharacter(ch))
    }

    /// Whitespace and comments, repeated until neither makes progress.
    fn skip_skippables(&mut self) -> Result<(), LexError> {
        loop {
            let start = self.position;
            while self.current_is(char::is_whitespace) {
                self.consume_character();
            }
            self.skip_comment()?;
            if self.position == start {
                return Ok(());
            }
        }
    }

    fn skip_comment(&mut self) -> Result<(), LexError> {
        if self.peek_character(1) != Some('/') {
            return Ok(());
        }

        match self.peek_character(2) {
            Some('/') => {
                while let Some(ch) = self.consume_character() {
                    if ch == '\n' {
                        break;
                    }
                }
                Ok(())
            }
            Some('*') => {
                self.position += 2;
                loop {
                    match (self.peek_character(1), self.peek_character(2)) {
                        (Some('*'), Some('/')) => {
                            self.position += 2;
                            return Ok(());
                        }
                        (Some(_), _) => {
                            self.consume_character();
                        }
                        (None, _) => return Err(LexError::UnterminatedComment),
                    }
                }
            }
            _ => Ok(()),
        }
    }

    fn lex_identifier(&mut self) -> Token {
        let mut buffer = String::new();
        while self.current_is(is_identifier_body) {
            buffer.extend(self.consume_character());
        }

        match Keyword::from_word(&buffer) {
            Some(keyword) => Token::Keyword(keyword),
            None => Token::Ident(buffer),
        }
    }

    fn lex_number(&mut self) -> Result<Token, LexError> {
        let mut buffer = String::new();
        self.take_digits(&mut buffer);

        // a trailing '.' stays behind unless a digit follows it
        let fraction_follows = self.peek_character(2).map_or(false, |ch| ch.is_ascii_digit());
        if self.peek_character(1) == Some('.') && fraction_follows {
            buffer.extend(self.consume_character());
            self.take_digits(&mut buffer);
        }

        buffer
            .parse()
            .map(Token::Number)
            .map_err(|_| LexError::MalformedNumericLiteral(buffer))
    }

    fn take_digits(&mut self, buffer: &mut String) {
        while self.current_is(|ch| ch.is_ascii_digit()) {
            buffer.extend(self.consume_character());
        }
    }

    fn lex_single_character(&mut self) -> Option<Token> {
        let ch = self.peek_character(1)?;
        let token = match (Symbol::from_char(ch), Operator::from_char(ch)) {
            (Some(symbol), _) => Token::Symbol(symbol),
            (None, Some(op)) => Token::Operator(op),
            (None, None) => return None,
        };
        self.consume_character();
        Some(token)
    }
}

impl Iterator for Lexer {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

fn is_identifier_head(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_identifier_body(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Lexes the whole input, stopping at the first error.
pub fn lex(input: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(input).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ident(name: &str) -> Token {
        Token::Ident(name.to_string())
    }

    #[test]
    fn empty_and_blank_input_has_no_tokens() {
        assert_eq!(Lexer::new("").next_token(), Ok(None));
        assert_eq!(Lexer::new("   \n\t ").next_token(), Ok(None));
    }

    #[test]
    fn comments_collapse_with_whitespace() {
        let input = "// line\n  /* block\n spanning */ // trailing";
        assert_eq!(lex(input), Ok(vec![]));
        assert_eq!(lex("/**/1/*x*/ // y\n2"), Ok(vec![Token::Number(1.0), Token::Number(2.0)]));
    }

    #[test]
    fn unterminated_block_comment_is_an_error() {
        let mut lexer = Lexer::new("1 /* never closed");
        assert_eq!(lexer.next_token(), Ok(Some(Token::Number(1.0))));
        assert_eq!(lexer.next_token(), Err(LexError::UnterminatedComment));
    }

    #[test]
    fn lone_slash_is_divide() {
        assert_eq!(
            lex("4/2"),
            Ok(vec![
                Token::Number(4.0),
                Token::Operator(Operator::Divide),
                Token::Number(2.0)
            ])
        );
    }

    #[test]
    fn invalid_characters_are_consumed() {
        let mut lexer = Lexer::new("?! a");
        assert_eq!(lexer.next_token(), Err(LexError::InvalidCharacter('?')));
        assert_eq!(lexer.next_token(), Err(LexError::InvalidCharacter('!')));
        assert_eq!(lexer.next_token(), Ok(Some(ident("a"))));
        assert_eq!(lexer.next_token(), Ok(None));
    }

    #[test]
    fn symbols_and_operators() {
        let tokens = lex("( ) , ; +-*/%=").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Symbol(Symbol::OpenParen),
                Token::Symbol(Symbol::CloseParen),
                Token::Symbol(Symbol::Comma),
                Token::Symbol(Symbol::Delimiter),
                Token::Operator(Operator::Plus),
                Token::Operator(Operator::Minus),
                Token::Operator(Operator::Times),
                Token::Operator(Operator::Divide),
                Token::Operator(Operator::Modulo),
                Token::Operator(Operator::Equals),
            ]
        );
    }

    #[test]
    fn identifiers_and_keywords() {
        let tokens = lex("_012 _def def0 define def extern if then else").unwrap();
        assert_eq!(
            tokens,
            vec![
                ident("_012"),
                ident("_def"),
                ident("def0"),
                ident("define"),
                Token::Keyword(Keyword::Def),
                Token::Keyword(Keyword::Extern),
                Token::Keyword(Keyword::If),
                Token::Keyword(Keyword::Then),
                Token::Keyword(Keyword::Else),
            ]
        );
    }

    #[test]
    fn numbers() {
        let mut lexer = Lexer::new("0 -123 3.14 42. .50 123_456");
        assert_eq!(lexer.next_token(), Ok(Some(Token::Number(0.0))));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Operator(Operator::Minus))));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Number(123.0))));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Number(3.14))));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Number(42.0))));
        assert_eq!(lexer.next_token(), Err(LexError::InvalidCharacter('.')));
        assert_eq!(lexer.next_token(), Err(LexError::InvalidCharacter('.')));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Number(50.0))));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Number(123.0))));
        assert_eq!(lexer.next_token(), Ok(Some(ident("_456"))));
        assert_eq!(lexer.next_token(), Ok(None));
    }

    #[test]
    fn mixed_input() {
        let mut lexer = Lexer::new("def_function.extern (123*x^4.5\nifthenelse;else\t");
        assert_eq!(lexer.next_token(), Ok(Some(ident("def_function"))));
        assert_eq!(lexer.next_token(), Err(LexError::InvalidCharacter('.')));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Keyword(Keyword::Extern))));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Symbol(Symbol::OpenParen))));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Number(123.0))));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Operator(Operator::Times))));
        assert_eq!(lexer.next_token(), Ok(Some(ident("x"))));
        assert_eq!(lexer.next_token(), Err(LexError::InvalidCharacter('^')));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Number(4.5))));
        assert_eq!(lexer.next_token(), Ok(Some(ident("ifthenelse"))));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Symbol(Symbol::Delimiter))));
        assert_eq!(lexer.next_token(), Ok(Some(Token::Keyword(Keyword::Else))));
        assert_eq!(lexer.next_token(), Ok(None));
    }

    #[test]
    fn iterator_stops_at_end_of_input() {
        let lexer = Lexer::new("42");
        let tokens: Vec<_> = lexer.collect();
        assert_eq!(tokens, vec![Ok(Token::Number(42.0))]);
    }

    #[test]
    fn lex_works() {
        let input = "def add(x) x+1.0;";
        let tokenized = vec![
            Token::Keyword(Keyword::Def),
            ident("add"),
            Token::Symbol(Symbol::OpenParen),
            ident("x"),
            Token::Symbol(Symbol::CloseParen),
            ident("x"),
            Token::Operator(Operator::Plus),
            Token::Number(1.0),
            Token::Symbol(Symbol::Delimiter),
        ];
        assert_eq!(lex(input), Ok(tokenized));
    }
}
