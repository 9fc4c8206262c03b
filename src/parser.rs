use std::collections::HashMap;

use crate::ast::{Expression, File, Function, Prototype};
use crate::lexer::{LexError, Lexer};
use crate::token::{Keyword, Operator, Symbol, Token};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParserError {
    #[error("unexpected {}", describe(.0))]
    UnexpectedToken(Option<Token>),
    #[error(transparent)]
    Lex(#[from] LexError),
}

fn describe(token: &Option<Token>) -> String {
    match token {
        Some(token) => token.to_string(),
        None => "end of input".to_string(),
    }
}

pub type PartialParseResult = Result<Expression, ParserError>;

/// How chains of binary operators are grouped.
#[derive(Debug, PartialEq, Clone)]
pub enum Precedence {
    /// Every operator binds equally and groups to the right: `a - b - c` is `a - (b - c)`.
    Uniform,
    /// Precedence climbing over the given table, grouping to the left.
    /// Operators missing from the table end the expression.
    Climbing(HashMap<Operator, u32>),
}

impl Precedence {
    pub fn standard() -> Precedence {
        let mut operator_precedence = HashMap::new();
        operator_precedence.insert(Operator::Equals, 10);
        operator_precedence.insert(Operator::Plus, 20);
        operator_precedence.insert(Operator::Minus, 20);
        operator_precedence.insert(Operator::Times, 40);
        operator_precedence.insert(Operator::Divide, 40);
        operator_precedence.insert(Operator::Modulo, 40);
        Precedence::Climbing(operator_precedence)
    }
}

impl Default for Precedence {
    fn default() -> Self {
        Precedence::Uniform
    }
}

/// Recursive-descent parser with one token of lookahead.
pub struct Parser<I> {
    tokens: I,
    current: Option<Token>,
    precedence: Precedence,
}

impl<I> Parser<I>
where
    I: Iterator<Item = Result<Token, LexError>>,
{
    pub fn new(tokens: I) -> Result<Self, ParserError> {
        Self::with_precedence(tokens, Precedence::default())
    }

    pub fn with_precedence(tokens: I, precedence: Precedence) -> Result<Self, ParserError> {
        let mut parser = Parser {
            tokens,
            current: None,
            precedence,
        };
        parser.consume_token()?;
        Ok(parser)
    }

    /// Advances to the next token, skipping newlines.
    fn consume_token(&mut self) -> Result<(), ParserError> {
        loop {
            self.current = self.tokens.next().transpose()?;
            if self.current != Some(Token::Symbol(Symbol::NewLine)) {
                return Ok(());
            }
        }
    }

    fn expect(&mut self, target: Token) -> Result<(), ParserError> {
        if self.current.as_ref() != Some(&target) {
            return Err(self.unexpected());
        }
        self.consume_token()
    }

    fn expect_symbol(&mut self, symbol: Symbol) -> Result<(), ParserError> {
        self.expect(Token::Symbol(symbol))
    }

    fn current_is_symbol(&self, symbol: Symbol) -> bool {
        self.current == Some(Token::Symbol(symbol))
    }

    fn unexpected(&self) -> ParserError {
        ParserError::UnexpectedToken(self.current.clone())
    }

    pub fn parse_file(mut self) -> Result<File, ParserError> {
        let mut file = File::default();

        loop {
            let keyword = match self.current {
                Some(Token::Keyword(keyword)) => Some(keyword),
                Some(_) => None,
                None => break,
            };

            match keyword {
                Some(Keyword::Extern) => {
                    let prototype = self.parse_extern()?;
                    file.externals.push(prototype);
                }
                Some(Keyword::Def) => {
                    let function = self.parse_function()?;
                    file.functions.push(function);
                }
                _ => {
                    let expression = self.parse_expr()?;
                    if self.current_is_symbol(Symbol::Delimiter) {
                        self.consume_token()?;
                    }
                    file.expressions.push(expression);
                }
            }
        }

        Ok(file)
    }

    /// `( element , element , ... )`, empty lists and a trailing comma allowed.
    fn parse_tuple<T>(
        &mut self,
        element: fn(&mut Self) -> Result<T, ParserError>,
    ) -> Result<Vec<T>, ParserError> {
        self.expect_symbol(Symbol::OpenParen)?;

        let mut elements = Vec::new();
        while !self.current_is_symbol(Symbol::CloseParen) {
            elements.push(element(self)?);
            if self.current_is_symbol(Symbol::Comma) {
                self.consume_token()?;
            } else {
                break;
            }
        }

        self.expect_symbol(Symbol::CloseParen)?;
        Ok(elements)
    }

    fn parse_identifier(&mut self) -> Result<String, ParserError> {
        match self.current.take() {
            Some(Token::Ident(name)) => {
                self.consume_token()?;
                Ok(name)
            }
            other => {
                self.current = other;
                Err(self.unexpected())
            }
        }
    }

    fn parse_prototype(&mut self) -> Result<Prototype, ParserError> {
        let name = self.parse_identifier()?;
        let args = self.parse_tuple(Self::parse_identifier)?;
        Ok(Prototype { name, args })
    }

    fn parse_extern(&mut self) -> Result<Prototype, ParserError> {
        self.expect(Token::Keyword(Keyword::Extern))?;
        let prototype = self.parse_prototype()?;
        self.expect_symbol(Symbol::Delimiter)?;
        Ok(prototype)
    }

    fn parse_function(&mut self) -> Result<Function, ParserError> {
        self.expect(Token::Keyword(Keyword::Def))?;
        let prototype = self.parse_prototype()?;
        let body = self.parse_expr()?;
        self.expect_symbol(Symbol::Delimiter)?;
        Ok(Function { prototype, body })
    }

    pub fn parse_expr(&mut self) -> PartialParseResult {
        let lhs = self.parse_primary()?;

        if let Precedence::Uniform = self.precedence {
            self.parse_uniform_rhs(lhs)
        } else {
            self.parse_rhs(0, lhs)
        }
    }

    fn parse_primary(&mut self) -> PartialParseResult {
        match self.current {
            Some(Token::Number(value)) => {
                self.consume_token()?;
                Ok(Expression::Number(value))
            }
            Some(Token::Ident(_)) => self.parse_identifier_expr(),
            Some(Token::Symbol(Symbol::OpenParen)) => self.parse_nested(),
            Some(Token::Keyword(Keyword::If)) => self.parse_if(),
            _ => Err(self.unexpected()),
        }
    }

    /// A call when the identifier is directly followed by `(`, a variable otherwise.
    fn parse_identifier_expr(&mut self) -> PartialParseResult {
        let name = self.parse_identifier()?;
        if self.current_is_symbol(Symbol::OpenParen) {
            let args = self.parse_tuple(Self::parse_expr)?;
            Ok(Expression::Call(name, args))
        } else {
            Ok(Expression::Variable(name))
        }
    }

    fn parse_nested(&mut self) -> PartialParseResult {
        self.expect_symbol(Symbol::OpenParen)?;
        let res = self.parse_expr()?;
        self.expect_symbol(Symbol::CloseParen)?;
        Ok(res)
    }

    fn parse_if(&mut self) -> PartialParseResult {
        self.expect(Token::Keyword(Keyword::If))?;
        let condition = self.parse_expr()?;
        self.expect(Token::Keyword(Keyword::Then))?;
        let then = self.parse_expr()?;
        self.expect(Token::Keyword(Keyword::Else))?;
        let otherwise = self.parse_expr()?;
        Ok(Expression::if_else(condition, then, otherwise))
    }

    fn parse_uniform_rhs(&mut self, lhs: Expression) -> PartialParseResult {
        if let Some(Token::Operator(op)) = self.current {
            self.consume_token()?;
            let rhs = self.parse_expr()?;
            Ok(Expression::binary(op, lhs, rhs))
        } else {
            Ok(lhs)
        }
    }

    fn current_precedence(&self) -> Option<(Operator, u32)> {
        match (&self.current, &self.precedence) {
            (Some(Token::Operator(op)), Precedence::Climbing(table)) => {
                table.get(op).map(|precedence| (*op, *precedence))
            }
            _ => None,
        }
    }

    fn parse_rhs(&mut self, expr_precedence: u32, lhs: Expression) -> PartialParseResult {
        let mut result = lhs;

        loop {
            let (operator, precedence) = match self.current_precedence() {
                Some((op, pr)) if pr >= expr_precedence => (op, pr),
                _ => return Ok(result),
            };
            self.consume_token()?;

            let mut rhs = self.parse_primary()?;

            if let Some((_, next_precedence)) = self.current_precedence() {
                if precedence < next_precedence {
                    rhs = self.parse_rhs(precedence + 1, rhs)?;
                }
            }

            result = Expression::binary(operator, result, rhs);
        }
    }
}

pub fn parse_str(input: &str) -> Result<File, ParserError> {
    parse_str_with(input, Precedence::default())
}

pub fn parse_str_with(input: &str, precedence: Precedence) -> Result<File, ParserError> {
    Parser::with_precedence(Lexer::new(input), precedence)?.parse_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn num(value: f64) -> Expression {
        Expression::Number(value)
    }

    fn var(name: &str) -> Expression {
        Expression::Variable(name.to_string())
    }

    fn parse_expr_str(input: &str, precedence: Precedence) -> PartialParseResult {
        Parser::with_precedence(Lexer::new(input), precedence)?.parse_expr()
    }

    #[test]
    fn single_number() {
        let file = parse_str("42").unwrap();
        assert_eq!(file.expressions, vec![num(42.0)]);
        assert!(file.functions.is_empty());
        assert!(file.externals.is_empty());
    }

    #[test]
    fn uniform_operators_group_right() {
        let res = parse_expr_str("1 - 2 * 3 - 4", Precedence::Uniform).unwrap();
        let target = Expression::binary(
            Operator::Minus,
            num(1.0),
            Expression::binary(
                Operator::Times,
                num(2.0),
                Expression::binary(Operator::Minus, num(3.0), num(4.0)),
            ),
        );
        assert_eq!(res, target);
    }

    #[test]
    fn climbing_respects_precedence() {
        let res = parse_expr_str("x + 1 * (2 - 3)", Precedence::standard()).unwrap();
        let target = Expression::binary(
            Operator::Plus,
            var("x"),
            Expression::binary(
                Operator::Times,
                num(1.0),
                Expression::binary(Operator::Minus, num(2.0), num(3.0)),
            ),
        );
        assert_eq!(res, target);
    }

    #[test]
    fn climbing_groups_left() {
        let res = parse_expr_str("1 - 2 - 3 * 4 = 5", Precedence::standard()).unwrap();
        let target = Expression::binary(
            Operator::Equals,
            Expression::binary(
                Operator::Minus,
                Expression::binary(Operator::Minus, num(1.0), num(2.0)),
                Expression::binary(Operator::Times, num(3.0), num(4.0)),
            ),
            num(5.0),
        );
        assert_eq!(res, target);
    }

    #[test]
    fn extern_and_call() {
        let file = parse_str("extern foo(a,b); foo(1,2)").unwrap();
        assert_eq!(
            file.externals,
            vec![Prototype {
                name: "foo".to_string(),
                args: vec!["a".to_string(), "b".to_string()],
            }]
        );
        assert_eq!(
            file.expressions,
            vec![Expression::Call("foo".to_string(), vec![num(1.0), num(2.0)])]
        );
    }

    #[test]
    fn function_definition() {
        let file = parse_str("def id(x) x; id(5)").unwrap();
        assert_eq!(
            file.functions,
            vec![Function {
                prototype: Prototype {
                    name: "id".to_string(),
                    args: vec!["x".to_string()],
                },
                body: var("x"),
            }]
        );
        assert_eq!(
            file.expressions,
            vec![Expression::Call("id".to_string(), vec![num(5.0)])]
        );
    }

    #[test]
    fn tuples_allow_empty_and_trailing_comma() {
        let file = parse_str("def zero() 0; extern pair(a, b,); pair(zero(), 1,)").unwrap();
        assert_eq!(file.functions[0].prototype.args, Vec::<String>::new());
        assert_eq!(file.externals[0].args, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            file.expressions,
            vec![Expression::Call(
                "pair".to_string(),
                vec![Expression::Call("zero".to_string(), vec![]), num(1.0)]
            )]
        );
    }

    #[test]
    fn tuples_require_commas() {
        assert_eq!(
            parse_str("f(a b)"),
            Err(ParserError::UnexpectedToken(Some(Token::Ident("b".to_string()))))
        );
    }

    #[test]
    fn if_else_expression() {
        let file = parse_str("if 1 then 2 else 3").unwrap();
        assert_eq!(
            file.expressions,
            vec![Expression::if_else(num(1.0), num(2.0), num(3.0))]
        );
    }

    #[test]
    fn errors_inside_calls_are_not_swallowed() {
        assert_eq!(
            parse_str("f(1 +)"),
            Err(ParserError::UnexpectedToken(Some(Token::Symbol(
                Symbol::CloseParen
            ))))
        );
    }

    #[test]
    fn missing_delimiter_after_definition() {
        assert_eq!(
            parse_str("def f(x) x"),
            Err(ParserError::UnexpectedToken(None))
        );
    }

    #[test]
    fn top_level_delimiters_are_optional() {
        let file = parse_str("1; 2\n3;").unwrap();
        assert_eq!(file.expressions, vec![num(1.0), num(2.0), num(3.0)]);
    }

    #[test]
    fn lexer_errors_propagate() {
        assert_eq!(
            parse_str("1 + ?"),
            Err(ParserError::Lex(LexError::InvalidCharacter('?')))
        );
    }

    #[test]
    fn newline_tokens_are_skipped() {
        let tokens = vec![
            Token::Symbol(Symbol::NewLine),
            Token::Ident("a".to_string()),
            Token::Symbol(Symbol::NewLine),
            Token::Operator(Operator::Plus),
            Token::Symbol(Symbol::NewLine),
            Token::Number(1.0),
        ];
        let parser = Parser::new(tokens.into_iter().map(Ok)).unwrap();
        let file = parser.parse_file().unwrap();
        assert_eq!(
            file.expressions,
            vec![Expression::binary(Operator::Plus, var("a"), num(1.0))]
        );
    }

    #[test]
    fn unexpected_end_is_described() {
        let err = parse_str("(1").unwrap_err();
        assert_eq!(err.to_string(), "unexpected end of input");
    }
}
