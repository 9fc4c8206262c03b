use std::fmt;

use crate::token::Operator;

#[derive(Debug, PartialEq, Clone)]
pub struct Prototype {
    pub name: String,
    pub args: Vec<String>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Number(f64),
    Variable(String),
    Binary(Operator, Box<Expression>, Box<Expression>),
    Call(String, Vec<Expression>),
    If {
        condition: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
}

impl Expression {
    pub fn binary(op: Operator, lhs: Expression, rhs: Expression) -> Expression {
        Expression::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn if_else(condition: Expression, then: Expression, otherwise: Expression) -> Expression {
        Expression::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub prototype: Prototype,
    pub body: Expression,
}

/// The root of a parsed source text. Each list keeps source order.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct File {
    pub functions: Vec<Function>,
    pub externals: Vec<Prototype>,
    pub expressions: Vec<Expression>,
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.args.join(", "))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Number(value) => write!(f, "{}", value),
            Expression::Variable(name) => write!(f, "${}", name),
            Expression::Binary(op, lhs, rhs) => write!(f, "({} {} {})", lhs, op, rhs),
            Expression::Call(callee, args) => {
                write!(f, "{}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::If {
                condition,
                then,
                otherwise,
            } => write!(f, "(if {} then {} else {})", condition, then, otherwise),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.prototype, self.body)
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "functions:")?;
        for function in &self.functions {
            writeln!(f, "  {}", function)?;
        }
        writeln!(f, "externals:")?;
        for external in &self.externals {
            writeln!(f, "  {}", external)?;
        }
        writeln!(f, "expressions:")?;
        for expression in &self.expressions {
            writeln!(f, "  {}", expression)?;
        }
        Ok(())
    }
}
