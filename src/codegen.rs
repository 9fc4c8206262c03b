use std::collections::HashMap;

use crate::ast::{Expression, File, Function, Prototype};
use crate::backend::{ArithmeticOp, Backend, Predicate, PRINTER_NAME};
use crate::token::Operator;

/// Name of the synthesized function that prints every top-level expression.
pub const DRIVER_NAME: &str = "main";
pub const PRINT_FORMAT: &str = "%f\n";

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable referenced {0}")]
    UnknownVariable(String),
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("invalid number of args in call: found {found}, expected {expected}")]
    InvalidArgumentCount { found: usize, expected: usize },
    #[error("failed to verify function {0}")]
    VerificationFailure(String),
    #[error("the builder failed to emit an instruction")]
    BuilderFailure,
    #[error("function {0} is already defined")]
    Redefinition(String),
    #[error("function {name} was declared with {expected} parameters, found {found}")]
    ConflictingArity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("parameter {name} appears twice in {function}")]
    DuplicateParameter { function: String, name: String },
}

type CodegenResult<T> = Result<T, CodegenError>;

/// Lowers a parsed [`File`] through a [`Backend`], one function at a time.
pub struct Codegen<B: Backend> {
    backend: B,
    named_values: HashMap<String, B::Value>,
}

impl<B: Backend> Codegen<B> {
    pub fn new(backend: B) -> Codegen<B> {
        Codegen {
            backend,
            named_values: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Externs first, then definitions, then the driver for the top-level expressions.
    pub fn codegen(&mut self, file: &File) -> CodegenResult<()> {
        for proto in &file.externals {
            self.compile_proto(proto)?;
        }
        for function in &file.functions {
            self.compile_fn(function)?;
        }
        self.compile_driver(&file.expressions)
    }

    fn compile_proto(&mut self, proto: &Prototype) -> CodegenResult<B::Function> {
        let function = self.backend.declare_function(&proto.name, proto.args.len());
        let declared = self.backend.arity(function);

        if declared != proto.args.len() {
            return Err(CodegenError::ConflictingArity {
                name: proto.name.clone(),
                expected: declared,
                found: proto.args.len(),
            });
        }

        Ok(function)
    }

    fn compile_fn(&mut self, function: &Function) -> CodegenResult<B::Function> {
        let Function {
            prototype: proto,
            body,
        } = function;
        let func = self.compile_proto(proto)?;

        if self.backend.has_body(func) {
            return Err(CodegenError::Redefinition(proto.name.clone()));
        }

        let entry = self.backend.append_block(func, "entry");
        self.backend.position_at(entry);

        // parameters are the only names in scope, and only for this body
        self.named_values.clear();
        self.named_values.reserve(proto.args.len());

        for (i, name) in proto.args.iter().enumerate() {
            let param = self
                .backend
                .param(func, i)
                .ok_or(CodegenError::BuilderFailure)?;
            if self.named_values.insert(name.clone(), param).is_some() {
                return Err(CodegenError::DuplicateParameter {
                    function: proto.name.clone(),
                    name: name.clone(),
                });
            }
        }

        let body = self.codegen_expr(body)?;
        self.backend
            .return_value(Some(body))
            .ok_or(CodegenError::BuilderFailure)?;

        if self.backend.verify_function(func) {
            Ok(func)
        } else {
            self.backend.delete_function(func);
            Err(CodegenError::VerificationFailure(proto.name.clone()))
        }
    }

    fn compile_driver(&mut self, expressions: &[Expression]) -> CodegenResult<()> {
        // both names belong to the driver, so any earlier declaration has the wrong shape
        if self.backend.lookup_function(DRIVER_NAME).is_some() {
            return Err(CodegenError::Redefinition(DRIVER_NAME.to_string()));
        }
        if !expressions.is_empty() && self.backend.lookup_function(PRINTER_NAME).is_some() {
            return Err(CodegenError::Redefinition(PRINTER_NAME.to_string()));
        }

        let driver = self.backend.declare_driver(DRIVER_NAME);

        let entry = self.backend.append_block(driver, "entry");
        self.backend.position_at(entry);
        self.named_values.clear();

        if !expressions.is_empty() {
            let printf = self.backend.declare_printer();
            let format = self
                .backend
                .constant_string(PRINT_FORMAT, "format")
                .ok_or(CodegenError::BuilderFailure)?;

            for expression in expressions {
                let value = self.codegen_expr(expression)?;
                self.backend
                    .call(printf, &[format, value])
                    .ok_or(CodegenError::BuilderFailure)?;
            }
        }

        self.backend
            .return_value(None)
            .ok_or(CodegenError::BuilderFailure)?;

        if self.backend.verify_function(driver) {
            Ok(())
        } else {
            self.backend.delete_function(driver);
            Err(CodegenError::VerificationFailure(DRIVER_NAME.to_string()))
        }
    }

    fn codegen_expr(&mut self, expr: &Expression) -> CodegenResult<B::Value> {
        match expr {
            Expression::Number(value) => Ok(self.backend.constant_scalar(*value)),
            Expression::Variable(name) => match self.named_values.get(name) {
                Some(var) => Ok(*var),
                None => Err(CodegenError::UnknownVariable(name.clone())),
            },
            Expression::Binary(op, left, right) => {
                let lhs = self.codegen_expr(left)?;
                let rhs = self.codegen_expr(right)?;
                self.codegen_binary(*op, lhs, rhs)
            }
            Expression::Call(callee, args) => {
                let func = self
                    .backend
                    .lookup_function(callee)
                    .ok_or_else(|| CodegenError::UnknownFunction(callee.clone()))?;

                let expected = self.backend.arity(func);
                if expected != args.len() {
                    return Err(CodegenError::InvalidArgumentCount {
                        found: args.len(),
                        expected,
                    });
                }

                let mut argsv = Vec::with_capacity(args.len());
                for arg in args {
                    argsv.push(self.codegen_expr(arg)?);
                }

                self.backend
                    .call(func, &argsv)
                    .ok_or(CodegenError::BuilderFailure)
            }
            Expression::If {
                condition,
                then,
                otherwise,
            } => self.codegen_if(condition, then, otherwise),
        }
    }

    fn codegen_binary(
        &mut self,
        op: Operator,
        lhs: B::Value,
        rhs: B::Value,
    ) -> CodegenResult<B::Value> {
        let arithmetic = match op {
            Operator::Plus => ArithmeticOp::Add,
            Operator::Minus => ArithmeticOp::Sub,
            Operator::Times => ArithmeticOp::Mul,
            Operator::Divide => ArithmeticOp::Div,
            Operator::Modulo => ArithmeticOp::Rem,
            Operator::Equals => {
                let equal = self
                    .backend
                    .compare(Predicate::Equal, lhs, rhs)
                    .ok_or(CodegenError::BuilderFailure)?;
                return self
                    .backend
                    .cast_to_scalar(equal)
                    .ok_or(CodegenError::BuilderFailure);
            }
        };

        self.backend
            .arithmetic(arithmetic, lhs, rhs)
            .ok_or(CodegenError::BuilderFailure)
    }

    fn codegen_if(
        &mut self,
        condition: &Expression,
        then: &Expression,
        otherwise: &Expression,
    ) -> CodegenResult<B::Value> {
        let condition = self.codegen_expr(condition)?;
        let zero = self.backend.constant_scalar(0.0);
        let condition = self
            .backend
            .compare(Predicate::NotEqual, condition, zero)
            .ok_or(CodegenError::BuilderFailure)?;

        let function = self
            .backend
            .current_function()
            .ok_or(CodegenError::BuilderFailure)?;

        let then_block = self.backend.append_block(function, "then");
        let else_block = self.backend.append_block(function, "else");
        let merge_block = self.backend.append_block(function, "merge");

        self.backend
            .branch_conditional(condition, then_block, else_block)
            .ok_or(CodegenError::BuilderFailure)?;

        self.backend.position_at(then_block);
        let then_value = self.codegen_expr(then)?;
        self.backend
            .branch_unconditional(merge_block)
            .ok_or(CodegenError::BuilderFailure)?;
        // lowering may have moved us into a nested merge block
        let then_end = self
            .backend
            .current_block()
            .ok_or(CodegenError::BuilderFailure)?;

        self.backend.position_at(else_block);
        let else_value = self.codegen_expr(otherwise)?;
        self.backend
            .branch_unconditional(merge_block)
            .ok_or(CodegenError::BuilderFailure)?;
        let else_end = self
            .backend
            .current_block()
            .ok_or(CodegenError::BuilderFailure)?;

        self.backend.position_at(merge_block);
        self.backend
            .merge_values(&[(then_value, then_end), (else_value, else_end)])
            .ok_or(CodegenError::BuilderFailure)
    }
}
