//! Compiler for the Kaleidoscope expression language.
//!
//! Source text flows through three stages, each pulling from the previous one:
//! - `lexer` turns characters into [`token::Token`]s,
//! - `parser` builds an [`ast::File`] by recursive descent,
//! - `codegen` lowers the file through a [`backend::Backend`].
//!
//! The built-in [`ir`] backend is always available. With the `llvm` feature the
//! same code generator can drive LLVM through `inkwell`.

pub mod ast;
pub mod backend;
pub mod codegen;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod token;

#[cfg(feature = "llvm")]
pub mod llvm;

use backend::Backend;
use codegen::{Codegen, CodegenError};
use lexer::LexError;
use parser::{ParserError, Precedence};

pub const MODULE_NAME: &str = "kaleidoscope";

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum CompileError {
    #[error("lex error: {0}")]
    Lex(LexError),
    #[error("parse error: {0}")]
    Parse(ParserError),
    #[error("codegen error: {0}")]
    Codegen(#[from] CodegenError),
}

impl From<ParserError> for CompileError {
    fn from(err: ParserError) -> Self {
        match err {
            ParserError::Lex(err) => CompileError::Lex(err),
            err => CompileError::Parse(err),
        }
    }
}

impl From<LexError> for CompileError {
    fn from(err: LexError) -> Self {
        CompileError::Lex(err)
    }
}

/// Parses `source` and lowers it through `backend`.
pub fn compile_with<B: Backend>(
    source: &str,
    precedence: Precedence,
    backend: B,
) -> Result<B, CompileError> {
    let file = parser::parse_str_with(source, precedence)?;
    let mut codegen = Codegen::new(backend);
    codegen.codegen(&file)?;
    Ok(codegen.into_backend())
}

/// Compiles `source` into the built-in IR with the default operator rules.
pub fn compile(source: &str) -> Result<ir::Module, CompileError> {
    let builder = compile_with(source, Precedence::default(), ir::IrBuilder::new(MODULE_NAME))?;
    Ok(builder.finish())
}
