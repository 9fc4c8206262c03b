use std::collections::{HashMap, HashSet};

use super::{BlockRef, FuncId, Function, InstKind, Module, Type, Value};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum VerifyError {
    #[error("no such function")]
    UnknownFunction,
    #[error("function has no body")]
    NoBody,
    #[error("block {0} does not end in a terminator")]
    MissingTerminator(String),
    #[error("terminator in the middle of block {0}")]
    EarlyTerminator(String),
    #[error("phi node after other instructions in block {0}")]
    MisplacedPhi(String),
    #[error("phi node in block {0} does not match its predecessors")]
    PhiPredecessors(String),
    #[error("the entry block has predecessors")]
    EntryHasPredecessors,
    #[error("branch to a block outside the function")]
    InvalidBranchTarget,
    #[error("operand is not defined in this function")]
    UndefinedOperand,
    #[error("expected operand of type {expected}, found {found}")]
    TypeMismatch { expected: Type, found: Type },
    #[error("call to {callee} with {found} arguments, expected {expected}")]
    CallArity {
        callee: String,
        expected: usize,
        found: usize,
    },
}

type VerifyResult = Result<(), VerifyError>;

/// Checks the structural and type rules of one defined function.
pub fn verify_function(module: &Module, id: FuncId) -> VerifyResult {
    let function = module.function(id).ok_or(VerifyError::UnknownFunction)?;
    if function.is_declaration() {
        return Err(VerifyError::NoBody);
    }

    let checker = Checker {
        module,
        id,
        function,
        defined: function.instructions().filter_map(|inst| inst.result).collect(),
    };
    checker.check_blocks()?;

    let predecessors = checker.predecessors()?;
    if predecessors.get(&0).map_or(false, |preds| !preds.is_empty()) {
        return Err(VerifyError::EntryHasPredecessors);
    }

    for (index, block) in function.blocks.iter().enumerate() {
        for inst in &block.instructions {
            checker.check_instruction(&inst.kind)?;
            if let InstKind::Phi(incoming) = &inst.kind {
                let expected = predecessors.get(&index).cloned().unwrap_or_default();
                let found: HashSet<usize> = incoming.iter().map(|(_, block)| block.index).collect();
                if found != expected || incoming.len() != expected.len() {
                    return Err(VerifyError::PhiPredecessors(block.label.clone()));
                }
            }
        }
    }

    Ok(())
}

struct Checker<'m> {
    module: &'m Module,
    id: FuncId,
    function: &'m Function,
    defined: HashSet<u32>,
}

impl Checker<'_> {
    fn check_blocks(&self) -> VerifyResult {
        for block in &self.function.blocks {
            let last = block.instructions.len().saturating_sub(1);
            let mut seen_non_phi = false;

            if block.terminator().is_none() {
                return Err(VerifyError::MissingTerminator(block.label.clone()));
            }

            for (i, inst) in block.instructions.iter().enumerate() {
                if inst.kind.is_terminator() && i != last {
                    return Err(VerifyError::EarlyTerminator(block.label.clone()));
                }
                match inst.kind {
                    InstKind::Phi(_) if seen_non_phi => {
                        return Err(VerifyError::MisplacedPhi(block.label.clone()))
                    }
                    InstKind::Phi(_) => {}
                    _ => seen_non_phi = true,
                }
            }
        }
        Ok(())
    }

    fn check_target(&self, target: BlockRef) -> VerifyResult {
        if target.function == self.id && target.index < self.function.blocks.len() {
            Ok(())
        } else {
            Err(VerifyError::InvalidBranchTarget)
        }
    }

    /// Predecessor block indices for every block.
    fn predecessors(&self) -> Result<HashMap<usize, HashSet<usize>>, VerifyError> {
        let mut predecessors: HashMap<usize, HashSet<usize>> = HashMap::new();
        for (index, block) in self.function.blocks.iter().enumerate() {
            if let Some(terminator) = block.terminator() {
                for target in terminator.successors() {
                    self.check_target(target)?;
                    predecessors.entry(target.index).or_default().insert(index);
                }
            }
        }
        Ok(predecessors)
    }

    fn operand_type(&self, value: Value) -> Result<Type, VerifyError> {
        let local = match value {
            Value::Param(function, _) => function == self.id,
            Value::Reg(function, reg) => function == self.id && self.defined.contains(&reg),
            Value::Const(_) | Value::Global(_) => true,
        };
        if !local {
            return Err(VerifyError::UndefinedOperand);
        }
        self.module
            .value_type(value)
            .ok_or(VerifyError::UndefinedOperand)
    }

    fn expect(&self, value: Value, expected: Type) -> VerifyResult {
        let found = self.operand_type(value)?;
        if found == expected {
            Ok(())
        } else {
            Err(VerifyError::TypeMismatch { expected, found })
        }
    }

    fn check_instruction(&self, kind: &InstKind) -> VerifyResult {
        match kind {
            InstKind::Arith(_, lhs, rhs) | InstKind::Compare(_, lhs, rhs) => {
                self.expect(*lhs, Type::Double)?;
                self.expect(*rhs, Type::Double)
            }
            InstKind::Cast(value) => self.expect(*value, Type::Bool),
            InstKind::Call { callee, args } => {
                let callee = self
                    .module
                    .function(*callee)
                    .ok_or(VerifyError::UndefinedOperand)?;
                let arity_ok = if callee.variadic {
                    args.len() >= callee.params.len()
                } else {
                    args.len() == callee.params.len()
                };
                if !arity_ok {
                    return Err(VerifyError::CallArity {
                        callee: callee.name.clone(),
                        expected: callee.params.len(),
                        found: args.len(),
                    });
                }
                for (i, arg) in args.iter().enumerate() {
                    match callee.params.get(i) {
                        Some(expected) => self.expect(*arg, *expected)?,
                        // variadic tail
                        None => {
                            self.operand_type(*arg)?;
                        }
                    }
                }
                Ok(())
            }
            InstKind::Phi(incoming) => {
                for (value, block) in incoming {
                    self.check_target(*block)?;
                    self.expect(*value, Type::Double)?;
                }
                Ok(())
            }
            InstKind::Br(target) => self.check_target(*target),
            InstKind::CondBr(condition, then_block, else_block) => {
                self.expect(*condition, Type::Bool)?;
                self.check_target(*then_block)?;
                self.check_target(*else_block)
            }
            InstKind::Ret(value) => match (value, self.function.return_type) {
                (None, Type::Void) => Ok(()),
                (None, expected) => Err(VerifyError::TypeMismatch {
                    expected,
                    found: Type::Void,
                }),
                (Some(value), expected) => self.expect(*value, expected),
            },
        }
    }
}
