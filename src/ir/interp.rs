use std::collections::HashMap;
use std::fmt::Write;

use super::{FuncId, Function, InstKind, Module, Value};
use crate::backend::PRINTER_NAME;

pub const DEFAULT_STEP_LIMIT: usize = 10_000_000;
pub const DEFAULT_CALL_DEPTH: usize = 512;

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("function {0} has no body and no host implementation")]
    UnresolvedExternal(String),
    #[error("function {name} expects {expected} arguments, found {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("function {0} does not return a number")]
    NotScalar(String),
    #[error("execution exceeded {0} steps")]
    StepLimit(usize),
    #[error("call depth exceeded {0}")]
    CallDepth(usize),
    #[error("malformed code in function {0}")]
    Malformed(String),
}

type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Number(f64),
    Flag(bool),
    Pointer(usize),
    Nothing,
}

/// Runs functions of a [`Module`] directly, without native code generation.
///
/// Declarations resolve to a fixed set of host math functions and `printf`,
/// whose output is collected rather than written to stdout.
pub struct Interpreter<'m> {
    module: &'m Module,
    printed: Vec<f64>,
    stdout: String,
    steps: usize,
    step_limit: usize,
    depth: usize,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Interpreter<'m> {
        Interpreter {
            module,
            printed: Vec::new(),
            stdout: String::new(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            depth: 0,
        }
    }

    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Every number passed to `printf` so far, in order.
    pub fn printed(&self) -> &[f64] {
        &self.printed
    }

    /// Formatted `printf` output so far.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    fn lookup(&self, name: &str) -> ExecResult<FuncId> {
        self.module
            .get_function(name)
            .ok_or_else(|| ExecError::UnknownFunction(name.to_string()))
    }

    /// Calls a `double`-returning function.
    pub fn call(&mut self, name: &str, args: &[f64]) -> ExecResult<f64> {
        let id = self.lookup(name)?;
        let args = args.iter().map(|arg| Slot::Number(*arg)).collect();
        match self.invoke(id, args)? {
            Slot::Number(value) => Ok(value),
            _ => Err(ExecError::NotScalar(name.to_string())),
        }
    }

    /// Runs the driver and returns the numbers it printed.
    pub fn run_driver(&mut self, name: &str) -> ExecResult<Vec<f64>> {
        let id = self.lookup(name)?;
        let before = self.printed.len();
        self.invoke(id, Vec::new())?;
        Ok(self.printed[before..].to_vec())
    }

    fn function(&self, id: FuncId) -> ExecResult<&'m Function> {
        self.module
            .function(id)
            .ok_or_else(|| ExecError::Malformed(format!("#{}", id.0)))
    }

    fn invoke(&mut self, id: FuncId, args: Vec<Slot>) -> ExecResult<Slot> {
        let function = self.function(id)?;

        if !function.variadic && args.len() != function.params.len() {
            return Err(ExecError::ArgumentCount {
                name: function.name.clone(),
                expected: function.params.len(),
                found: args.len(),
            });
        }

        if function.is_declaration() {
            return self.call_host(function, &args);
        }

        if self.depth >= DEFAULT_CALL_DEPTH {
            return Err(ExecError::CallDepth(DEFAULT_CALL_DEPTH));
        }
        self.depth += 1;
        let result = self.execute(id, function, &args);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, id: FuncId, function: &'m Function, args: &[Slot]) -> ExecResult<Slot> {
        let malformed = || ExecError::Malformed(function.name.clone());
        let mut registers: HashMap<u32, Slot> = HashMap::new();
        let mut previous: Option<usize> = None;
        let mut current = 0;

        'blocks: loop {
            let block = function.blocks.get(current).ok_or_else(malformed)?;

            for inst in &block.instructions {
                self.steps += 1;
                if self.steps > self.step_limit {
                    return Err(ExecError::StepLimit(self.step_limit));
                }

                let read = |value: Value| -> ExecResult<Slot> {
                    match value {
                        Value::Const(number) => Ok(Slot::Number(number)),
                        Value::Global(index) => Ok(Slot::Pointer(index)),
                        Value::Param(owner, index) if owner == id => {
                            args.get(index).copied().ok_or_else(malformed)
                        }
                        Value::Reg(owner, reg) if owner == id => {
                            registers.get(&reg).copied().ok_or_else(malformed)
                        }
                        _ => Err(malformed()),
                    }
                };
                let number = |value: Value| -> ExecResult<f64> {
                    match read(value)? {
                        Slot::Number(number) => Ok(number),
                        _ => Err(malformed()),
                    }
                };

                let slot = match &inst.kind {
                    InstKind::Arith(op, lhs, rhs) => {
                        Slot::Number(op.apply(number(*lhs)?, number(*rhs)?))
                    }
                    InstKind::Compare(predicate, lhs, rhs) => {
                        Slot::Flag(predicate.holds(number(*lhs)?, number(*rhs)?))
                    }
                    InstKind::Cast(value) => match read(*value)? {
                        Slot::Flag(flag) => Slot::Number(if flag { 1.0 } else { 0.0 }),
                        _ => return Err(malformed()),
                    },
                    InstKind::Phi(incoming) => {
                        let from = previous.ok_or_else(malformed)?;
                        let (value, _) = incoming
                            .iter()
                            .find(|(_, block)| block.index == from)
                            .ok_or_else(malformed)?;
                        read(*value)?
                    }
                    InstKind::Call {
                        callee,
                        args: call_args,
                    } => {
                        let call_args = call_args
                            .iter()
                            .map(|arg| read(*arg))
                            .collect::<ExecResult<Vec<_>>>()?;
                        self.invoke(*callee, call_args)?
                    }
                    InstKind::Br(target) => {
                        previous = Some(current);
                        current = target.index;
                        continue 'blocks;
                    }
                    InstKind::CondBr(condition, then_block, else_block) => {
                        let flag = match read(*condition)? {
                            Slot::Flag(flag) => flag,
                            _ => return Err(malformed()),
                        };
                        previous = Some(current);
                        current = if flag { then_block.index } else { else_block.index };
                        continue 'blocks;
                    }
                    InstKind::Ret(Some(value)) => return read(*value),
                    InstKind::Ret(None) => return Ok(Slot::Nothing),
                };

                if let Some(reg) = inst.result {
                    registers.insert(reg, slot);
                }
            }

            return Err(malformed());
        }
    }

    fn call_host(&mut self, function: &Function, args: &[Slot]) -> ExecResult<Slot> {
        if function.name == PRINTER_NAME {
            return self.printf(args);
        }

        let numbers = args
            .iter()
            .map(|arg| match arg {
                Slot::Number(number) => Some(*number),
                _ => None,
            })
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| ExecError::Malformed(function.name.clone()))?;

        host_function(&function.name, &numbers)
            .map(Slot::Number)
            .ok_or_else(|| ExecError::UnresolvedExternal(function.name.clone()))
    }

    /// Supports the `%f` and `%%` conversions, which is all the driver emits.
    fn printf(&mut self, args: &[Slot]) -> ExecResult<Slot> {
        let malformed = || ExecError::Malformed(PRINTER_NAME.to_string());
        let format = match args.first() {
            Some(Slot::Pointer(index)) => self.module.global(*index).ok_or_else(malformed)?,
            _ => return Err(malformed()),
        };

        let mut rest = args[1..].iter();
        let mut chars = format.text.chars();
        let start = self.stdout.len();

        while let Some(ch) = chars.next() {
            if ch != '%' {
                self.stdout.push(ch);
                continue;
            }
            match chars.next() {
                Some('%') => self.stdout.push('%'),
                Some('f') => match rest.next() {
                    Some(Slot::Number(number)) => {
                        self.printed.push(*number);
                        write!(self.stdout, "{:.6}", number).map_err(|_| malformed())?;
                    }
                    _ => return Err(malformed()),
                },
                _ => return Err(malformed()),
            }
        }

        Ok(Slot::Number((self.stdout.len() - start) as f64))
    }
}

fn host_function(name: &str, args: &[f64]) -> Option<f64> {
    let value = match (name, args) {
        ("sin", [x]) => x.sin(),
        ("cos", [x]) => x.cos(),
        ("tan", [x]) => x.tan(),
        ("sqrt", [x]) => x.sqrt(),
        ("exp", [x]) => x.exp(),
        ("log", [x]) => x.ln(),
        ("fabs", [x]) => x.abs(),
        ("floor", [x]) => x.floor(),
        ("ceil", [x]) => x.ceil(),
        ("pow", [x, y]) => x.powf(*y),
        ("fmod", [x, y]) => x % y,
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ArithmeticOp, Backend};
    use crate::ir::IrBuilder;

    fn square_module() -> Module {
        let mut builder = IrBuilder::new("test");
        let function = builder.declare_function("square", 1);
        let entry = builder.append_block(function, "entry");
        builder.position_at(entry);
        let x = builder.param(function, 0).unwrap();
        let product = builder.arithmetic(ArithmeticOp::Mul, x, x).unwrap();
        builder.return_value(Some(product)).unwrap();
        builder.finish()
    }

    #[test]
    fn calls_defined_functions() {
        let module = square_module();
        let mut interpreter = Interpreter::new(&module);
        assert_eq!(interpreter.call("square", &[3.0]), Ok(9.0));
    }

    #[test]
    fn argument_count_is_checked() {
        let module = square_module();
        let mut interpreter = Interpreter::new(&module);
        assert_eq!(
            interpreter.call("square", &[]),
            Err(ExecError::ArgumentCount {
                name: "square".to_string(),
                expected: 1,
                found: 0
            })
        );
    }

    #[test]
    fn host_functions_resolve_declarations() {
        let mut builder = IrBuilder::new("test");
        builder.declare_function("sqrt", 1);
        builder.declare_function("mystery", 1);
        let module = builder.finish();
        let mut interpreter = Interpreter::new(&module);
        assert_eq!(interpreter.call("sqrt", &[16.0]), Ok(4.0));
        assert_eq!(
            interpreter.call("mystery", &[1.0]),
            Err(ExecError::UnresolvedExternal("mystery".to_string()))
        );
    }

    #[test]
    fn printf_formats_like_c() {
        let mut builder = IrBuilder::new("test");
        let printf = builder.declare_printer();
        let driver = builder.declare_driver("main");
        let entry = builder.append_block(driver, "entry");
        builder.position_at(entry);
        let format = builder.constant_string("%f%%\n", "format").unwrap();
        let value = builder.constant_scalar(2.5);
        builder.call(printf, &[format, value]).unwrap();
        builder.return_value(None).unwrap();
        let module = builder.finish();

        let mut interpreter = Interpreter::new(&module);
        assert_eq!(interpreter.run_driver("main"), Ok(vec![2.5]));
        assert_eq!(interpreter.stdout(), "2.500000%\n");
    }
}
