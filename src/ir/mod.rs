//! Built-in SSA backend.
//!
//! Functions hold basic blocks of instructions over `double` values. The module
//! prints as LLVM assembly, can be checked with [`verify_function`] and run with
//! the [`Interpreter`].

mod builder;
mod interp;
mod verify;

pub use builder::IrBuilder;
pub use interp::{ExecError, Interpreter};
pub use verify::{verify_function, VerifyError};

use std::collections::HashMap;
use std::fmt;

use crate::backend::{ArithmeticOp, Predicate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub usize);

/// A block, addressed by its owning function and its position in that function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub function: FuncId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Const(f64),
    Param(FuncId, usize),
    /// Result of an instruction, numbered per function.
    Reg(FuncId, u32),
    /// Pointer to the first byte of a global string.
    Global(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Void,
    Bool,
    I32,
    Double,
    Ptr,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "i1"),
            Type::I32 => write!(f, "i32"),
            Type::Double => write!(f, "double"),
            Type::Ptr => write!(f, "i8*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Arith(ArithmeticOp, Value, Value),
    Compare(Predicate, Value, Value),
    /// `uitofp i1 to double`
    Cast(Value),
    Call { callee: FuncId, args: Vec<Value> },
    Phi(Vec<(Value, BlockRef)>),
    Br(BlockRef),
    CondBr(Value, BlockRef, BlockRef),
    Ret(Option<Value>),
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(self, InstKind::Br(_) | InstKind::CondBr(..) | InstKind::Ret(_))
    }

    /// Blocks control may continue to after this instruction.
    pub fn successors(&self) -> Vec<BlockRef> {
        match self {
            InstKind::Br(target) => vec![*target],
            InstKind::CondBr(_, then_block, else_block) => vec![*then_block, *else_block],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub result: Option<u32>,
    pub kind: InstKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: String,
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn terminator(&self) -> Option<&InstKind> {
        self.instructions
            .last()
            .map(|inst| &inst.kind)
            .filter(|kind| kind.is_terminator())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Type>,
    pub return_type: Type,
    pub variadic: bool,
    pub blocks: Vec<Block>,
    next_reg: u32,
}

impl Function {
    fn new(name: &str, params: Vec<Type>, return_type: Type, variadic: bool) -> Function {
        Function {
            name: name.to_string(),
            params,
            return_type,
            variadic,
            blocks: Vec::new(),
            next_reg: 0,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Every instruction in the function, in block order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|block| block.instructions.iter())
    }

    fn fresh_reg(&mut self) -> u32 {
        let reg = self.next_reg;
        self.next_reg += 1;
        reg
    }

    /// A label not yet used by any block of this function.
    fn unique_label(&self, label: &str) -> String {
        let taken = |candidate: &str| self.blocks.iter().any(|block| block.label == candidate);
        if !taken(label) {
            return label.to_string();
        }
        (1..)
            .map(|n| format!("{}{}", label, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| label.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalString {
    pub name: String,
    pub text: String,
}

impl GlobalString {
    /// Length including the terminating NUL.
    pub fn byte_len(&self) -> usize {
        self.text.len() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub name: String,
    functions: Vec<Option<Function>>,
    names: HashMap<String, FuncId>,
    globals: Vec<GlobalString>,
}

impl Module {
    pub fn new(name: &str) -> Module {
        Module {
            name: name.to_string(),
            ..Module::default()
        }
    }

    pub fn get_function(&self, name: &str) -> Option<FuncId> {
        self.names.get(name).copied()
    }

    pub fn function(&self, id: FuncId) -> Option<&Function> {
        self.functions.get(id.0).and_then(Option::as_ref)
    }

    fn function_mut(&mut self, id: FuncId) -> Option<&mut Function> {
        self.functions.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Live functions in declaration order.
    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .filter_map(|(i, function)| function.as_ref().map(|function| (FuncId(i), function)))
    }

    pub fn global(&self, index: usize) -> Option<&GlobalString> {
        self.globals.get(index)
    }

    /// Returns the function named `name`, adding it if there is none.
    fn get_or_add_function(
        &mut self,
        name: &str,
        params: Vec<Type>,
        return_type: Type,
        variadic: bool,
    ) -> FuncId {
        if let Some(id) = self.get_function(name) {
            return id;
        }
        let id = FuncId(self.functions.len());
        self.functions
            .push(Some(Function::new(name, params, return_type, variadic)));
        self.names.insert(name.to_string(), id);
        id
    }

    fn add_global_string(&mut self, text: &str, name: &str) -> usize {
        let mut unique = name.to_string();
        let mut n = 1;
        while self.globals.iter().any(|global| global.name == unique) {
            unique = format!("{}.{}", name, n);
            n += 1;
        }
        self.globals.push(GlobalString {
            name: unique,
            text: text.to_string(),
        });
        self.globals.len() - 1
    }

    fn delete_function(&mut self, id: FuncId) {
        if let Some(slot) = self.functions.get_mut(id.0) {
            if let Some(function) = slot.take() {
                self.names.remove(&function.name);
            }
        }
    }

    /// Type of `value`, `None` if it refers to something that does not exist.
    pub fn value_type(&self, value: Value) -> Option<Type> {
        match value {
            Value::Const(_) => Some(Type::Double),
            Value::Global(index) => self.global(index).map(|_| Type::Ptr),
            Value::Param(function, index) => self.function(function)?.params.get(index).copied(),
            Value::Reg(function, reg) => {
                let function = self.function(function)?;
                let inst = function
                    .instructions()
                    .find(|inst| inst.result == Some(reg))?;
                self.result_type(&inst.kind)
            }
        }
    }

    fn result_type(&self, kind: &InstKind) -> Option<Type> {
        match kind {
            InstKind::Arith(..) | InstKind::Cast(_) | InstKind::Phi(_) => Some(Type::Double),
            InstKind::Compare(..) => Some(Type::Bool),
            InstKind::Call { callee, .. } => self.function(*callee).map(|f| f.return_type),
            InstKind::Br(_) | InstKind::CondBr(..) | InstKind::Ret(_) => None,
        }
    }
}

/// Formats a double the way LLVM accepts it: decimal when that is exact, raw bits otherwise.
fn format_double(value: f64) -> String {
    let scientific = format!("{:.6e}", value);
    if scientific.parse::<f64>().ok() == Some(value) {
        if let Some(split) = scientific.find('e') {
            let (mantissa, exponent) = scientific.split_at(split);
            let exponent: i32 = exponent[1..].parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
        }
    }
    format!("0x{:016X}", value.to_bits())
}

fn escape_bytes(text: &str) -> String {
    let mut escaped = String::new();
    for byte in text.bytes().chain(std::iter::once(0)) {
        if (byte.is_ascii_graphic() && byte != b'"' && byte != b'\\') || byte == b' ' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("\\{:02X}", byte));
        }
    }
    escaped
}

struct Shown<'m, T> {
    module: &'m Module,
    item: T,
}

impl fmt::Display for Shown<'_, Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item {
            Value::Const(value) => write!(f, "{}", format_double(value)),
            Value::Param(_, index) => write!(f, "%arg{}", index),
            Value::Reg(_, reg) => write!(f, "%t{}", reg),
            Value::Global(index) => match self.module.global(index) {
                Some(global) => write!(
                    f,
                    "getelementptr inbounds ([{len} x i8], [{len} x i8]* @{name}, i32 0, i32 0)",
                    len = global.byte_len(),
                    name = global.name
                ),
                None => write!(f, "undef"),
            },
        }
    }
}

impl Module {
    fn show<T>(&self, item: T) -> Shown<'_, T> {
        Shown { module: self, item }
    }

    fn typed(&self, value: Value) -> String {
        let ty = self.value_type(value).unwrap_or(Type::Void);
        format!("{} {}", ty, self.show(value))
    }

    fn label(&self, block: BlockRef) -> String {
        self.function(block.function)
            .and_then(|function| function.blocks.get(block.index))
            .map_or_else(|| "<invalid>".to_string(), |block| block.label.clone())
    }

    fn signature(&self, function: &Function) -> String {
        let mut params: Vec<String> = function.params.iter().map(Type::to_string).collect();
        if function.variadic {
            params.push("...".to_string());
        }
        params.join(", ")
    }

    fn write_instruction(
        &self,
        f: &mut fmt::Formatter<'_>,
        owner: FuncId,
        inst: &Instruction,
    ) -> fmt::Result {
        write!(f, "  ")?;
        if let Some(reg) = inst.result {
            write!(f, "{} = ", self.show(Value::Reg(owner, reg)))?;
        }

        match &inst.kind {
            InstKind::Arith(op, lhs, rhs) => {
                let opcode = match op {
                    ArithmeticOp::Add => "fadd",
                    ArithmeticOp::Sub => "fsub",
                    ArithmeticOp::Mul => "fmul",
                    ArithmeticOp::Div => "fdiv",
                    ArithmeticOp::Rem => "frem",
                };
                write!(f, "{} double {}, {}", opcode, self.show(*lhs), self.show(*rhs))
            }
            InstKind::Compare(predicate, lhs, rhs) => {
                let predicate = match predicate {
                    Predicate::Equal => "ueq",
                    Predicate::NotEqual => "one",
                };
                write!(
                    f,
                    "fcmp {} double {}, {}",
                    predicate,
                    self.show(*lhs),
                    self.show(*rhs)
                )
            }
            InstKind::Cast(value) => write!(f, "uitofp {} to double", self.typed(*value)),
            InstKind::Call { callee, args } => {
                let args: Vec<String> = args.iter().map(|arg| self.typed(*arg)).collect();
                match self.function(*callee) {
                    Some(function) if function.variadic => write!(
                        f,
                        "call {} ({}) @{}({})",
                        function.return_type,
                        self.signature(function),
                        function.name,
                        args.join(", ")
                    ),
                    Some(function) => write!(
                        f,
                        "call {} @{}({})",
                        function.return_type,
                        function.name,
                        args.join(", ")
                    ),
                    None => write!(f, "call void undef({})", args.join(", ")),
                }
            }
            InstKind::Phi(incoming) => {
                let incoming: Vec<String> = incoming
                    .iter()
                    .map(|(value, block)| {
                        format!("[ {}, %{} ]", self.show(*value), self.label(*block))
                    })
                    .collect();
                write!(f, "phi double {}", incoming.join(", "))
            }
            InstKind::Br(target) => write!(f, "br label %{}", self.label(*target)),
            InstKind::CondBr(condition, then_block, else_block) => write!(
                f,
                "br {}, label %{}, label %{}",
                self.typed(*condition),
                self.label(*then_block),
                self.label(*else_block)
            ),
            InstKind::Ret(Some(value)) => write!(f, "ret {}", self.typed(*value)),
            InstKind::Ret(None) => write!(f, "ret void"),
        }
    }

    fn write_function(
        &self,
        f: &mut fmt::Formatter<'_>,
        id: FuncId,
        function: &Function,
    ) -> fmt::Result {
        if function.is_declaration() {
            return writeln!(
                f,
                "declare {} @{}({})",
                function.return_type,
                function.name,
                self.signature(function)
            );
        }

        let params: Vec<String> = function
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{} {}", ty, self.show(Value::Param(id, i))))
            .collect();
        writeln!(
            f,
            "define {} @{}({}) {{",
            function.return_type,
            function.name,
            params.join(", ")
        )?;

        for (i, block) in function.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", block.label)?;
            for inst in &block.instructions {
                self.write_instruction(f, id, inst)?;
                writeln!(f)?;
            }
        }

        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "source_filename = \"{}\"", self.name)?;

        if !self.globals.is_empty() {
            writeln!(f)?;
        }
        for global in &self.globals {
            writeln!(
                f,
                "@{} = private unnamed_addr constant [{} x i8] c\"{}\", align 1",
                global.name,
                global.byte_len(),
                escape_bytes(&global.text)
            )?;
        }

        for (id, function) in self.functions() {
            writeln!(f)?;
            self.write_function(f, id, function)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_print_exactly() {
        assert_eq!(format_double(42.0), "4.200000e+01");
        assert_eq!(format_double(0.0), "0.000000e+00");
        assert_eq!(format_double(-0.5), "-5.000000e-01");
        assert_eq!(format_double(0.1), "1.000000e-01");
        assert_eq!(format_double(1.0 / 3.0), "0x3FD5555555555555");
    }

    #[test]
    fn strings_escape_control_bytes() {
        assert_eq!(escape_bytes("%f\n"), "%f\\0A\\00");
        assert_eq!(escape_bytes("a \"b\""), "a \\22b\\22\\00");
    }
}
