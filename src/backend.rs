//! The operations the code generator needs from an IR emitter.
//!
//! The single value domain is a `double`. Comparison results are booleans that
//! have to be cast back with [`Backend::cast_to_scalar`] before they can be used
//! as values again.

/// The C variadic printer the driver calls once per top-level value.
pub const PRINTER_NAME: &str = "printf";

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Floating point comparison predicates.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Predicate {
    /// Unordered or equal.
    Equal,
    /// Ordered and not equal.
    NotEqual,
}

impl ArithmeticOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            ArithmeticOp::Add => lhs + rhs,
            ArithmeticOp::Sub => lhs - rhs,
            ArithmeticOp::Mul => lhs * rhs,
            ArithmeticOp::Div => lhs / rhs,
            // same truncated remainder as `frem`
            ArithmeticOp::Rem => lhs % rhs,
        }
    }
}

impl Predicate {
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        let unordered = lhs.is_nan() || rhs.is_nan();
        match self {
            Predicate::Equal => unordered || lhs == rhs,
            Predicate::NotEqual => !unordered && lhs != rhs,
        }
    }
}

pub trait Backend {
    type Function: Copy;
    type Block: Copy;
    type Value: Copy;

    /// Declares `name` as `double name(double, ...)` with `arity` parameters.
    /// An existing function of that name is returned unchanged instead.
    fn declare_function(&mut self, name: &str, arity: usize) -> Self::Function;

    /// Declares the variadic `printf` primitive, or returns the existing one.
    fn declare_printer(&mut self) -> Self::Function;

    /// Declares `void name()` or returns the existing function.
    fn declare_driver(&mut self, name: &str) -> Self::Function;

    fn lookup_function(&self, name: &str) -> Option<Self::Function>;

    /// Number of fixed parameters.
    fn arity(&self, function: Self::Function) -> usize;

    fn has_body(&self, function: Self::Function) -> bool;

    fn param(&self, function: Self::Function, index: usize) -> Option<Self::Value>;

    fn append_block(&mut self, function: Self::Function, label: &str) -> Self::Block;

    fn position_at(&mut self, block: Self::Block);

    /// The block new instructions are appended to.
    fn current_block(&self) -> Option<Self::Block>;

    /// The function owning the current block.
    fn current_function(&self) -> Option<Self::Function>;

    fn constant_scalar(&mut self, value: f64) -> Self::Value;

    /// A private, NUL-terminated global string, as a pointer to its first byte.
    fn constant_string(&mut self, text: &str, name: &str) -> Option<Self::Value>;

    fn arithmetic(
        &mut self,
        op: ArithmeticOp,
        lhs: Self::Value,
        rhs: Self::Value,
    ) -> Option<Self::Value>;

    fn compare(
        &mut self,
        predicate: Predicate,
        lhs: Self::Value,
        rhs: Self::Value,
    ) -> Option<Self::Value>;

    fn cast_to_scalar(&mut self, value: Self::Value) -> Option<Self::Value>;

    /// Emits a call. Calls to void functions produce no value.
    fn call(&mut self, function: Self::Function, args: &[Self::Value]) -> Option<Self::Value>;

    fn branch_conditional(
        &mut self,
        condition: Self::Value,
        then_block: Self::Block,
        else_block: Self::Block,
    ) -> Option<()>;

    fn branch_unconditional(&mut self, target: Self::Block) -> Option<()>;

    fn merge_values(&mut self, incoming: &[(Self::Value, Self::Block)]) -> Option<Self::Value>;

    fn return_value(&mut self, value: Option<Self::Value>) -> Option<()>;

    fn verify_function(&self, function: Self::Function) -> bool;

    /// Removes a function whose emission failed.
    fn delete_function(&mut self, function: Self::Function);

    fn dump_module_text(&self) -> String;
}
