use super::{verify_function, Block, BlockRef, FuncId, InstKind, Instruction, Module, Type, Value};
use crate::backend::{ArithmeticOp, Backend, Predicate, PRINTER_NAME};

/// Emits into a [`Module`] at a movable insertion point.
pub struct IrBuilder {
    module: Module,
    position: Option<BlockRef>,
}

impl IrBuilder {
    pub fn new(module_name: &str) -> IrBuilder {
        IrBuilder {
            module: Module::new(module_name),
            position: None,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn finish(self) -> Module {
        self.module
    }

    /// Appends an instruction at the insertion point, numbering its result if it has one.
    fn push(&mut self, kind: InstKind, has_result: bool) -> Option<Option<Value>> {
        let position = self.position?;
        let function = self.module.function_mut(position.function)?;
        let result = if has_result {
            Some(function.fresh_reg())
        } else {
            None
        };
        function
            .blocks
            .get_mut(position.index)?
            .instructions
            .push(Instruction { result, kind });
        Some(result.map(|reg| Value::Reg(position.function, reg)))
    }

    fn push_value(&mut self, kind: InstKind) -> Option<Value> {
        self.push(kind, true).flatten()
    }

    fn push_terminator(&mut self, kind: InstKind) -> Option<()> {
        self.push(kind, false).map(|_| ())
    }
}

impl Backend for IrBuilder {
    type Function = FuncId;
    type Block = BlockRef;
    type Value = Value;

    fn declare_function(&mut self, name: &str, arity: usize) -> FuncId {
        self.module
            .get_or_add_function(name, vec![Type::Double; arity], Type::Double, false)
    }

    fn declare_printer(&mut self) -> FuncId {
        self.module
            .get_or_add_function(PRINTER_NAME, vec![Type::Ptr], Type::I32, true)
    }

    fn declare_driver(&mut self, name: &str) -> FuncId {
        self.module
            .get_or_add_function(name, Vec::new(), Type::Void, false)
    }

    fn lookup_function(&self, name: &str) -> Option<FuncId> {
        self.module.get_function(name)
    }

    fn arity(&self, function: FuncId) -> usize {
        self.module
            .function(function)
            .map_or(0, |function| function.params.len())
    }

    fn has_body(&self, function: FuncId) -> bool {
        self.module
            .function(function)
            .map_or(false, |function| !function.is_declaration())
    }

    fn param(&self, function: FuncId, index: usize) -> Option<Value> {
        let declared = self.module.function(function)?;
        if index < declared.params.len() {
            Some(Value::Param(function, index))
        } else {
            None
        }
    }

    fn append_block(&mut self, function: FuncId, label: &str) -> BlockRef {
        match self.module.function_mut(function) {
            Some(func) => {
                let label = func.unique_label(label);
                func.blocks.push(Block {
                    label,
                    instructions: Vec::new(),
                });
                BlockRef {
                    function,
                    index: func.blocks.len() - 1,
                }
            }
            // a deleted function: positioning here makes every later emission fail
            None => BlockRef {
                function,
                index: usize::MAX,
            },
        }
    }

    fn position_at(&mut self, block: BlockRef) {
        self.position = Some(block);
    }

    fn current_block(&self) -> Option<BlockRef> {
        self.position
    }

    fn current_function(&self) -> Option<FuncId> {
        self.position.map(|block| block.function)
    }

    fn constant_scalar(&mut self, value: f64) -> Value {
        Value::Const(value)
    }

    fn constant_string(&mut self, text: &str, name: &str) -> Option<Value> {
        Some(Value::Global(self.module.add_global_string(text, name)))
    }

    fn arithmetic(&mut self, op: ArithmeticOp, lhs: Value, rhs: Value) -> Option<Value> {
        self.push_value(InstKind::Arith(op, lhs, rhs))
    }

    fn compare(&mut self, predicate: Predicate, lhs: Value, rhs: Value) -> Option<Value> {
        self.push_value(InstKind::Compare(predicate, lhs, rhs))
    }

    fn cast_to_scalar(&mut self, value: Value) -> Option<Value> {
        self.push_value(InstKind::Cast(value))
    }

    fn call(&mut self, function: FuncId, args: &[Value]) -> Option<Value> {
        let returns_value = self.module.function(function)?.return_type != Type::Void;
        let kind = InstKind::Call {
            callee: function,
            args: args.to_vec(),
        };
        self.push(kind, returns_value).flatten()
    }

    fn branch_conditional(
        &mut self,
        condition: Value,
        then_block: BlockRef,
        else_block: BlockRef,
    ) -> Option<()> {
        self.push_terminator(InstKind::CondBr(condition, then_block, else_block))
    }

    fn branch_unconditional(&mut self, target: BlockRef) -> Option<()> {
        self.push_terminator(InstKind::Br(target))
    }

    fn merge_values(&mut self, incoming: &[(Value, BlockRef)]) -> Option<Value> {
        self.push_value(InstKind::Phi(incoming.to_vec()))
    }

    fn return_value(&mut self, value: Option<Value>) -> Option<()> {
        self.push_terminator(InstKind::Ret(value))
    }

    fn verify_function(&self, function: FuncId) -> bool {
        verify_function(&self.module, function).is_ok()
    }

    fn delete_function(&mut self, function: FuncId) {
        if self.current_function() == Some(function) {
            self.position = None;
        }
        self.module.delete_function(function);
    }

    fn dump_module_text(&self) -> String {
        self.module.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_are_reused() {
        let mut builder = IrBuilder::new("test");
        let first = builder.declare_function("foo", 2);
        let second = builder.declare_function("foo", 2);
        assert_eq!(first, second);
        assert_eq!(builder.declare_printer(), builder.declare_printer());
        assert_eq!(builder.module().functions().count(), 2);
    }

    #[test]
    fn emission_needs_a_position() {
        let mut builder = IrBuilder::new("test");
        let one = builder.constant_scalar(1.0);
        assert_eq!(builder.arithmetic(ArithmeticOp::Add, one, one), None);
        assert_eq!(builder.return_value(Some(one)), None);
    }

    #[test]
    fn blocks_get_unique_labels() {
        let mut builder = IrBuilder::new("test");
        let function = builder.declare_function("f", 0);
        let first = builder.append_block(function, "then");
        let second = builder.append_block(function, "then");
        let module = builder.module();
        let labels: Vec<&str> = module
            .function(function)
            .unwrap()
            .blocks
            .iter()
            .map(|b| b.label.as_str())
            .collect();
        assert_eq!(labels, vec!["then", "then1"]);
        assert_ne!(first, second);
    }

    #[test]
    fn dump_shows_definitions_and_declarations() {
        let mut builder = IrBuilder::new("test");
        builder.declare_function("sin", 1);
        let function = builder.declare_function("twice", 1);
        let entry = builder.append_block(function, "entry");
        builder.position_at(entry);
        let x = builder.param(function, 0).unwrap();
        let sum = builder.arithmetic(ArithmeticOp::Add, x, x).unwrap();
        builder.return_value(Some(sum)).unwrap();
        assert!(builder.verify_function(function));

        let text = builder.dump_module_text();
        assert!(text.contains("declare double @sin(double)"), "{}", text);
        assert!(text.contains("define double @twice(double %arg0) {"), "{}", text);
        assert!(text.contains("  %t0 = fadd double %arg0, %arg0"), "{}", text);
        assert!(text.contains("  ret double %t0"), "{}", text);
    }

    #[test]
    fn deleted_functions_disappear() {
        let mut builder = IrBuilder::new("test");
        let function = builder.declare_function("gone", 0);
        builder.delete_function(function);
        assert_eq!(builder.lookup_function("gone"), None);
        assert_eq!(builder.module().functions().count(), 0);
    }
}
