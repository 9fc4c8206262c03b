use inkwell::{
    basic_block::BasicBlock,
    builder::Builder,
    context::Context,
    execution_engine::{FunctionLookupError, JitFunction},
    module::Module,
    types::BasicTypeEnum,
    values::{BasicValue, BasicValueEnum, FloatValue, FunctionValue, IntValue},
    AddressSpace, FloatPredicate, OptimizationLevel,
};

use crate::backend::{ArithmeticOp, Backend, Predicate, PRINTER_NAME};

#[derive(Debug, thiserror::Error)]
pub enum LlvmError {
    #[error("failed to create execution engine: {0}")]
    ExecutionEngine(String),
    #[error(transparent)]
    Lookup(#[from] FunctionLookupError),
}

type DriverFunc = unsafe extern "C" fn();

/// Emits through inkwell into an LLVM module.
pub struct LlvmBackend<'ctx> {
    pub context: &'ctx Context,
    pub module: Module<'ctx>,
    pub builder: Builder<'ctx>,
}

impl<'ctx> LlvmBackend<'ctx> {
    pub fn new(context: &'ctx Context, module_name: &str) -> LlvmBackend<'ctx> {
        let module = context.create_module(module_name);
        let builder = context.create_builder();

        LlvmBackend {
            context,
            module,
            builder,
        }
    }

    /// JIT-compiles the module and calls the `void()` function `name`.
    pub fn run_driver(&self, name: &str) -> Result<(), LlvmError> {
        let ee = self
            .module
            .create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|e| LlvmError::ExecutionEngine(e.to_string()))?;

        let driver: JitFunction<DriverFunc> = unsafe { ee.get_function(name) }?;

        unsafe {
            driver.call();
        }

        Ok(())
    }

    fn positioned(&self) -> Option<BasicBlock<'ctx>> {
        self.builder.get_insert_block()
    }
}

fn float(value: BasicValueEnum) -> Option<FloatValue> {
    match value {
        BasicValueEnum::FloatValue(value) => Some(value),
        _ => None,
    }
}

fn int(value: BasicValueEnum) -> Option<IntValue> {
    match value {
        BasicValueEnum::IntValue(value) => Some(value),
        _ => None,
    }
}

impl<'ctx> Backend for LlvmBackend<'ctx> {
    type Function = FunctionValue<'ctx>;
    type Block = BasicBlock<'ctx>;
    type Value = BasicValueEnum<'ctx>;

    fn declare_function(&mut self, name: &str, arity: usize) -> FunctionValue<'ctx> {
        if let Some(existing) = self.module.get_function(name) {
            return existing;
        }

        let args_types = std::iter::repeat(self.context.f64_type())
            .take(arity)
            .map(|f| f.into())
            .collect::<Vec<BasicTypeEnum>>();
        let fn_type = self.context.f64_type().fn_type(args_types.as_slice(), false);
        self.module.add_function(name, fn_type, None)
    }

    fn declare_printer(&mut self) -> FunctionValue<'ctx> {
        if let Some(existing) = self.module.get_function(PRINTER_NAME) {
            return existing;
        }

        let format_type = self.context.i8_type().ptr_type(AddressSpace::Generic);
        let fn_type = self.context.i32_type().fn_type(&[format_type.into()], true);
        self.module.add_function(PRINTER_NAME, fn_type, None)
    }

    fn declare_driver(&mut self, name: &str) -> FunctionValue<'ctx> {
        if let Some(existing) = self.module.get_function(name) {
            return existing;
        }

        let fn_type = self.context.void_type().fn_type(&[], false);
        self.module.add_function(name, fn_type, None)
    }

    fn lookup_function(&self, name: &str) -> Option<FunctionValue<'ctx>> {
        self.module.get_function(name)
    }

    fn arity(&self, function: FunctionValue<'ctx>) -> usize {
        function.count_params() as usize
    }

    fn has_body(&self, function: FunctionValue<'ctx>) -> bool {
        function.count_basic_blocks() > 0
    }

    fn param(&self, function: FunctionValue<'ctx>, index: usize) -> Option<BasicValueEnum<'ctx>> {
        function.get_nth_param(index as u32)
    }

    fn append_block(&mut self, function: FunctionValue<'ctx>, label: &str) -> BasicBlock<'ctx> {
        self.context.append_basic_block(function, label)
    }

    fn position_at(&mut self, block: BasicBlock<'ctx>) {
        self.builder.position_at_end(block);
    }

    fn current_block(&self) -> Option<BasicBlock<'ctx>> {
        self.positioned()
    }

    fn current_function(&self) -> Option<FunctionValue<'ctx>> {
        self.positioned()?.get_parent()
    }

    fn constant_scalar(&mut self, value: f64) -> BasicValueEnum<'ctx> {
        self.context.f64_type().const_float(value).into()
    }

    fn constant_string(&mut self, text: &str, name: &str) -> Option<BasicValueEnum<'ctx>> {
        self.positioned()?;
        let global = self.builder.build_global_string_ptr(text, name);
        Some(global.as_pointer_value().into())
    }

    fn arithmetic(
        &mut self,
        op: ArithmeticOp,
        lhs: BasicValueEnum<'ctx>,
        rhs: BasicValueEnum<'ctx>,
    ) -> Option<BasicValueEnum<'ctx>> {
        self.positioned()?;
        let (lhs, rhs) = (float(lhs)?, float(rhs)?);

        let value = match op {
            ArithmeticOp::Add => self.builder.build_float_add(lhs, rhs, "addtmp"),
            ArithmeticOp::Sub => self.builder.build_float_sub(lhs, rhs, "subtmp"),
            ArithmeticOp::Mul => self.builder.build_float_mul(lhs, rhs, "multmp"),
            ArithmeticOp::Div => self.builder.build_float_div(lhs, rhs, "divtmp"),
            ArithmeticOp::Rem => self.builder.build_float_rem(lhs, rhs, "remtmp"),
        };
        Some(value.into())
    }

    fn compare(
        &mut self,
        predicate: Predicate,
        lhs: BasicValueEnum<'ctx>,
        rhs: BasicValueEnum<'ctx>,
    ) -> Option<BasicValueEnum<'ctx>> {
        self.positioned()?;
        let (lhs, rhs) = (float(lhs)?, float(rhs)?);

        let predicate = match predicate {
            Predicate::Equal => FloatPredicate::UEQ,
            Predicate::NotEqual => FloatPredicate::ONE,
        };
        let flag = self
            .builder
            .build_float_compare(predicate, lhs, rhs, "cmptmp");
        Some(flag.into())
    }

    fn cast_to_scalar(&mut self, value: BasicValueEnum<'ctx>) -> Option<BasicValueEnum<'ctx>> {
        self.positioned()?;
        let flag = int(value)?;
        let value =
            self.builder
                .build_unsigned_int_to_float(flag, self.context.f64_type(), "booltmp");
        Some(value.into())
    }

    fn call(
        &mut self,
        function: FunctionValue<'ctx>,
        args: &[BasicValueEnum<'ctx>],
    ) -> Option<BasicValueEnum<'ctx>> {
        self.positioned()?;
        self.builder
            .build_call(function, args, "calltmp")
            .try_as_basic_value()
            .left()
    }

    fn branch_conditional(
        &mut self,
        condition: BasicValueEnum<'ctx>,
        then_block: BasicBlock<'ctx>,
        else_block: BasicBlock<'ctx>,
    ) -> Option<()> {
        self.positioned()?;
        let condition = int(condition)?;
        self.builder
            .build_conditional_branch(condition, then_block, else_block);
        Some(())
    }

    fn branch_unconditional(&mut self, target: BasicBlock<'ctx>) -> Option<()> {
        self.positioned()?;
        self.builder.build_unconditional_branch(target);
        Some(())
    }

    fn merge_values(
        &mut self,
        incoming: &[(BasicValueEnum<'ctx>, BasicBlock<'ctx>)],
    ) -> Option<BasicValueEnum<'ctx>> {
        self.positioned()?;
        let phi = self.builder.build_phi(self.context.f64_type(), "iftmp");
        let incoming = incoming
            .iter()
            .map(|(value, block)| (value as &dyn BasicValue<'ctx>, *block))
            .collect::<Vec<_>>();
        phi.add_incoming(incoming.as_slice());
        Some(phi.as_basic_value())
    }

    fn return_value(&mut self, value: Option<BasicValueEnum<'ctx>>) -> Option<()> {
        self.positioned()?;
        match value {
            Some(value) => self.builder.build_return(Some(&value)),
            None => self.builder.build_return(None),
        };
        Some(())
    }

    fn verify_function(&self, function: FunctionValue<'ctx>) -> bool {
        function.verify(true)
    }

    fn delete_function(&mut self, function: FunctionValue<'ctx>) {
        self.builder.clear_insertion_position();
        unsafe {
            function.delete();
        }
    }

    fn dump_module_text(&self) -> String {
        self.module.print_to_string().to_string()
    }
}

#[cfg(test)]
mod tests {
    use inkwell::context::Context;

    use super::LlvmBackend;
    use crate::backend::Backend;
    use crate::codegen::Codegen;
    use crate::parser::parse_str;

    #[test]
    fn codegen_works() {
        let ast = parse_str("extern sin(x); def thing(x) sin(x) * x; thing(2)").unwrap();
        let context = Context::create();
        let mut codegen = Codegen::new(LlvmBackend::new(&context, "test"));
        codegen.codegen(&ast).unwrap();
        let text = codegen.backend().dump_module_text();
        assert!(text.contains("declare double @sin(double)"), "{}", text);
        assert!(text.contains("define double @thing(double"), "{}", text);
        assert!(text.contains("define void @main()"), "{}", text);
    }

    #[test]
    fn declarations_are_reused() {
        let context = Context::create();
        let mut backend = LlvmBackend::new(&context, "test");
        let first = backend.declare_function("foo", 2);
        let second = backend.declare_function("foo", 2);
        assert_eq!(first, second);
        assert_eq!(backend.arity(first), 2);
    }
}
