use kaleidoscope::{
    ast::{Expression, File, Prototype},
    codegen::{CodegenError, DRIVER_NAME},
    compile, compile_with,
    ir::{verify_function, InstKind, Interpreter, IrBuilder, Module},
    lexer::lex,
    parser::{parse_str, Precedence},
    token::Token,
    CompileError, MODULE_NAME,
};
use pretty_assertions::assert_eq;

fn printed(source: &str) -> Vec<f64> {
    let module = compile(source).unwrap();
    Interpreter::new(&module).run_driver(DRIVER_NAME).unwrap()
}

fn call_count(module: &Module, name: &str) -> usize {
    let target = match module.get_function(name) {
        Some(target) => target,
        None => return 0,
    };
    module
        .functions()
        .flat_map(|(_, function)| function.instructions())
        .filter(|inst| match &inst.kind {
            InstKind::Call { callee, .. } => *callee == target,
            _ => false,
        })
        .count()
}

#[test]
fn single_number() {
    assert_eq!(lex("42").unwrap(), vec![Token::Number(42.0)]);
    assert_eq!(
        parse_str("42").unwrap(),
        File {
            expressions: vec![Expression::Number(42.0)],
            ..File::default()
        }
    );
    assert_eq!(printed("42"), vec![42.0]);
}

#[test]
fn extern_call() {
    let source = "extern foo(a,b); foo(1,2)";
    assert_eq!(
        parse_str(source).unwrap(),
        File {
            externals: vec![Prototype {
                name: "foo".to_string(),
                args: vec!["a".to_string(), "b".to_string()],
            }],
            expressions: vec![Expression::Call(
                "foo".to_string(),
                vec![Expression::Number(1.0), Expression::Number(2.0)]
            )],
            ..File::default()
        }
    );

    let module = compile(source).unwrap();
    let foo = module.get_function("foo").unwrap();
    assert_eq!(module.function(foo).unwrap().params.len(), 2);
    assert_eq!(call_count(&module, "foo"), 1);
}

#[test]
fn identity_function() {
    let module = compile("def id(x) x; id(5)").unwrap();
    let mut interpreter = Interpreter::new(&module);
    assert_eq!(interpreter.call("id", &[-3.25]), Ok(-3.25));
    assert_eq!(interpreter.run_driver(DRIVER_NAME), Ok(vec![5.0]));
    assert_eq!(interpreter.stdout(), "5.000000\n");
}

#[test]
fn wrong_argument_count() {
    assert_eq!(
        compile("extern f(a); f(1,2)"),
        Err(CompileError::Codegen(CodegenError::InvalidArgumentCount {
            found: 2,
            expected: 1
        }))
    );

    let builder = IrBuilder::new(MODULE_NAME);
    let mut codegen = kaleidoscope::codegen::Codegen::new(builder);
    assert!(codegen.codegen(&parse_str("extern f(a); f(1,2)").unwrap()).is_err());
    assert_eq!(call_count(codegen.backend().module(), "f"), 0);
}

#[test]
fn if_then_else() {
    let module = compile("if 1 then 2 else 3").unwrap();
    let main = module.get_function(DRIVER_NAME).unwrap();
    let driver = module.function(main).unwrap();
    assert_eq!(driver.blocks.len(), 4);
    assert_eq!(
        driver
            .instructions()
            .filter(|inst| match inst.kind {
                InstKind::Phi(_) => true,
                _ => false,
            })
            .count(),
        1
    );
    assert_eq!(printed("if 1 then 2 else 3"), vec![2.0]);
    assert_eq!(printed("if 0 then 2 else 3"), vec![3.0]);
}

#[test]
fn blank_sources_compile_to_nothing() {
    for source in &["", "   \n\t", "// a comment\n", "/* block */ // line"] {
        assert_eq!(lex(source).unwrap(), Vec::<Token>::new());
        assert_eq!(parse_str(source).unwrap(), File::default());
        assert_eq!(printed(source), Vec::<f64>::new());
    }
}

#[test]
fn unknown_names() {
    assert_eq!(
        compile("def f(x) y;"),
        Err(CompileError::Codegen(CodegenError::UnknownVariable(
            "y".to_string()
        )))
    );
    assert_eq!(
        compile("g(1)"),
        Err(CompileError::Codegen(CodegenError::UnknownFunction(
            "g".to_string()
        )))
    );
}

#[test]
fn every_definition_verifies() {
    let source = "
        extern sqrt(x);
        def hyp(a, b) sqrt(a * a + b * b);
        def sign(x) if x = 0 then 0 else if x = fabs(x) then 1 else 0 - 1;
        extern fabs(x);
        hyp(3, 4);
        sign(0 - 2)
    ";
    let module = compile(source).unwrap();
    for (id, function) in module.functions() {
        if !function.is_declaration() {
            assert_eq!(verify_function(&module, id), Ok(()), "{}", function.name);
        }
    }
}

#[test]
fn programs_run_end_to_end() {
    let source = "
        // fibonacci
        def fib(n)
            if n = 0 then 0
            else if n = 1 then 1
            else fib(n - 1) + fib(n - 2);

        extern pow(x, y);
        fib(15);
        pow(2, 10);
        7 % 4
    ";
    assert_eq!(printed(source), vec![610.0, 1024.0, 3.0]);
}

#[test]
fn precedence_policy_changes_results() {
    let source = "2 * 3 + 4";
    assert_eq!(printed(source), vec![14.0]);

    let builder =
        compile_with(source, Precedence::standard(), IrBuilder::new(MODULE_NAME)).unwrap();
    let module = builder.finish();
    assert_eq!(
        Interpreter::new(&module).run_driver(DRIVER_NAME),
        Ok(vec![10.0])
    );
}

#[test]
fn runaway_recursion_is_bounded() {
    let module = compile("def loop(x) loop(x + 1); loop(0)").unwrap();
    let result = Interpreter::new(&module)
        .with_step_limit(1_000)
        .run_driver(DRIVER_NAME);
    assert!(result.is_err());
}

#[test]
fn driver_names_clash_with_user_code() {
    assert_eq!(
        compile("extern main(x); 1"),
        Err(CompileError::Codegen(CodegenError::Redefinition(
            "main".to_string()
        )))
    );
    assert_eq!(
        compile("def printf(a, b) a + b; 1"),
        Err(CompileError::Codegen(CodegenError::Redefinition(
            "printf".to_string()
        )))
    );
}
