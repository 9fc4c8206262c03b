use std::fs;

use anyhow::{anyhow, Context as _};
use clap::{crate_version, App, Arg, ArgMatches};
use kaleidoscope::{codegen::DRIVER_NAME, lexer, parser, parser::Precedence};

struct Options<'a> {
    input: &'a str,
    emit: &'a str,
    precedence: Precedence,
    run: bool,
    verbose: bool,
}

impl<'a> Options<'a> {
    fn from_matches(matches: &'a ArgMatches<'a>) -> anyhow::Result<Options<'a>> {
        let input = matches
            .value_of("INPUT")
            .ok_or_else(|| anyhow!("no input file given"))?;
        let precedence = if matches.is_present("precedence") {
            Precedence::standard()
        } else {
            Precedence::Uniform
        };

        Ok(Options {
            input,
            emit: matches.value_of("emit").unwrap_or("ir"),
            precedence,
            run: matches.is_present("run"),
            verbose: matches.is_present("verbose"),
        })
    }
}

fn main() -> anyhow::Result<()> {
    let matches = App::new("kaleidoscope")
        .version(crate_version!())
        .about("compiles kaleidoscope source to LLVM-style IR")
        .arg(
            Arg::with_name("INPUT")
                .help("the source file to compile")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("emit")
                .long("emit")
                .help("the stage to print")
                .takes_value(true)
                .possible_values(&["tokens", "ast", "ir"])
                .default_value("ir"),
        )
        .arg(
            Arg::with_name("precedence")
                .long("precedence")
                .help("give * / % precedence over + - over =, associating left"),
        )
        .arg(
            Arg::with_name("run")
                .long("run")
                .help("run the top-level expressions after compiling"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("print stage banners to stderr"),
        )
        .get_matches();
    let options = Options::from_matches(&matches)?;

    let source = fs::read_to_string(options.input)
        .with_context(|| format!("failed to read {}", options.input))?;
    if options.verbose {
        eprintln!("Source:");
        eprintln!("{}\n", source);
    }

    match options.emit {
        "tokens" => {
            for token in lexer::lex(&source)? {
                println!("{}", token);
            }
            Ok(())
        }
        "ast" => {
            let file = parser::parse_str_with(&source, options.precedence)?;
            print!("{}", file);
            Ok(())
        }
        _ => compile_and_run(&source, &options),
    }
}

#[cfg(not(feature = "llvm"))]
fn compile_and_run(source: &str, options: &Options) -> anyhow::Result<()> {
    use kaleidoscope::ir::{IrBuilder, Interpreter};

    let builder = kaleidoscope::compile_with(
        source,
        options.precedence.clone(),
        IrBuilder::new(kaleidoscope::MODULE_NAME),
    )?;
    let module = builder.finish();
    if options.verbose {
        eprintln!("IR:");
    }
    print!("{}", module);

    if options.run {
        let mut interpreter = Interpreter::new(&module);
        interpreter.run_driver(DRIVER_NAME)?;
        if options.verbose {
            eprintln!("Result:");
        }
        print!("{}", interpreter.stdout());
    }

    Ok(())
}

#[cfg(feature = "llvm")]
fn compile_and_run(source: &str, options: &Options) -> anyhow::Result<()> {
    use inkwell::context::Context;
    use kaleidoscope::{backend::Backend, llvm::LlvmBackend};

    let context = Context::create();
    let backend = kaleidoscope::compile_with(
        source,
        options.precedence.clone(),
        LlvmBackend::new(&context, kaleidoscope::MODULE_NAME),
    )?;
    if options.verbose {
        eprintln!("IR:");
    }
    print!("{}", backend.dump_module_text());

    if options.run {
        if options.verbose {
            eprintln!("Result:");
        }
        backend.run_driver(DRIVER_NAME)?;
    }

    Ok(())
}
