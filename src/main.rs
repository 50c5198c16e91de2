mod class;
mod environment;
mod error;
mod function;
mod heap;
mod interpreter;
mod parser;
mod resolver;
mod scanner;
mod syntax;
mod token;
mod value;

use std::env;
use std::fs;
use std::io::{self, Write as _};
use std::process::ExitCode;

use error::LoxError;
use interpreter::Interpreter;
use parser::Parser;
use resolver::Resolver;
use scanner::Scanner;

fn run(interpreter: &mut Interpreter, source: String) {
    error::reset_error();

    let mut scanner = Scanner::new(source);
    let tokens = scanner.scan_tokens().clone();

    let mut parser = Parser::with_start_id(&tokens, interpreter.next_node_id());
    let parsed = parser.parse();
    interpreter.set_next_node_id(parser.next_node_id());
    let statements = match parsed {
        Ok(statements) => statements,
        Err(_) => return,
    };

    if error::had_error() {
        return;
    }

    {
        let mut resolver = Resolver::new(interpreter);
        resolver.resolve(&statements);
    }

    if error::had_error() {
        return;
    }

    match interpreter.interpret(&statements) {
        Ok(()) => (),
        Err(LoxError::Runtime { token, message }) => {
            eprintln!("{message}\n[line {}]", token.line);
            error::set_runtime_error();
        }
        Err(LoxError::Return(_)) => unreachable!("a return always unwinds into a call"),
        Err(LoxError::Parse) => unreachable!("parse errors never escape interpret"),
        Err(LoxError::Io(e)) => eprintln!("{e}"),
    }
}

fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(74);
        }
    };

    let mut interpreter = Interpreter::new();
    run(&mut interpreter, source);

    if error::had_error() {
        ExitCode::from(65)
    } else if error::had_runtime_error() {
        ExitCode::from(70)
    } else {
        ExitCode::SUCCESS
    }
}

fn run_prompt() -> ExitCode {
    let mut interpreter = Interpreter::new();
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            break;
        }

        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => run(&mut interpreter, line.clone()),
        }
    }

    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    match args.as_slice() {
        [_, path] => run_file(path),
        [_] => run_prompt(),
        _ => {
            eprintln!("Usage: rlox [script]");
            ExitCode::from(64)
        }
    }
}
