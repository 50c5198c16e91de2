use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::token::{Token, TokenType};
use crate::value::Value;

/// Covers both the static-error surface (scanner/parser/resolver) and the
/// runtime-error surface (evaluator). `Return` is not a user-facing error,
/// it is the control-flow channel `function::call_closure` intercepts.
#[derive(Debug, Error)]
pub enum LoxError {
    #[error("parse error")]
    Parse,
    #[error("{message}")]
    Runtime { token: Token, message: String },
    #[error("return")]
    Return(Value),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LoxError {
    pub fn runtime(token: Token, message: impl Into<String>) -> Self {
        LoxError::Runtime {
            token,
            message: message.into(),
        }
    }
}

static HAD_ERROR: AtomicBool = AtomicBool::new(false);
static HAD_RUNTIME_ERROR: AtomicBool = AtomicBool::new(false);

pub fn had_error() -> bool {
    HAD_ERROR.load(Ordering::Relaxed)
}

pub fn had_runtime_error() -> bool {
    HAD_RUNTIME_ERROR.load(Ordering::Relaxed)
}

pub fn set_runtime_error() {
    HAD_RUNTIME_ERROR.store(true, Ordering::Relaxed);
}

pub fn reset_error() {
    HAD_ERROR.store(false, Ordering::Relaxed);
    HAD_RUNTIME_ERROR.store(false, Ordering::Relaxed);
}

pub fn error(line: i32, message: &str) {
    report(line, "", message);
}

pub fn token_error(token: &Token, message: &str) {
    if token.token_type == TokenType::Eof {
        report(token.line, " at end", message);
    } else {
        report(token.line, &format!(" at '{}'", token.lexeme), message);
    }
}

fn report(line: i32, location: &str, message: &str) {
    eprintln!("[line {line}] Error{location}: {message}");
    HAD_ERROR.store(true, Ordering::Relaxed);
}
