use std::collections::HashMap;
use std::rc::Rc;

use crate::error::token_error;
use crate::heap::FunctionId;
use crate::interpreter::Interpreter;
use crate::syntax::{Expr, NodeId, Stmt};
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

/// Walks the AST once, annotating every `Variable`/`Assign`/`This`/`Super`
/// node with a scope distance and building the heap `Function` object for
/// every function/method declaration it passes. Holds `&mut Interpreter` so
/// it can write straight into its side tables as it goes.
pub struct Resolver<'i> {
    interpreter: &'i mut Interpreter,
    scopes: Vec<HashMap<Rc<str>, bool>>,
    current_function: FunctionType,
    current_class: ClassType,
    current_function_id: Option<FunctionId>,
}

impl<'i> Resolver<'i> {
    pub fn new(interpreter: &'i mut Interpreter) -> Self {
        Resolver {
            interpreter,
            scopes: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            current_function_id: None,
        }
    }

    pub fn resolve(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.resolve_stmt(statement);
        }
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    // Marks the name "not ready yet" so `var a = a;` is caught: if `a` is
    // read while its own initializer is resolving, it's still false here.
    fn declare(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(name.lexeme.as_ref()) {
                token_error(name, "Already a variable with this name in this scope.");
            }
            scope.insert(Rc::from(name.lexeme.as_ref()), false);
        }
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(Rc::from(name.lexeme.as_ref()), true);
        }
    }

    // Walks outward from the innermost scope and stops at the first match,
    // recording the number of frames crossed. A name never found in any
    // scope is left unannotated and resolves as a global at run time.
    fn resolve_local(&mut self, id: NodeId, name: &Token) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(name.lexeme.as_ref()) {
                self.interpreter.resolve(id, depth);
                return;
            }
        }
    }

    fn resolve_function(
        &mut self,
        id: NodeId,
        name: &Token,
        params: &Rc<[Token]>,
        body: &Rc<[Stmt]>,
        kind: FunctionType,
    ) {
        let enclosing_function = self.current_function;
        let enclosing_function_id = self.current_function_id;
        self.current_function = kind;

        let function_id =
            self.interpreter
                .define_function(id, name.clone(), params.clone(), body.clone());
        if let Some(parent) = enclosing_function_id {
            self.interpreter.heap.function_mut(parent).nested.push(function_id);
        }
        self.current_function_id = Some(function_id);

        self.begin_scope();
        for param in params.iter() {
            self.declare(param);
            self.define(param);
        }
        self.resolve(body);
        self.end_scope();

        self.current_function = enclosing_function;
        self.current_function_id = enclosing_function_id;
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block { statements } => {
                self.begin_scope();
                self.resolve(statements);
                self.end_scope();
            }
            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.resolve_class(name, superclass, methods),
            Stmt::Expression { expression } => self.resolve_expr(expression),
            Stmt::Function {
                id,
                name,
                params,
                body,
            } => {
                // Defined eagerly, before resolving the body, so the
                // function can recursively refer to itself.
                self.declare(name);
                self.define(name);
                self.resolve_function(*id, name, params, body, FunctionType::Function);
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(branch) = else_branch {
                    self.resolve_stmt(branch);
                }
            }
            Stmt::Print { expression } => self.resolve_expr(expression),
            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    token_error(keyword, "Can't return from top-level code.");
                }
                if let Some(return_value) = value {
                    if self.current_function == FunctionType::Initializer {
                        token_error(keyword, "Can't return a value from an initializer.");
                    }
                    self.resolve_expr(return_value);
                }
            }
            Stmt::Var { name, initializer } => {
                self.declare(name);
                if let Some(init) = initializer {
                    self.resolve_expr(init);
                }
                self.define(name);
            }
            Stmt::While { condition, body } => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }
            Stmt::Null => {}
        }
    }

    // Opens an outer `super` scope (only with a superclass) then an inner
    // `this` scope around every method. This ordering is load-bearing: the
    // evaluator installs the matching nesting at call time, so `this`
    // always resolves at distance 1 and `super` (when present) at distance
    // 2, independent of whether the class has a superclass.
    fn resolve_class(&mut self, name: &Token, superclass: &Option<Expr>, methods: &[Stmt]) {
        let enclosing_class = self.current_class;
        self.current_class = ClassType::Class;

        self.declare(name);
        self.define(name);

        let has_superclass = superclass.is_some();
        if let Some(Expr::Variable { name: super_name, .. }) = superclass {
            if super_name.lexeme == name.lexeme {
                token_error(super_name, "A class can't inherit from itself.");
            }
            self.current_class = ClassType::Subclass;
            self.resolve_expr(superclass.as_ref().unwrap());

            self.begin_scope();
            self.scopes
                .last_mut()
                .expect("scope just pushed")
                .insert(Rc::from("super"), true);
        }

        self.begin_scope();
        self.scopes
            .last_mut()
            .expect("scope just pushed")
            .insert(Rc::from("this"), true);

        for method in methods {
            if let Stmt::Function {
                id,
                name: method_name,
                params,
                body,
            } = method
            {
                let kind = if method_name.lexeme.as_ref() == "init" {
                    FunctionType::Initializer
                } else {
                    FunctionType::Method
                };
                self.resolve_function(*id, method_name, params, body, kind);
            }
        }

        self.end_scope();
        if has_superclass {
            self.end_scope();
        }

        self.current_class = enclosing_class;
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Assign { id, name, value } => {
                self.resolve_expr(value);
                self.resolve_local(*id, name);
            }
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee);
                for argument in arguments {
                    self.resolve_expr(argument);
                }
            }
            Expr::Get { object, .. } => self.resolve_expr(object),
            Expr::Grouping { expression } => self.resolve_expr(expression),
            Expr::Literal { .. } => {}
            Expr::Set { object, value, .. } => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }
            Expr::Super { id, keyword, .. } => match self.current_class {
                ClassType::None => {
                    token_error(keyword, "Can't use 'super' outside of a class.")
                }
                ClassType::Class => token_error(
                    keyword,
                    "Can't use 'super' in a class with no superclass.",
                ),
                ClassType::Subclass => self.resolve_local(*id, keyword),
            },
            Expr::This { id, keyword } => {
                if self.current_class == ClassType::None {
                    token_error(keyword, "Can't use 'this' outside of a class.");
                } else {
                    self.resolve_local(*id, keyword);
                }
            }
            Expr::Unary { right, .. } => self.resolve_expr(right),
            Expr::Variable { id, name } => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(name.lexeme.as_ref()) == Some(&false) {
                        token_error(name, "Can't read local variable in its own initializer.");
                    }
                }
                self.resolve_local(*id, name);
            }
        }
    }
}
