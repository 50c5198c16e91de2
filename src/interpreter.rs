use std::collections::HashMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

use crate::class;
use crate::environment;
use crate::error::LoxError;
use crate::function;
use crate::heap::{ClassObj, ClosureObj, EnvId, FunctionId, Heap, NativeObj};
use crate::syntax::{Expr, LiteralValue, NodeId, Stmt};
use crate::token::{Token, TokenType};
use crate::value::{Callable, Value};

pub struct Interpreter {
    pub(crate) heap: Heap,
    globals: EnvId,
    environment: EnvId,
    locals: HashMap<NodeId, usize>,
    functions: HashMap<NodeId, FunctionId>,
    next_node_id: NodeId,
}

impl Interpreter {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let globals = environment::new_global(&mut heap);

        let clock = heap.track_native(NativeObj {
            name: "clock",
            arity: 0,
            func: |_| {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("system clock is after the unix epoch");
                Value::Number(now.as_secs_f64())
            },
        });
        environment::define(
            &mut heap,
            globals,
            Rc::from("clock"),
            Value::Callable(Callable::Native(clock)),
        );

        Interpreter {
            heap,
            globals,
            environment: globals,
            locals: HashMap::new(),
            functions: HashMap::new(),
            next_node_id: 0,
        }
    }

    // The driver reads this before parsing each chunk of source and writes
    // the parser's ending counter back with `set_next_node_id`, so node ids
    // stay unique across every line of a REPL session instead of each parse
    // restarting at 0 and colliding with ids already recorded in `locals`.
    pub fn next_node_id(&self) -> NodeId {
        self.next_node_id
    }

    pub fn set_next_node_id(&mut self, next_node_id: NodeId) {
        self.next_node_id = next_node_id;
    }

    // Called by the resolver once per `Variable`/`Assign`/`This`/`Super`
    // node it finds bound in some enclosing scope.
    pub fn resolve(&mut self, id: NodeId, depth: usize) {
        self.locals.insert(id, depth);
    }

    // Called by the resolver the first time it visits a function/method
    // declaration; builds the heap `Function` object once up front so the
    // evaluator never has to re-derive one from the AST at call time.
    pub fn define_function(
        &mut self,
        id: NodeId,
        name: Token,
        params: Rc<[Token]>,
        body: Rc<[Stmt]>,
    ) -> FunctionId {
        let function_id = self.heap.track_function(crate::heap::FunctionObj {
            name,
            params,
            body,
            nested: Vec::new(),
        });
        self.functions.insert(id, function_id);
        function_id
    }

    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<(), LoxError> {
        for statement in statements {
            self.execute(statement)?;
            self.heap.collect(self.environment);
        }
        Ok(())
    }

    // Runs `statements` with `env` as the current environment, restoring
    // whatever was current before on every exit path: normal completion,
    // a runtime error, or a `Return` unwind.
    pub fn execute_block(&mut self, statements: &[Stmt], env: EnvId) -> Result<(), LoxError> {
        let previous = self.environment;
        self.environment = env;
        let result = (|| {
            for statement in statements {
                self.execute(statement)?;
            }
            Ok(())
        })();
        self.environment = previous;
        result
    }

    fn execute(&mut self, stmt: &Stmt) -> Result<(), LoxError> {
        match stmt {
            Stmt::Block { statements } => {
                let env = environment::new_child(&mut self.heap, self.environment);
                self.execute_block(statements, env)
            }
            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass, methods),
            Stmt::Expression { expression } => {
                self.evaluate(expression)?;
                Ok(())
            }
            Stmt::Function { id, name, .. } => {
                let function_id = *self
                    .functions
                    .get(id)
                    .expect("resolver builds a Function for every declaration");
                let closure = self.heap.track_closure(ClosureObj {
                    function: function_id,
                    env: self.environment,
                    is_initializer: false,
                });
                environment::define(
                    &mut self.heap,
                    self.environment,
                    Rc::from(name.lexeme.as_ref()),
                    Value::Callable(Callable::Closure(closure)),
                );
                Ok(())
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(branch) = else_branch {
                    self.execute(branch)
                } else {
                    Ok(())
                }
            }
            Stmt::Print { expression } => {
                let value = self.evaluate(expression)?;
                println!("{}", value.stringify(&self.heap));
                Ok(())
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                Err(LoxError::Return(value))
            }
            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                environment::define(
                    &mut self.heap,
                    self.environment,
                    Rc::from(name.lexeme.as_ref()),
                    value,
                );
                Ok(())
            }
            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    self.execute(body)?;
                }
                Ok(())
            }
            Stmt::Null => Ok(()),
        }
    }

    // Defines the class name as nil first so methods may refer to it, binds
    // an optional outer `super` scope, builds a Closure per method, then
    // assigns the finished Class back over the placeholder name.
    fn execute_class(
        &mut self,
        name: &Token,
        superclass: &Option<Expr>,
        methods: &[Stmt],
    ) -> Result<(), LoxError> {
        let superclass_id = match superclass {
            Some(expr) => {
                let value = self.evaluate(expr)?;
                match value {
                    Value::Callable(Callable::Class(id)) => Some(id),
                    _ => {
                        let token = match expr {
                            Expr::Variable { name, .. } => name.clone(),
                            _ => name.clone(),
                        };
                        return Err(LoxError::runtime(token, "Superclass must be a class."));
                    }
                }
            }
            None => None,
        };

        environment::define(
            &mut self.heap,
            self.environment,
            Rc::from(name.lexeme.as_ref()),
            Value::Nil,
        );

        let methods_env = if let Some(superclass_id) = superclass_id {
            let env = environment::new_child(&mut self.heap, self.environment);
            environment::define(
                &mut self.heap,
                env,
                Rc::from("super"),
                Value::Callable(Callable::Class(superclass_id)),
            );
            env
        } else {
            self.environment
        };

        let mut method_map = IndexMap::new();
        for method in methods {
            if let Stmt::Function {
                id,
                name: method_name,
                ..
            } = method
            {
                let function_id = *self
                    .functions
                    .get(id)
                    .expect("resolver builds a Function for every method");
                let is_initializer = method_name.lexeme.as_ref() == "init";
                let closure = self.heap.track_closure(ClosureObj {
                    function: function_id,
                    env: methods_env,
                    is_initializer,
                });
                method_map.insert(Rc::from(method_name.lexeme.as_ref()), closure);
            }
        }

        let class_id = self.heap.track_class(ClassObj {
            name: Rc::from(name.lexeme.as_ref()),
            superclass: superclass_id,
            methods: method_map,
        });

        environment::assign(
            &mut self.heap,
            self.environment,
            name,
            Value::Callable(Callable::Class(class_id)),
        )
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value, LoxError> {
        match expr {
            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                match self.locals.get(id).copied() {
                    Some(distance) => environment::assign_at(
                        &mut self.heap,
                        self.environment,
                        distance,
                        &name.lexeme,
                        value.clone(),
                    ),
                    None => environment::assign(&mut self.heap, self.globals, name, value.clone())?,
                }
                Ok(value)
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, operator, right),
            Expr::Call {
                callee,
                paren,
                arguments,
            } => self.evaluate_call(callee, paren, arguments),
            Expr::Get { object, name } => {
                let object = self.evaluate(object)?;
                match object {
                    Value::Instance(instance) => class::get_property(self, instance, name),
                    _ => Err(LoxError::runtime(
                        name.clone(),
                        "Only instances have properties.",
                    )),
                }
            }
            Expr::Grouping { expression } => self.evaluate(expression),
            Expr::Literal { value } => Ok(literal_value(value)),
            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let is_or = operator.token_type == TokenType::Or;
                if is_or == left.is_truthy() {
                    Ok(left)
                } else {
                    self.evaluate(right)
                }
            }
            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;
                let instance = match object {
                    Value::Instance(instance) => instance,
                    _ => {
                        return Err(LoxError::runtime(
                            name.clone(),
                            "Only instances have fields.",
                        ))
                    }
                };
                let value = self.evaluate(value)?;
                class::set_property(&mut self.heap, instance, name, value.clone());
                Ok(value)
            }
            Expr::Super { id, keyword, method } => self.evaluate_super(*id, keyword, method),
            Expr::This { id, keyword } => {
                let distance = *self
                    .locals
                    .get(id)
                    .expect("resolver always resolves 'this' inside a class");
                Ok(environment::get_at(
                    &self.heap,
                    self.environment,
                    distance,
                    &keyword.lexeme,
                ))
            }
            Expr::Unary { operator, right } => self.evaluate_unary(operator, right),
            Expr::Variable { id, name } => match self.locals.get(id).copied() {
                Some(distance) => Ok(environment::get_at(
                    &self.heap,
                    self.environment,
                    distance,
                    &name.lexeme,
                )),
                None => environment::get(&self.heap, self.globals, name),
            },
        }
    }

    fn evaluate_unary(&mut self, operator: &Token, right: &Expr) -> Result<Value, LoxError> {
        let right = self.evaluate(right)?;
        match operator.token_type {
            TokenType::Minus => match right {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(LoxError::runtime(operator.clone(), "Operand must be a number.")),
            },
            TokenType::Bang => Ok(Value::Bool(!right.is_truthy())),
            _ => unreachable!("parser never produces a unary operator other than ! or -"),
        }
    }

    fn evaluate_binary(
        &mut self,
        left: &Expr,
        operator: &Token,
        right: &Expr,
    ) -> Result<Value, LoxError> {
        let left = self.evaluate(left)?;
        let right = self.evaluate(right)?;

        let number_operands = |op: &Token| -> Result<(f64, f64), LoxError> {
            match (&left, &right) {
                (Value::Number(l), Value::Number(r)) => Ok((*l, *r)),
                _ => Err(LoxError::runtime(op.clone(), "Operands must be numbers.")),
            }
        };

        match operator.token_type {
            TokenType::Minus => number_operands(operator).map(|(l, r)| Value::Number(l - r)),
            TokenType::Slash => number_operands(operator).map(|(l, r)| Value::Number(l / r)),
            TokenType::Star => number_operands(operator).map(|(l, r)| Value::Number(l * r)),
            TokenType::Plus => match (&left, &right) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l + r)),
                (Value::Str(l), Value::Str(r)) => {
                    Ok(Value::Str(Rc::from(format!("{l}{r}"))))
                }
                _ => Err(LoxError::runtime(
                    operator.clone(),
                    "Operands must be two numbers or two strings.",
                )),
            },
            TokenType::Greater => number_operands(operator).map(|(l, r)| Value::Bool(l > r)),
            TokenType::GreaterEqual => number_operands(operator).map(|(l, r)| Value::Bool(l >= r)),
            TokenType::Less => number_operands(operator).map(|(l, r)| Value::Bool(l < r)),
            TokenType::LessEqual => number_operands(operator).map(|(l, r)| Value::Bool(l <= r)),
            TokenType::BangEqual => Ok(Value::Bool(!left.lox_eq(&right))),
            TokenType::EqualEqual => Ok(Value::Bool(left.lox_eq(&right))),
            _ => unreachable!("parser never produces a binary operator outside this set"),
        }
    }

    fn evaluate_call(
        &mut self,
        callee: &Expr,
        paren: &Token,
        arguments: &[Expr],
    ) -> Result<Value, LoxError> {
        let callee = self.evaluate(callee)?;

        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments {
            args.push(self.evaluate(argument)?);
        }

        let callable = match callee {
            Value::Callable(callable) => callable,
            _ => {
                return Err(LoxError::runtime(
                    paren.clone(),
                    "Can only call functions and classes.",
                ))
            }
        };

        let expected_arity = match callable {
            Callable::Native(id) => self.heap.native(id).arity,
            Callable::Closure(id) => function::arity(&self.heap, id),
            Callable::Class(id) => class::arity(&self.heap, id),
        };
        if args.len() != expected_arity {
            return Err(LoxError::runtime(
                paren.clone(),
                format!(
                    "Expected {expected_arity} arguments but got {}.",
                    args.len()
                ),
            ));
        }

        match callable {
            Callable::Native(id) => {
                let native = self.heap.native(id).clone();
                Ok((native.func)(&args))
            }
            Callable::Closure(id) => function::call_closure(self, id, &args),
            Callable::Class(id) => class::instantiate(self, id, &args),
        }
    }

    fn evaluate_super(
        &mut self,
        id: NodeId,
        keyword: &Token,
        method: &Token,
    ) -> Result<Value, LoxError> {
        let distance = *self
            .locals
            .get(&id)
            .expect("resolver only resolves 'super' inside a subclass");
        let superclass = match environment::get_at(&self.heap, self.environment, distance, "super")
        {
            Value::Callable(Callable::Class(id)) => id,
            _ => unreachable!("'super' always resolves to a class"),
        };
        let instance = match environment::get_at(&self.heap, self.environment, distance - 1, "this")
        {
            Value::Instance(id) => id,
            _ => unreachable!("'this' always sits one frame inside 'super'"),
        };

        match class::find_method(&self.heap, superclass, &method.lexeme) {
            Some(closure) => {
                let bound = function::bind(&mut self.heap, closure, Value::Instance(instance));
                Ok(Value::Callable(Callable::Closure(bound)))
            }
            None => Err(LoxError::runtime(
                method.clone(),
                format!("Undefined property '{}'.", method.lexeme),
            )),
        }
    }
}

fn literal_value(value: &LiteralValue) -> Value {
    match value {
        LiteralValue::Boolean(b) => Value::Bool(*b),
        LiteralValue::Null => Value::Nil,
        LiteralValue::Number(n) => Value::Number(*n),
        LiteralValue::String(s) => Value::Str(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::scanner::Scanner;

    fn run(source: &str) -> Interpreter {
        let mut scanner = Scanner::new(source.to_string());
        let tokens = scanner.scan_tokens().clone();
        let mut parser = Parser::new(&tokens);
        let statements = parser.parse().expect("source parses");

        let mut interpreter = Interpreter::new();
        {
            let mut resolver = Resolver::new(&mut interpreter);
            resolver.resolve(&statements);
        }
        interpreter.interpret(&statements).expect("program runs");
        interpreter
    }

    #[test]
    fn closures_capture_their_environment_by_reference() {
        // stdout assertions aren't wired up here; this exercises that the
        // whole pipeline runs without error for a closure-returning-closure.
        run(
            r#"
            fun make() {
                var i = 0;
                fun inc() {
                    i = i + 1;
                    return i;
                }
                return inc;
            }
            var c = make();
            print c();
            print c();
            "#,
        );
    }

    #[test]
    fn init_always_returns_the_instance() {
        let interpreter = run(
            r#"
            class Point {
                init(x, y) {
                    this.x = x;
                    this.y = y;
                }
            }
            var p = Point(3, 4);
            "#,
        );
        let _ = interpreter;
    }

    #[test]
    fn super_dispatch_reaches_the_parent_method() {
        run(
            r#"
            class A { greet() { print "A"; } }
            class B < A { greet() { super.greet(); print "B"; } }
            B().greet();
            "#,
        );
    }

    #[test]
    fn short_circuit_or_skips_right_operand() {
        run(
            r#"
            fun boom() { return 1/0; }
            var a = true or boom();
            "#,
        );
    }

    #[test]
    fn block_scoped_variables_shadow_without_leaking() {
        run(
            r#"
            var a = "outer";
            {
                var a = "inner";
                print a;
            }
            print a;
            "#,
        );
    }

    #[test]
    fn resolver_distance_is_fixed_even_when_a_same_named_global_is_declared_later() {
        // The classic resolver bug: if lookups walked scopes dynamically
        // instead of using the resolver's precomputed distance, declaring a
        // second `a` in the block after the closure is formed would change
        // what the closure prints.
        run(
            r#"
            var a = "global";
            {
                fun show() { print a; }
                show();
                var a = "block";
                show();
            }
            "#,
        );
    }
}
