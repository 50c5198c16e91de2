use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::LoxError;
use crate::function;
use crate::heap::{ClassId, ClosureId, Heap, InstanceId, InstanceObj};
use crate::interpreter::Interpreter;
use crate::token::Token;
use crate::value::{Callable, Value};

pub fn find_method(heap: &Heap, class: ClassId, name: &str) -> Option<ClosureId> {
    let obj = heap.class(class);
    if let Some(&method) = obj.methods.get(name) {
        return Some(method);
    }
    obj.superclass.and_then(|superclass| find_method(heap, superclass, name))
}

pub fn arity(heap: &Heap, class: ClassId) -> usize {
    find_method(heap, class, "init").map_or(0, |closure| function::arity(heap, closure))
}

pub fn instantiate(
    interp: &mut Interpreter,
    class: ClassId,
    arguments: &[Value],
) -> Result<Value, LoxError> {
    let instance = interp.heap.track_instance(InstanceObj {
        class,
        fields: IndexMap::new(),
    });

    if let Some(init) = find_method(&interp.heap, class, "init") {
        let bound = function::bind(&mut interp.heap, init, Value::Instance(instance));
        function::call_closure(interp, bound, arguments)?;
    }

    Ok(Value::Instance(instance))
}

// Since Lox allows freely creating new fields on instances, fields are
// checked before methods: a field can shadow an inherited method of the
// same name.
pub fn get_property(
    interp: &mut Interpreter,
    instance: InstanceId,
    name: &Token,
) -> Result<Value, LoxError> {
    if let Some(value) = interp.heap.instance(instance).fields.get(name.lexeme.as_ref()) {
        return Ok(value.clone());
    }

    let class = interp.heap.instance(instance).class;
    match find_method(&interp.heap, class, &name.lexeme) {
        Some(method) => {
            let bound = function::bind(&mut interp.heap, method, Value::Instance(instance));
            Ok(Value::Callable(Callable::Closure(bound)))
        }
        None => Err(LoxError::runtime(
            name.clone(),
            format!("Undefined property '{}'.", name.lexeme),
        )),
    }
}

pub fn set_property(heap: &mut Heap, instance: InstanceId, name: &Token, value: Value) {
    heap.instance_mut(instance)
        .fields
        .insert(Rc::from(name.lexeme.as_ref()), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::ClassObj;

    #[test]
    fn find_method_walks_superclass_chain() {
        let mut heap = Heap::new();
        let function = heap.track_function(crate::heap::FunctionObj {
            name: Token::new(crate::token::TokenType::Identifier, "greet", 1),
            params: Rc::from(vec![]),
            body: Rc::from(vec![]),
            nested: Vec::new(),
        });
        let closure = heap.track_closure(crate::heap::ClosureObj {
            function,
            env: heap.track_environment(crate::heap::EnvironmentObj {
                parent: None,
                is_global: true,
                values: IndexMap::new(),
            }),
            is_initializer: false,
        });

        let mut methods = IndexMap::new();
        methods.insert(Rc::from("greet"), closure);
        let base = heap.track_class(ClassObj {
            name: Rc::from("A"),
            superclass: None,
            methods,
        });
        let derived = heap.track_class(ClassObj {
            name: Rc::from("B"),
            superclass: Some(base),
            methods: IndexMap::new(),
        });

        assert!(find_method(&heap, derived, "greet").is_some());
        assert!(find_method(&heap, derived, "missing").is_none());
    }
}
