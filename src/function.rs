use std::rc::Rc;

use crate::environment;
use crate::error::LoxError;
use crate::heap::{ClosureId, ClosureObj, Heap};
use crate::interpreter::Interpreter;
use crate::value::Value;

pub fn arity(heap: &Heap, closure: ClosureId) -> usize {
    let obj = heap.closure(closure);
    heap.function(obj.function).params.len()
}

// Creates a new environment nestled inside the method's original closure,
// a closure within a closure. `this` is bound there so the method body,
// when called, resolves it at a fixed distance of one frame up regardless
// of whether the class has a superclass.
pub fn bind(heap: &mut Heap, closure: ClosureId, instance: Value) -> ClosureId {
    let obj = *heap.closure(closure);
    let env = environment::new_child(heap, obj.env);
    environment::define(heap, env, Rc::from("this"), instance);
    heap.track_closure(ClosureObj {
        function: obj.function,
        env,
        is_initializer: obj.is_initializer,
    })
}

pub fn call_closure(
    interp: &mut Interpreter,
    closure: ClosureId,
    arguments: &[Value],
) -> Result<Value, LoxError> {
    let obj = *interp.heap.closure(closure);
    let function = interp.heap.function(obj.function).clone();

    let call_env = environment::new_child(&mut interp.heap, obj.env);
    for (param, argument) in function.params.iter().zip(arguments.iter()) {
        environment::define(
            &mut interp.heap,
            call_env,
            Rc::from(param.lexeme.as_ref()),
            argument.clone(),
        );
    }

    let outcome = interp.execute_block(&function.body, call_env);
    let return_value = match outcome {
        Ok(()) => Value::Nil,
        Err(LoxError::Return(value)) => value,
        Err(other) => return Err(other),
    };

    if obj.is_initializer {
        // An init method always hands back the instance it was bound to,
        // regardless of what (if anything) its body returned.
        Ok(environment::get_at(&interp.heap, obj.env, 0, "this"))
    } else {
        Ok(return_value)
    }
}
