use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::LoxError;
use crate::heap::{EnvId, EnvironmentObj, Heap};
use crate::token::Token;
use crate::value::Value;

pub fn new_global(heap: &mut Heap) -> EnvId {
    heap.track_environment(EnvironmentObj {
        parent: None,
        is_global: true,
        values: IndexMap::new(),
    })
}

pub fn new_child(heap: &mut Heap, parent: EnvId) -> EnvId {
    heap.track_environment(EnvironmentObj {
        parent: Some(parent),
        is_global: false,
        values: IndexMap::new(),
    })
}

pub fn define(heap: &mut Heap, env: EnvId, name: Rc<str>, value: Value) {
    heap.environment_mut(env).values.insert(name, value);
}

// Searches this frame, then walks the parent chain.
pub fn get(heap: &Heap, env: EnvId, name: &Token) -> Result<Value, LoxError> {
    let mut current = env;
    loop {
        let frame = heap.environment(current);
        if let Some(value) = frame.values.get(name.lexeme.as_ref()) {
            return Ok(value.clone());
        }
        match frame.parent {
            Some(parent) => current = parent,
            None => {
                return Err(LoxError::runtime(
                    name.clone(),
                    format!("Undefined variable '{}'.", name.lexeme),
                ))
            }
        }
    }
}

pub fn assign(heap: &mut Heap, env: EnvId, name: &Token, value: Value) -> Result<(), LoxError> {
    let mut current = env;
    loop {
        if heap.environment(current).values.contains_key(name.lexeme.as_ref()) {
            heap.environment_mut(current)
                .values
                .insert(Rc::from(name.lexeme.as_ref()), value);
            return Ok(());
        }
        match heap.environment(current).parent {
            Some(parent) => current = parent,
            None => {
                return Err(LoxError::runtime(
                    name.clone(),
                    format!("Undefined variable '{}'.", name.lexeme),
                ))
            }
        }
    }
}

pub fn ancestor(heap: &Heap, env: EnvId, distance: usize) -> EnvId {
    let mut current = env;
    for _ in 0..distance {
        current = heap
            .environment(current)
            .parent
            .expect("resolved distance exceeds the environment chain");
    }
    current
}

pub fn get_at(heap: &Heap, env: EnvId, distance: usize, name: &str) -> Value {
    let target = ancestor(heap, env, distance);
    heap.environment(target)
        .values
        .get(name)
        .cloned()
        .unwrap_or_else(|| panic!("resolver distance pointed at a scope missing '{name}'"))
}

pub fn assign_at(heap: &mut Heap, env: EnvId, distance: usize, name: &str, value: Value) {
    let target = ancestor(heap, env, distance);
    heap.environment_mut(target)
        .values
        .insert(Rc::from(name), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;

    #[test]
    fn get_walks_parent_chain() {
        let mut heap = Heap::new();
        let global = new_global(&mut heap);
        define(&mut heap, global, Rc::from("a"), Value::Number(1.0));
        let child = new_child(&mut heap, global);

        let name = Token::new(TokenType::Identifier, "a", 1);
        let value = get(&heap, child, &name).expect("a is defined in global");
        assert!(matches!(value, Value::Number(n) if n == 1.0));
    }

    #[test]
    fn get_reports_undefined_variable() {
        let heap = Heap::new();
        let mut heap = heap;
        let global = new_global(&mut heap);
        let name = Token::new(TokenType::Identifier, "missing", 3);
        let err = get(&heap, global, &name).unwrap_err();
        assert!(matches!(err, LoxError::Runtime { .. }));
    }

    #[test]
    fn assign_at_writes_exact_frame_without_fallback_search() {
        let mut heap = Heap::new();
        let global = new_global(&mut heap);
        define(&mut heap, global, Rc::from("a"), Value::Number(1.0));
        let child = new_child(&mut heap, global);

        assign_at(&mut heap, child, 1, "a", Value::Number(2.0));
        let value = get_at(&heap, child, 1, "a");
        assert!(matches!(value, Value::Number(n) if n == 2.0));
    }
}
