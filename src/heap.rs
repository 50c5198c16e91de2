use std::rc::Rc;

use indexmap::IndexMap;

use crate::syntax::Stmt;
use crate::token::Token;
use crate::value::{Callable, Value};

macro_rules! define_handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u32);
    };
}

define_handle!(EnvId);
define_handle!(FunctionId);
define_handle!(ClosureId);
define_handle!(NativeId);
define_handle!(ClassId);
define_handle!(InstanceId);

pub struct EnvironmentObj {
    pub parent: Option<EnvId>,
    pub is_global: bool,
    pub values: IndexMap<Rc<str>, Value>,
}

/// The compiled form of a function/method declaration, built once by the
/// resolver. Shares its body and parameter list with the AST node instead of
/// copying them.
#[derive(Clone)]
pub struct FunctionObj {
    pub name: Token,
    pub params: Rc<[Token]>,
    pub body: Rc<[Stmt]>,
    pub nested: Vec<FunctionId>,
}

#[derive(Clone, Copy)]
pub struct ClosureObj {
    pub function: FunctionId,
    pub env: EnvId,
    pub is_initializer: bool,
}

#[derive(Clone)]
pub struct NativeObj {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&[Value]) -> Value,
}

pub struct ClassObj {
    pub name: Rc<str>,
    pub superclass: Option<ClassId>,
    pub methods: IndexMap<Rc<str>, ClosureId>,
}

pub struct InstanceObj {
    pub class: ClassId,
    pub fields: IndexMap<Rc<str>, Value>,
}

struct Slot<T> {
    value: Option<T>,
    marked: bool,
}

struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, value: T) -> u32 {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Slot {
                value: Some(value),
                marked: false,
            };
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                value: Some(value),
                marked: false,
            });
            index
        }
    }

    fn get(&self, index: u32) -> &T {
        self.slots[index as usize]
            .value
            .as_ref()
            .expect("heap handle points at a freed slot")
    }

    fn get_mut(&mut self, index: u32) -> &mut T {
        self.slots[index as usize]
            .value
            .as_mut()
            .expect("heap handle points at a freed slot")
    }

    /// Returns true the first time a live slot is marked in a cycle, false if
    /// it was already marked or the slot is empty. Callers use this to decide
    /// whether to push the slot's children onto the worklist.
    fn mark(&mut self, index: u32) -> bool {
        match self.slots.get_mut(index as usize) {
            Some(slot) if slot.value.is_some() && !slot.marked => {
                slot.marked = true;
                true
            }
            Some(_) => false,
            None => {
                eprintln!("gc: mark of unallocated slot {index}");
                false
            }
        }
    }

    fn sweep(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
            } else {
                slot.value = None;
                self.free.push(index as u32);
            }
        }
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

enum Mark {
    Env(EnvId),
    Function(FunctionId),
    Closure(ClosureId),
    Native(NativeId),
    Class(ClassId),
    Instance(InstanceId),
}

fn push_value(worklist: &mut Vec<Mark>, value: &Value) {
    match value {
        Value::Callable(Callable::Closure(id)) => worklist.push(Mark::Closure(*id)),
        Value::Callable(Callable::Native(id)) => worklist.push(Mark::Native(*id)),
        Value::Callable(Callable::Class(id)) => worklist.push(Mark::Class(*id)),
        Value::Instance(id) => worklist.push(Mark::Instance(*id)),
        Value::Nil | Value::Bool(_) | Value::Number(_) | Value::Str(_) => {}
    }
}

const DEFAULT_THRESHOLD: usize = 4096;

pub struct Heap {
    environments: Arena<EnvironmentObj>,
    functions: Arena<FunctionObj>,
    closures: Arena<ClosureObj>,
    natives: Arena<NativeObj>,
    classes: Arena<ClassObj>,
    instances: Arena<InstanceObj>,
    threshold: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Heap {
            environments: Arena::new(),
            functions: Arena::new(),
            closures: Arena::new(),
            natives: Arena::new(),
            classes: Arena::new(),
            instances: Arena::new(),
            threshold,
        }
    }

    fn live_objects(&self) -> usize {
        self.environments.len()
            + self.functions.len()
            + self.closures.len()
            + self.natives.len()
            + self.classes.len()
            + self.instances.len()
    }

    pub fn track_environment(&mut self, obj: EnvironmentObj) -> EnvId {
        EnvId(self.environments.insert(obj))
    }

    pub fn track_function(&mut self, obj: FunctionObj) -> FunctionId {
        FunctionId(self.functions.insert(obj))
    }

    pub fn track_closure(&mut self, obj: ClosureObj) -> ClosureId {
        ClosureId(self.closures.insert(obj))
    }

    pub fn track_native(&mut self, obj: NativeObj) -> NativeId {
        NativeId(self.natives.insert(obj))
    }

    pub fn track_class(&mut self, obj: ClassObj) -> ClassId {
        ClassId(self.classes.insert(obj))
    }

    pub fn track_instance(&mut self, obj: InstanceObj) -> InstanceId {
        InstanceId(self.instances.insert(obj))
    }

    pub fn environment(&self, id: EnvId) -> &EnvironmentObj {
        self.environments.get(id.0)
    }

    pub fn environment_mut(&mut self, id: EnvId) -> &mut EnvironmentObj {
        self.environments.get_mut(id.0)
    }

    pub fn function(&self, id: FunctionId) -> &FunctionObj {
        self.functions.get(id.0)
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut FunctionObj {
        self.functions.get_mut(id.0)
    }

    pub fn closure(&self, id: ClosureId) -> &ClosureObj {
        self.closures.get(id.0)
    }

    pub fn native(&self, id: NativeId) -> &NativeObj {
        self.natives.get(id.0)
    }

    pub fn class(&self, id: ClassId) -> &ClassObj {
        self.classes.get(id.0)
    }

    pub fn instance(&self, id: InstanceId) -> &InstanceObj {
        self.instances.get(id.0)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> &mut InstanceObj {
        self.instances.get_mut(id.0)
    }

    /// Marks from `root` (the current evaluator environment) and sweeps.
    /// Only actually runs once live object count crosses the threshold, so
    /// small scripts never pay for a collection.
    pub fn collect(&mut self, root: EnvId) {
        if self.live_objects() < self.threshold {
            return;
        }

        let mut worklist = vec![Mark::Env(root)];
        while let Some(item) = worklist.pop() {
            match item {
                Mark::Env(id) => {
                    if self.environments.mark(id.0) {
                        let obj = self.environments.get(id.0);
                        if let Some(parent) = obj.parent {
                            worklist.push(Mark::Env(parent));
                        }
                        for value in obj.values.values() {
                            push_value(&mut worklist, value);
                        }
                    }
                }
                Mark::Function(id) => {
                    if self.functions.mark(id.0) {
                        for &nested in &self.functions.get(id.0).nested {
                            worklist.push(Mark::Function(nested));
                        }
                    }
                }
                Mark::Closure(id) => {
                    if self.closures.mark(id.0) {
                        let obj = *self.closures.get(id.0);
                        worklist.push(Mark::Function(obj.function));
                        worklist.push(Mark::Env(obj.env));
                    }
                }
                Mark::Native(id) => {
                    self.natives.mark(id.0);
                }
                Mark::Class(id) => {
                    if self.classes.mark(id.0) {
                        let obj = self.classes.get(id.0);
                        if let Some(superclass) = obj.superclass {
                            worklist.push(Mark::Class(superclass));
                        }
                        for &method in obj.methods.values() {
                            worklist.push(Mark::Closure(method));
                        }
                    }
                }
                Mark::Instance(id) => {
                    if self.instances.mark(id.0) {
                        let obj = self.instances.get(id.0);
                        worklist.push(Mark::Class(obj.class));
                        for value in obj.fields.values() {
                            push_value(&mut worklist, value);
                        }
                    }
                }
            }
        }

        self.environments.sweep();
        self.functions.sweep();
        self.closures.sweep();
        self.natives.sweep();
        self.classes.sweep();
        self.instances.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_environment_is_freed() {
        let mut heap = Heap::with_threshold(0);
        let global = heap.track_environment(EnvironmentObj {
            parent: None,
            is_global: true,
            values: IndexMap::new(),
        });
        heap.track_environment(EnvironmentObj {
            parent: Some(global),
            is_global: false,
            values: IndexMap::new(),
        });

        assert_eq!(heap.live_objects(), 2);
        heap.collect(global);
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn reachable_closure_cycle_survives_and_can_be_collected_again() {
        let mut heap = Heap::with_threshold(0);
        let global = heap.track_environment(EnvironmentObj {
            parent: None,
            is_global: true,
            values: IndexMap::new(),
        });
        let env = heap.track_environment(EnvironmentObj {
            parent: Some(global),
            is_global: false,
            values: IndexMap::new(),
        });
        let function = heap.track_function(FunctionObj {
            name: Token::new(crate::token::TokenType::Identifier, "f", 1),
            params: Rc::from(vec![]),
            body: Rc::from(vec![]),
            nested: Vec::new(),
        });
        let closure = heap.track_closure(ClosureObj {
            function,
            env,
            is_initializer: false,
        });
        // the cycle: the environment holds a value that points back at the closure
        heap.environment_mut(env)
            .values
            .insert(Rc::from("self"), Value::Callable(Callable::Closure(closure)));
        heap.environment_mut(global).values.insert(
            Rc::from("f"),
            Value::Callable(Callable::Closure(closure)),
        );

        heap.collect(global);
        assert_eq!(heap.live_objects(), 4);
        // a second cycle over the same graph must not loop or double count
        heap.collect(global);
        assert_eq!(heap.live_objects(), 4);
    }
}
