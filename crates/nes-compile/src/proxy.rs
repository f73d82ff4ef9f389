//! The proxy-call registry: the FFI escape hatch spec.md §4.E describes as
//! "a direct call with no marshalling" to a statically known native
//! function. Both backends resolve `IrOp::ProxyCall` through the same
//! registry, keyed by function name.

use std::collections::HashMap;
use std::sync::Arc;

use nes_core::{EngineError, EngineResult, Value};

pub type ProxyFn = Arc<dyn Fn(&[Value]) -> EngineResult<Value> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProxyRegistry {
    functions: HashMap<String, ProxyFn>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, f: ProxyFn) {
        self.functions.insert(name.into(), f);
    }

    pub fn call(&self, name: &str, args: &[Value]) -> EngineResult<Value> {
        let f = self
            .functions
            .get(name)
            .ok_or_else(|| EngineError::CompilationFailure(format!("no proxy function registered for `{name}`")))?;
        f(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_function_is_callable_by_name() {
        let mut reg = ProxyRegistry::new();
        reg.register("abs_i64", Arc::new(|args: &[Value]| Ok(Value::Int64(args[0].as_i64().unwrap_or(0).abs()))));
        let out = reg.call("abs_i64", &[Value::Int64(-7)]).unwrap();
        assert_eq!(out, Value::Int64(7));
    }

    #[test]
    fn unregistered_function_fails() {
        let reg = ProxyRegistry::new();
        assert!(reg.call("missing", &[]).is_err());
    }
}
