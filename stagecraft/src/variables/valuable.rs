//! Lazily evaluated slot values.

use crate::context::PipelineContext;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A factory that reads the owning stage when it is bound.
pub type StageFactory = Arc<dyn Fn(&StageRef<'_>) -> Value + Send + Sync>;

/// A value, or a callable that produces one when the owning stage is bound.
///
/// Nothing is evaluated at declaration time; [`Valuable::resolve`] is only
/// called by the resolver once the stage instance is attached to a context.
#[derive(Clone)]
pub enum Valuable {
    /// A literal.
    Value(Value),
    /// A zero-argument factory.
    Lazy(Arc<dyn Fn() -> Value + Send + Sync>),
    /// A factory taking the owning stage.
    StageAware(StageFactory),
}

impl Valuable {
    /// Wraps a zero-argument factory.
    pub fn lazy<F>(factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self::Lazy(Arc::new(factory))
    }

    /// Wraps a factory that reads the owning stage.
    pub fn stage_aware<F>(factory: F) -> Self
    where
        F: Fn(&StageRef<'_>) -> Value + Send + Sync + 'static,
    {
        Self::StageAware(Arc::new(factory))
    }

    /// Returns true if resolving runs caller code.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        !matches!(self, Self::Value(_))
    }

    /// Produces the concrete value for the given bound stage.
    #[must_use]
    pub fn resolve(&self, stage: &StageRef<'_>) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Lazy(factory) => factory(),
            Self::StageAware(factory) => factory(stage),
        }
    }
}

impl fmt::Debug for Valuable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Lazy(_) => f.write_str("Lazy(<fn>)"),
            Self::StageAware(_) => f.write_str("StageAware(<fn>)"),
        }
    }
}

impl From<Value> for Valuable {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Valuable {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Valuable {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<bool> for Valuable {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<i64> for Valuable {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<f64> for Valuable {
    fn from(value: f64) -> Self {
        Self::Value(Value::from(value))
    }
}

/// A read-only view of a stage while its slots are being bound.
///
/// Exposes the stage's own attributes and the slots bound so far, in
/// declaration order.
pub struct StageRef<'a> {
    name: &'a str,
    description: Option<&'a str>,
    params: &'a HashMap<String, Value>,
    bound: &'a HashMap<String, Value>,
    context: &'a PipelineContext,
}

impl<'a> StageRef<'a> {
    pub(crate) fn new(
        name: &'a str,
        description: Option<&'a str>,
        params: &'a HashMap<String, Value>,
        bound: &'a HashMap<String, Value>,
        context: &'a PipelineContext,
    ) -> Self {
        Self {
            name,
            description,
            params,
            bound,
            context,
        }
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Returns the stage description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description
    }

    /// Gets a stage parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Gets a sibling slot value bound earlier in declaration order.
    #[must_use]
    pub fn get(&self, variable: &str) -> Option<&Value> {
        self.bound.get(variable)
    }

    /// Gets a configuration value from the context.
    #[must_use]
    pub fn config(&self, key: &str) -> Option<&Value> {
        self.context.config(key)
    }
}

impl fmt::Debug for StageRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRef")
            .field("name", &self.name)
            .field("bound", &self.bound.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_literal_resolves_to_itself() {
        let ctx = PipelineContext::new();
        let params = HashMap::new();
        let bound = HashMap::new();
        let view = StageRef::new("s", None, &params, &bound, &ctx);

        let valuable = Valuable::from(json!({"a": 1}));
        assert!(!valuable.is_deferred());
        assert_eq!(valuable.resolve(&view), json!({"a": 1}));
    }

    #[test]
    fn test_factories_run_only_on_resolve() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let valuable = Valuable::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            json!(7)
        });
        assert!(valuable.is_deferred());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let ctx = PipelineContext::new();
        let params = HashMap::new();
        let bound = HashMap::new();
        let view = StageRef::new("s", None, &params, &bound, &ctx);
        assert_eq!(valuable.resolve(&view), json!(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stage_aware_factory_reads_stage() {
        let ctx = PipelineContext::new().with_config([("root", json!("/data"))]);
        let mut params = HashMap::new();
        params.insert("ext".to_string(), json!("json"));
        let mut bound = HashMap::new();
        bound.insert("prefix".to_string(), json!("sales"));
        let view = StageRef::new("load", Some("Loads sales"), &params, &bound, &ctx);

        let valuable = Valuable::stage_aware(|stage| {
            json!(format!(
                "{}/{}_{}.{}",
                stage.config("root").and_then(Value::as_str).unwrap_or("."),
                stage.get("prefix").and_then(Value::as_str).unwrap_or(""),
                stage.name(),
                stage.param("ext").and_then(Value::as_str).unwrap_or("txt"),
            ))
        });

        assert_eq!(valuable.resolve(&view), json!("/data/sales_load.json"));
        assert_eq!(view.description(), Some("Loads sales"));
    }
}
