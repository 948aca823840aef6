use super::{ModelFactory, NaiveFactory, SeasonalNaiveFactory};
use crate::{Error, Result};

use std::collections::BTreeMap;
use std::sync::Arc;

/// Model-type tag to factory mapping, fixed once the process has started.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ModelFactory>>,
}

impl ModelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NaiveFactory));
        registry.register(Arc::new(SeasonalNaiveFactory));
        registry
    }

    /// Add a backend, replacing any previous factory with the same tag.
    pub fn register(&mut self, factory: Arc<dyn ModelFactory>) -> &mut Self {
        self.factories.insert(factory.model_type(), factory);
        self
    }

    pub fn get(&self, model_type: &str) -> Result<Arc<dyn ModelFactory>> {
        self.factories
            .get(model_type)
            .cloned()
            .ok_or_else(|| {
                Error::UnknownModel(format!(
                    "'{}' (registered: {})",
                    model_type,
                    self.model_types().join(", ")
                ))
            })
    }

    pub fn contains(&self, model_type: &str) -> bool {
        self.factories.contains_key(model_type)
    }

    /// Registered tags in sorted order.
    pub fn model_types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("model_types", &self.model_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = ModelRegistry::with_builtin();
        assert_eq!(registry.model_types(), vec!["naive", "seasonal_naive"]);
        assert!(registry.contains("naive"));
        assert_eq!(registry.get("naive").unwrap().model_type(), "naive");
    }

    #[test]
    fn test_unknown_model_lists_registered() {
        let registry = ModelRegistry::with_builtin();
        let err = registry.get("lgbm").err().unwrap();
        assert!(matches!(err, Error::UnknownModel(_)));
        assert!(err.to_string().contains("seasonal_naive"));
    }
}
