use std::collections::HashMap;
use std::sync::Arc;
use taskcore::TaskRunner;

/// Registry of available task runners, keyed by name
pub struct TaskRegistry {
    runners: HashMap<String, Arc<dyn TaskRunner>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    /// Build a registry from an ordered list. Later runners replace earlier
    /// ones with the same name.
    pub fn from_runners(runners: impl IntoIterator<Item = Arc<dyn TaskRunner>>) -> Self {
        let mut registry = Self::new();
        for runner in runners {
            registry.register(runner);
        }
        registry
    }

    /// Register a task runner, returning the one it replaced, if any.
    pub fn register(&mut self, runner: Arc<dyn TaskRunner>) -> Option<Arc<dyn TaskRunner>> {
        let name = runner.name().to_string();
        tracing::info!("Registering task runner: {}", name);
        let replaced = self.runners.insert(name.clone(), runner);
        if replaced.is_some() {
            tracing::warn!("Task runner '{}' registered twice, last registration wins", name);
        }
        replaced
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskRunner>> {
        self.runners.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.runners.contains_key(name)
    }

    /// Registered names, sorted
    pub fn list_task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runners.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
