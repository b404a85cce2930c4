//! Lookup of piloting backends by implementation name.

use super::{PilotingBackend, WowzaBackend};
use crate::model::Broadcaster;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Builds a backend bound to one broadcaster.
pub type BackendFactory = Arc<dyn Fn(&Broadcaster) -> Box<dyn PilotingBackend> + Send + Sync>;

/// Lower-case, trimmed implementation key.
pub fn normalize_implementation(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("implementations", &self.implementations())
            .finish()
    }
}

impl BackendRegistry {
    /// An empty registry: every broadcaster resolves to unavailable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every bundled vendor.
    ///
    /// Recorders are told to write into `drop_dir`.
    pub fn with_defaults(client: reqwest::Client, drop_dir: &Path) -> Self {
        let mut registry = Self::new();
        let output_path = drop_dir.to_string_lossy().into_owned();
        registry.register(
            WowzaBackend::IMPLEMENTATION,
            Arc::new(move |broadcaster: &Broadcaster| {
                Box::new(WowzaBackend::new(
                    broadcaster.clone(),
                    client.clone(),
                    output_path.clone(),
                )) as Box<dyn PilotingBackend>
            }),
        );
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register(&mut self, name: &str, factory: BackendFactory) {
        self.factories.insert(normalize_implementation(name), factory);
    }

    /// Registered names, sorted.
    pub fn implementations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn resolve(&self, broadcaster: &Broadcaster) -> Option<Box<dyn PilotingBackend>> {
        let Some(name) = broadcaster
            .piloting_implementation
            .as_deref()
            .map(normalize_implementation)
            .filter(|n| !n.is_empty())
        else {
            info!(broadcaster = %broadcaster.name, "no piloting implementation set");
            return None;
        };

        match self.factories.get(&name) {
            Some(factory) => Some(factory(broadcaster)),
            None => {
                warn!(
                    broadcaster = %broadcaster.name,
                    implementation = %name,
                    known = ?self.implementations(),
                    "unknown piloting implementation"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piloting::http_client;
    use std::time::Duration;

    fn registry() -> BackendRegistry {
        BackendRegistry::with_defaults(
            http_client(Duration::from_secs(1)).unwrap(),
            Path::new("/data/live"),
        )
    }

    #[test]
    fn test_normalize_implementation() {
        assert_eq!(normalize_implementation("  Wowza "), "wowza");
        assert_eq!(normalize_implementation("WOWZA"), "wowza");
    }

    #[test]
    fn test_defaults_register_wowza() {
        assert_eq!(registry().implementations(), vec!["wowza".to_string()]);
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = registry();
        for name in ["Wowza", "wowza", " WOWZA "] {
            let broadcaster = Broadcaster::new(1, "Amphi").with_piloting(name, "{}");
            let backend = registry.resolve(&broadcaster).unwrap();
            assert_eq!(backend.implementation(), "wowza");
        }
    }

    #[test]
    fn test_unset_or_unknown_is_unavailable() {
        let registry = registry();
        assert!(registry.resolve(&Broadcaster::new(1, "Amphi")).is_none());
        assert!(registry
            .resolve(&Broadcaster::new(1, "Amphi").with_piloting("  ", "{}"))
            .is_none());
        assert!(registry
            .resolve(&Broadcaster::new(1, "Amphi").with_piloting("SMP", "{}"))
            .is_none());
    }

    #[test]
    fn test_empty_registry_resolves_nothing() {
        let broadcaster = Broadcaster::new(1, "Amphi").with_piloting("Wowza", "{}");
        assert!(BackendRegistry::new().resolve(&broadcaster).is_none());
    }
}
