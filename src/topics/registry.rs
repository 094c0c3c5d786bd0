/// Process-wide topic catalog
///
/// Writes happen at boot; reads take a cheap `Arc` snapshot of the map, so the
/// fan-out path never holds the lock while it works.
use super::canonical::framework_descriptors;
use super::descriptor::{TopicDescriptor, TopicScope};
use super::validation::{matches_pattern, validate_topic_name, validate_topic_pattern};
use crate::errors::RegistryError;
use crate::logger::{self, LogTag};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Module name used for frames that come from browser clients
pub const CLIENT_MODULE: &str = "client";

/// What a caller wants to do with a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRole {
    Publish,
    Subscribe,
}

impl fmt::Display for TopicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicRole::Publish => f.write_str("publish"),
            TopicRole::Subscribe => f.write_str("subscribe"),
        }
    }
}

/// Authorization hook consulted by `validate_topic_access`
pub trait AccessPolicy: Send + Sync {
    fn check(
        &self,
        topic: &TopicDescriptor,
        module: &str,
        role: TopicRole,
    ) -> Result<(), RegistryError>;
}

/// Allows everything except clients publishing on framework topics
#[derive(Debug, Default)]
pub struct DefaultAccessPolicy;

impl AccessPolicy for DefaultAccessPolicy {
    fn check(
        &self,
        topic: &TopicDescriptor,
        module: &str,
        role: TopicRole,
    ) -> Result<(), RegistryError> {
        if role == TopicRole::Publish && module == CLIENT_MODULE && topic.is_framework() {
            return Err(RegistryError::AccessDenied {
                name: topic.name.clone(),
                module: module.to_string(),
                role: role.to_string(),
                reason: "framework topics are server-only".to_string(),
            });
        }
        Ok(())
    }
}

type TopicMap = HashMap<String, TopicDescriptor>;

pub struct TopicRegistry {
    topics: RwLock<Arc<TopicMap>>,
    policy: RwLock<Arc<dyn AccessPolicy>>,
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topics", &self.snapshot().len())
            .finish()
    }
}

static GLOBAL_REGISTRY: OnceCell<Arc<TopicRegistry>> = OnceCell::new();

/// Initialize (once) and return the process-wide registry
pub fn init_global() -> Result<Arc<TopicRegistry>, RegistryError> {
    GLOBAL_REGISTRY
        .get_or_try_init(|| TopicRegistry::with_framework_topics().map(Arc::new))
        .cloned()
}

/// The process-wide registry, if `init_global` ran
pub fn global() -> Option<Arc<TopicRegistry>> {
    GLOBAL_REGISTRY.get().cloned()
}

impl TopicRegistry {
    /// Empty registry with the default access policy
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(Arc::new(HashMap::new())),
            policy: RwLock::new(Arc::new(DefaultAccessPolicy)),
        }
    }

    /// Registry pre-loaded with the canonical framework topics
    pub fn with_framework_topics() -> Result<Self, RegistryError> {
        let registry = Self::new();
        for descriptor in framework_descriptors()? {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    pub fn set_access_policy(&self, policy: Arc<dyn AccessPolicy>) {
        *self.policy.write() = policy;
    }

    /// Insert a descriptor; a second registration of the same name fails
    pub fn register(&self, descriptor: TopicDescriptor) -> Result<(), RegistryError> {
        validate_topic_name(&descriptor.name)?;
        if let Some(pattern) = descriptor.pattern.as_deref() {
            validate_topic_pattern(pattern)?;
        }

        let mut guard = self.topics.write();
        if guard.contains_key(&descriptor.name) {
            return Err(RegistryError::AlreadyRegistered {
                name: descriptor.name,
            });
        }

        let mut next = TopicMap::clone(&guard);
        logger::debug(
            LogTag::Registry,
            &format!(
                "Registered {} topic {} (module: {})",
                descriptor.scope,
                descriptor.name,
                descriptor.module.as_deref().unwrap_or("-")
            ),
        );
        next.insert(descriptor.name.clone(), descriptor);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Current read-only view of all descriptors
    pub fn snapshot(&self) -> Arc<TopicMap> {
        self.topics.read().clone()
    }

    pub fn get(&self, name: &str) -> Result<TopicDescriptor, RegistryError> {
        self.snapshot()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered {
                name: name.to_string(),
            })
    }

    /// All descriptors sorted by name
    pub fn list(&self) -> Vec<TopicDescriptor> {
        self.collect_sorted(|_| true)
    }

    pub fn list_by_module(&self, module: &str) -> Vec<TopicDescriptor> {
        self.collect_sorted(|t| t.module.as_deref() == Some(module))
    }

    pub fn list_by_scope(&self, scope: TopicScope) -> Vec<TopicDescriptor> {
        self.collect_sorted(|t| t.scope == scope)
    }

    /// Registered descriptors whose names match a wildcard pattern
    pub fn find_topics(&self, pattern: &str) -> Result<Vec<TopicDescriptor>, RegistryError> {
        validate_topic_pattern(pattern)?;
        Ok(self.collect_sorted(|t| matches_pattern(pattern, &t.name)))
    }

    /// Exact registration, or a registered pattern covering `name`
    pub fn check_topic_exists(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Name check plus authorization hook
    pub fn validate_topic_access(
        &self,
        name: &str,
        module: &str,
        role: TopicRole,
    ) -> Result<(), RegistryError> {
        validate_topic_name(name)?;
        let descriptor = self
            .resolve(name)
            .ok_or_else(|| RegistryError::NotRegistered {
                name: name.to_string(),
            })?;
        let policy = self.policy.read().clone();
        policy.check(&descriptor, module, role)
    }

    fn resolve(&self, name: &str) -> Option<TopicDescriptor> {
        let topics = self.snapshot();
        if let Some(found) = topics.get(name) {
            return Some(found.clone());
        }
        topics
            .values()
            .find(|t| {
                t.pattern
                    .as_deref()
                    .map(|p| matches_pattern(p, name))
                    .unwrap_or(false)
            })
            .cloned()
    }

    fn collect_sorted<F>(&self, filter: F) -> Vec<TopicDescriptor>
    where
        F: Fn(&TopicDescriptor) -> bool,
    {
        let mut found: Vec<TopicDescriptor> = self
            .snapshot()
            .values()
            .filter(|t| filter(t))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::canonical::*;
    use crate::topics::descriptor::{define_framework, define_module, TopicConfig};

    fn chat_registry() -> TopicRegistry {
        let registry = TopicRegistry::with_framework_topics().unwrap();
        registry
            .register(define_module(TopicConfig::new("chat.messages").module("chat")).unwrap())
            .unwrap();
        registry
            .register(
                define_module(
                    TopicConfig::new("chat.room")
                        .module("chat")
                        .pattern("chat.room.*"),
                )
                .unwrap(),
            )
            .unwrap();
        registry
            .register(define_module(TopicConfig::new("files.uploaded").module("files")).unwrap())
            .unwrap();
        registry
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = TopicRegistry::new();
        let topic = define_framework(TopicConfig::new("ws.html.broadcast")).unwrap();
        registry.register(topic.clone()).unwrap();
        let err = registry.register(topic).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyRegistered {
                name: "ws.html.broadcast".into()
            }
        );
    }

    #[test]
    fn test_get_and_list_queries() {
        let registry = chat_registry();
        assert_eq!(registry.get("chat.messages").unwrap().module.as_deref(), Some("chat"));
        assert!(matches!(
            registry.get("chat.nope"),
            Err(RegistryError::NotRegistered { .. })
        ));

        let chat: Vec<String> = registry
            .list_by_module("chat")
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(chat, vec!["chat.messages", "chat.room"]);

        assert_eq!(registry.list_by_scope(TopicScope::Framework).len(), 13);
        assert_eq!(registry.list_by_scope(TopicScope::Module).len(), 3);
        assert_eq!(registry.list().len(), 16);
    }

    #[test]
    fn test_find_and_exists_with_patterns() {
        let registry = chat_registry();
        let found: Vec<String> = registry
            .find_topics("ws.*.broadcast")
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(found, vec![WS_DATA_BROADCAST, WS_HTML_BROADCAST]);

        assert_eq!(registry.find_topics("presence.#").unwrap().len(), 3);

        assert!(registry.check_topic_exists("chat.messages"));
        assert!(registry.check_topic_exists("chat.room.lobby"));
        assert!(!registry.check_topic_exists("chat.room.lobby.typing"));
        assert!(!registry.check_topic_exists("chat.other"));
    }

    #[test]
    fn test_default_access_policy() {
        let registry = chat_registry();
        assert!(registry
            .validate_topic_access("chat.messages", CLIENT_MODULE, TopicRole::Publish)
            .is_ok());
        assert!(matches!(
            registry.validate_topic_access(WS_HTML_BROADCAST, CLIENT_MODULE, TopicRole::Publish),
            Err(RegistryError::AccessDenied { .. })
        ));
        assert!(registry
            .validate_topic_access(WS_HTML_BROADCAST, "chat", TopicRole::Publish)
            .is_ok());
        assert!(matches!(
            registry.validate_topic_access("chat.other", CLIENT_MODULE, TopicRole::Publish),
            Err(RegistryError::NotRegistered { .. })
        ));
        assert!(matches!(
            registry.validate_topic_access("Chat", CLIENT_MODULE, TopicRole::Publish),
            Err(RegistryError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_custom_access_policy() {
        struct ModuleOwnsTopics;
        impl AccessPolicy for ModuleOwnsTopics {
            fn check(
                &self,
                topic: &TopicDescriptor,
                module: &str,
                role: TopicRole,
            ) -> Result<(), RegistryError> {
                match topic.module.as_deref() {
                    Some(owner) if owner != module && role == TopicRole::Publish => {
                        Err(RegistryError::AccessDenied {
                            name: topic.name.clone(),
                            module: module.to_string(),
                            role: role.to_string(),
                            reason: format!("owned by {}", owner),
                        })
                    }
                    _ => Ok(()),
                }
            }
        }

        let registry = chat_registry();
        registry.set_access_policy(Arc::new(ModuleOwnsTopics));
        assert!(registry
            .validate_topic_access("files.uploaded", "chat", TopicRole::Publish)
            .is_err());
        assert!(registry
            .validate_topic_access("files.uploaded", "chat", TopicRole::Subscribe)
            .is_ok());
    }

    #[test]
    fn test_snapshot_is_stable_across_writes() {
        let registry = TopicRegistry::new();
        let before = registry.snapshot();
        registry
            .register(define_framework(TopicConfig::new("a.b")).unwrap())
            .unwrap();
        assert!(before.is_empty());
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_global_registry_initializes_once() {
        let first = init_global().unwrap();
        let second = init_global().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(global().is_some());
    }
}
