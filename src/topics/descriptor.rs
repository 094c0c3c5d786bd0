/// Topic descriptors and their constructors
use super::validation::{validate_topic_name, validate_topic_pattern};
use crate::errors::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Who owns a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicScope {
    Framework,
    Module,
}

impl fmt::Display for TopicScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicScope::Framework => f.write_str("framework"),
            TopicScope::Module => f.write_str("module"),
        }
    }
}

/// Immutable, registered-once topic metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDescriptor {
    pub name: String,
    pub scope: TopicScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub description: String,
    /// Wildcard form of the names this descriptor also covers (`chat.room.*`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Input for `define_framework` / `define_module`
#[derive(Debug, Clone, Default)]
pub struct TopicConfig {
    pub name: String,
    pub module: Option<String>,
    pub description: String,
    pub pattern: Option<String>,
    pub example: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Build a framework-scope descriptor
pub fn define_framework(config: TopicConfig) -> Result<TopicDescriptor, RegistryError> {
    build(config, TopicScope::Framework)
}

/// Build a module-scope descriptor; the module name is mandatory
pub fn define_module(config: TopicConfig) -> Result<TopicDescriptor, RegistryError> {
    let has_module = config
        .module
        .as_deref()
        .map(|m| !m.trim().is_empty())
        .unwrap_or(false);
    if !has_module {
        return Err(RegistryError::invalid_name(
            config.name,
            "module topics require a module name",
        ));
    }
    build(config, TopicScope::Module)
}

fn build(config: TopicConfig, scope: TopicScope) -> Result<TopicDescriptor, RegistryError> {
    validate_topic_name(&config.name)?;
    if let Some(pattern) = config.pattern.as_deref() {
        validate_topic_pattern(pattern)?;
    }

    Ok(TopicDescriptor {
        name: config.name,
        scope,
        module: config.module.filter(|m| !m.trim().is_empty()),
        description: config.description,
        pattern: config.pattern,
        example: config.example,
        metadata: config.metadata,
    })
}

impl TopicDescriptor {
    pub fn is_framework(&self) -> bool {
        self.scope == TopicScope::Framework
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_module_requires_module() {
        let err = define_module(TopicConfig::new("chat.messages")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName { .. }));

        let err = define_module(TopicConfig::new("chat.messages").module("  ")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName { .. }));

        let topic = define_module(
            TopicConfig::new("chat.messages")
                .module("chat")
                .description("Room messages")
                .meta("retention", "none"),
        )
        .unwrap();
        assert_eq!(topic.scope, TopicScope::Module);
        assert_eq!(topic.module.as_deref(), Some("chat"));
        assert_eq!(topic.metadata.get("retention").map(String::as_str), Some("none"));
    }

    #[test]
    fn test_define_validates_name_and_pattern() {
        assert!(define_framework(TopicConfig::new("Ws.html")).is_err());
        assert!(define_framework(TopicConfig::new("chat.room").pattern("chat.room.**")).is_err());

        let topic = define_framework(TopicConfig::new("chat.room").pattern("chat.room.*")).unwrap();
        assert!(topic.is_framework());
        assert_eq!(topic.pattern.as_deref(), Some("chat.room.*"));
    }

    #[test]
    fn test_descriptor_serializes_scope_lowercase() {
        let topic = define_framework(TopicConfig::new("ws.html.broadcast")).unwrap();
        let json = serde_json::to_value(&topic).unwrap();
        assert_eq!(json["scope"], "framework");
        assert!(json.get("module").is_none());
    }
}
