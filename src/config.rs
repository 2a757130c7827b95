// SPDX-License-Identifier: Apache-2.0

//! Proxy configuration
//!
//! [`ProxyConfig`] is assembled through a builder and shared (`Arc`) by every
//! proxy created from it. Its scalar part can also be loaded from JSON as
//! [`ProxySettings`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::FrameworkError;
use crate::interceptor::connection::{ConnectionIdManager, GlobalConnectionIds, UuidConnectionIds};
use crate::interceptor::cursor::{CursorProxyFactory, InterceptingCursorFactory, RepeatableReadCursorFactory};
use crate::interceptor::pipeline::{ListenerFailurePolicy, ListenerPipeline, QueryListener};

/// Generated-keys handling
#[derive(Clone)]
pub struct GeneratedKeysConfig {
    /// Wraps generated-keys cursors; independent of the result cursor factory
    pub factory: Option<Arc<dyn CursorProxyFactory>>,
    pub auto_retrieve: bool,
    pub auto_close: bool,
    pub retrieve_for_batch_statement: bool,
    pub retrieve_for_batch_prepared_or_callable: bool,
}

impl Default for GeneratedKeysConfig {
    fn default() -> Self {
        Self {
            factory: None,
            auto_retrieve: false,
            auto_close: false,
            retrieve_for_batch_statement: false,
            retrieve_for_batch_prepared_or_callable: true,
        }
    }
}

impl fmt::Debug for GeneratedKeysConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKeysConfig")
            .field("factory", &self.factory.is_some())
            .field("auto_retrieve", &self.auto_retrieve)
            .field("auto_close", &self.auto_close)
            .field("retrieve_for_batch_statement", &self.retrieve_for_batch_statement)
            .field(
                "retrieve_for_batch_prepared_or_callable",
                &self.retrieve_for_batch_prepared_or_callable,
            )
            .finish()
    }
}

/// Everything a proxy needs besides its delegate
pub struct ProxyConfig {
    pub data_source_name: String,
    pub listeners: Arc<ListenerPipeline>,
    pub result_cursor_factory: Option<Arc<dyn CursorProxyFactory>>,
    pub generated_keys: GeneratedKeysConfig,
    pub connection_ids: Arc<dyn ConnectionIdManager>,
    pub failure_policy: ListenerFailurePolicy,
}

impl ProxyConfig {
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::default()
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfigBuilder::default().build()
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("data_source_name", &self.data_source_name)
            .field("listeners", &self.listeners)
            .field("result_cursor_factory", &self.result_cursor_factory.is_some())
            .field("generated_keys", &self.generated_keys)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

/// Builder for [`ProxyConfig`]
#[derive(Default)]
pub struct ProxyConfigBuilder {
    data_source_name: String,
    listeners: Option<Arc<ListenerPipeline>>,
    pending_listeners: Vec<Arc<dyn QueryListener>>,
    result_cursor_factory: Option<Arc<dyn CursorProxyFactory>>,
    intercept_result_cursors: bool,
    generated_keys: GeneratedKeysConfig,
    connection_ids: Option<Arc<dyn ConnectionIdManager>>,
    failure_policy: ListenerFailurePolicy,
}

impl ProxyConfigBuilder {
    pub fn data_source_name(mut self, name: impl Into<String>) -> Self {
        self.data_source_name = name.into();
        self
    }

    /// Registers a listener on the pipeline being built
    pub fn listener(mut self, listener: Arc<dyn QueryListener>) -> Self {
        self.pending_listeners.push(listener);
        self
    }

    /// Uses an existing pipeline instead of a fresh one
    pub fn listeners(mut self, pipeline: Arc<ListenerPipeline>) -> Self {
        self.listeners = Some(pipeline);
        self
    }

    pub fn result_cursor_factory(mut self, factory: Arc<dyn CursorProxyFactory>) -> Self {
        self.result_cursor_factory = Some(factory);
        self
    }

    pub fn generated_keys_factory(mut self, factory: Arc<dyn CursorProxyFactory>) -> Self {
        self.generated_keys.factory = Some(factory);
        self
    }

    pub fn auto_retrieve_generated_keys(mut self, enabled: bool) -> Self {
        self.generated_keys.auto_retrieve = enabled;
        self
    }

    pub fn auto_close_generated_keys(mut self, enabled: bool) -> Self {
        self.generated_keys.auto_close = enabled;
        self
    }

    pub fn retrieve_generated_keys_for_batch_statement(mut self, enabled: bool) -> Self {
        self.generated_keys.retrieve_for_batch_statement = enabled;
        self
    }

    pub fn retrieve_generated_keys_for_batch_prepared_or_callable(mut self, enabled: bool) -> Self {
        self.generated_keys.retrieve_for_batch_prepared_or_callable = enabled;
        self
    }

    pub fn connection_id_manager(mut self, manager: Arc<dyn ConnectionIdManager>) -> Self {
        self.connection_ids = Some(manager);
        self
    }

    pub fn listener_failure_policy(mut self, policy: ListenerFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Applies loaded settings on top of what was configured so far
    ///
    /// An empty data source name in the settings keeps the current one.
    pub fn settings(mut self, settings: &ProxySettings) -> Self {
        if !settings.data_source_name.is_empty() {
            self.data_source_name = settings.data_source_name.clone();
        }
        self.generated_keys.auto_retrieve = settings.auto_retrieve_generated_keys;
        self.generated_keys.auto_close = settings.auto_close_generated_keys;
        self.generated_keys.retrieve_for_batch_statement =
            settings.retrieve_generated_keys_for_batch_statement;
        self.generated_keys.retrieve_for_batch_prepared_or_callable =
            settings.retrieve_generated_keys_for_batch_prepared_or_callable;
        if settings.repeatable_read_generated_keys {
            self.generated_keys.factory = Some(Arc::new(RepeatableReadCursorFactory));
        }
        self.intercept_result_cursors = settings.intercept_result_cursors;
        if settings.connection_ids == ConnectionIdKind::Uuid {
            self.connection_ids = Some(Arc::new(UuidConnectionIds));
        }
        self.failure_policy = settings.listener_failure_policy;
        self
    }

    pub fn build(self) -> ProxyConfig {
        let listeners = self.listeners.unwrap_or_default();
        for listener in self.pending_listeners {
            listeners.add_listener(listener);
        }

        let result_cursor_factory = match self.result_cursor_factory {
            Some(factory) => Some(factory),
            None if self.intercept_result_cursors => Some(Arc::new(
                InterceptingCursorFactory::new(Arc::clone(&listeners)),
            ) as Arc<dyn CursorProxyFactory>),
            None => None,
        };

        let config = ProxyConfig {
            data_source_name: self.data_source_name,
            listeners,
            result_cursor_factory,
            generated_keys: self.generated_keys,
            connection_ids: self
                .connection_ids
                .unwrap_or_else(|| Arc::new(GlobalConnectionIds)),
            failure_policy: self.failure_policy,
        };
        debug!("Built proxy configuration: {:?}", config);
        config
    }
}

/// How connection identifiers are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionIdKind {
    /// Process-wide increasing counter
    #[default]
    Sequence,
    Uuid,
}

/// Serializable scalar part of the proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub data_source_name: String,
    #[serde(default)]
    pub auto_retrieve_generated_keys: bool,
    #[serde(default)]
    pub auto_close_generated_keys: bool,
    #[serde(default)]
    pub retrieve_generated_keys_for_batch_statement: bool,
    #[serde(default = "default_true")]
    pub retrieve_generated_keys_for_batch_prepared_or_callable: bool,
    /// Buffer generated keys so listeners can read them before the caller
    #[serde(default)]
    pub repeatable_read_generated_keys: bool,
    /// Fire method hooks for calls made on result cursors
    #[serde(default)]
    pub intercept_result_cursors: bool,
    #[serde(default)]
    pub connection_ids: ConnectionIdKind,
    #[serde(default)]
    pub listener_failure_policy: ListenerFailurePolicy,
}

fn default_true() -> bool {
    true
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            data_source_name: String::new(),
            auto_retrieve_generated_keys: false,
            auto_close_generated_keys: false,
            retrieve_generated_keys_for_batch_statement: false,
            retrieve_generated_keys_for_batch_prepared_or_callable: true,
            repeatable_read_generated_keys: false,
            intercept_result_cursors: false,
            connection_ids: ConnectionIdKind::Sequence,
            listener_failure_policy: ListenerFailurePolicy::Log,
        }
    }
}

impl ProxySettings {
    pub fn from_json(content: &str) -> Result<Self, FrameworkError> {
        serde_json::from_str(content)
            .map_err(|e| FrameworkError::invalid_settings(format!("Failed to parse settings: {}", e)))
    }

    /// Loads settings from a JSON file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, FrameworkError> {
        if !path.exists() {
            debug!("No proxy settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| FrameworkError::invalid_settings(format!("Failed to read settings: {}", e)))?;
        let settings = Self::from_json(&content)?;

        info!("Loaded proxy settings from {:?}", path);
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), FrameworkError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            FrameworkError::invalid_settings(format!("Failed to serialize settings: {}", e))
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FrameworkError::invalid_settings(format!("Failed to create settings dir: {}", e))
            })?;
        }
        std::fs::write(path, content)
            .map_err(|e| FrameworkError::invalid_settings(format!("Failed to write settings: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builder_defaults() {
        let config = ProxyConfig::builder().build();
        assert_eq!(config.data_source_name, "");
        assert!(config.result_cursor_factory.is_none());
        assert!(config.generated_keys.factory.is_none());
        assert!(!config.generated_keys.auto_retrieve);
        assert!(!config.generated_keys.auto_close);
        assert!(!config.generated_keys.retrieve_for_batch_statement);
        assert!(config.generated_keys.retrieve_for_batch_prepared_or_callable);
        assert_eq!(config.failure_policy, ListenerFailurePolicy::Log);
        assert!(config.listeners.is_empty());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = ProxySettings::from_json(
            r#"{"data_source_name": "orders", "auto_retrieve_generated_keys": true,
                "listener_failure_policy": "propagate", "connection_ids": "uuid"}"#,
        )
        .unwrap();

        assert_eq!(settings.data_source_name, "orders");
        assert!(settings.auto_retrieve_generated_keys);
        assert!(settings.retrieve_generated_keys_for_batch_prepared_or_callable);
        assert_eq!(settings.listener_failure_policy, ListenerFailurePolicy::Propagate);
        assert_eq!(settings.connection_ids, ConnectionIdKind::Uuid);
    }

    #[test]
    fn test_settings_without_name_keep_builder_name() {
        let settings = ProxySettings::from_json(r#"{"auto_close_generated_keys": true}"#).unwrap();
        let config = ProxyConfig::builder()
            .data_source_name("billing")
            .settings(&settings)
            .build();
        assert_eq!(config.data_source_name, "billing");
        assert!(config.generated_keys.auto_close);

        let named = ProxySettings::from_json(r#"{"data_source_name": "ledger"}"#).unwrap();
        let config = ProxyConfig::builder()
            .data_source_name("billing")
            .settings(&named)
            .build();
        assert_eq!(config.data_source_name, "ledger");
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let err = ProxySettings::from_json("{not json").unwrap_err();
        assert!(matches!(err, FrameworkError::InvalidSettings { .. }));
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert_eq!(ProxySettings::load(&missing).unwrap(), ProxySettings::default());

        let path = dir.path().join("proxy.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"auto_close_generated_keys": true}}"#).unwrap();
        drop(file);

        let settings = ProxySettings::load(&path).unwrap();
        assert!(settings.auto_close_generated_keys);
        assert!(!settings.auto_retrieve_generated_keys);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.json");
        let settings = ProxySettings {
            data_source_name: "billing".to_string(),
            repeatable_read_generated_keys: true,
            ..ProxySettings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(ProxySettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_settings_applied_to_builder() {
        let settings = ProxySettings {
            data_source_name: "orders".to_string(),
            auto_retrieve_generated_keys: true,
            repeatable_read_generated_keys: true,
            intercept_result_cursors: true,
            ..ProxySettings::default()
        };
        let config = ProxyConfig::builder().settings(&settings).build();

        assert_eq!(config.data_source_name, "orders");
        assert!(config.generated_keys.auto_retrieve);
        assert!(config.generated_keys.factory.is_some());
        assert!(config.result_cursor_factory.is_some());
    }
}
