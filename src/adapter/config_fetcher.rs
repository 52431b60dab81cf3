//! Runtime configuration lookup
//!
//! The adapter's configuration lives in a platform collection, one row per
//! adapter keyed by `adapter_name`. A missing row is not an error: the adapter
//! runs with defaults derived from its device name.

use crate::platform::{Row, Session};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, Instrument};

/// Column holding the adapter's lookup name
pub const ADAPTER_NAME_FIELD: &str = "adapter_name";
pub const TOPIC_ROOT_FIELD: &str = "topic_root";
pub const ADAPTER_SETTINGS_FIELD: &str = "adapter_settings";

/// Per-adapter configuration, read-only once fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Namespace prefix for the topics this adapter uses
    pub topic_root: String,
    /// Opaque adapter-specific settings, usually a JSON document
    pub adapter_settings: String,
}

impl AdapterConfig {
    /// Defaults used when no configuration row exists
    pub fn defaults(device_name: &str) -> Self {
        Self {
            topic_root: device_name.to_string(),
            adapter_settings: String::new(),
        }
    }

    /// Build a config from query results (pure function)
    ///
    /// Only the first row counts. Absent, null or empty fields keep their
    /// defaults; a non-string `adapter_settings` value is kept as its JSON text.
    pub fn from_rows(rows: &[Row], device_name: &str) -> Self {
        let mut config = Self::defaults(device_name);
        let Some(row) = rows.first() else {
            return config;
        };

        if let Some(topic_root) = field_text(row, TOPIC_ROOT_FIELD) {
            config.topic_root = topic_root;
        }
        if let Some(settings) = field_text(row, ADAPTER_SETTINGS_FIELD) {
            config.adapter_settings = settings;
        }
        config
    }
}

fn field_text(row: &Row, field: &str) -> Option<String> {
    let text = match row.get(field)? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Fetches this adapter's [`AdapterConfig`], retrying failed queries forever
#[derive(Debug, Clone)]
pub struct ConfigFetcher {
    collection: String,
    retry_delay: Duration,
}

impl ConfigFetcher {
    pub fn new(collection: impl Into<String>, retry_delay: Duration) -> Self {
        Self {
            collection: collection.into(),
            retry_delay,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Fetch the configuration row for `lookup_name`
    ///
    /// Never fails: query errors are logged and retried after the fixed delay
    /// until the platform answers.
    pub async fn fetch<S: Session>(
        &self,
        session: &S,
        lookup_name: &str,
        device_name: &str,
    ) -> AdapterConfig {
        let span = crate::adapter_span!(stage = "fetch_config", collection = %self.collection);
        async {
            info!("Retrieving adapter config");
            loop {
                debug!(
                    "Fetching config row with {}: {}",
                    ADAPTER_NAME_FIELD, lookup_name
                );
                match session
                    .query_by_field(&self.collection, ADAPTER_NAME_FIELD, lookup_name)
                    .await
                {
                    Ok(rows) => {
                        if rows.is_empty() {
                            info!("No adapter config rows returned, using defaults");
                        } else {
                            info!("Adapter config retrieved");
                        }
                        let config = AdapterConfig::from_rows(&rows, device_name);
                        debug!("Topic root set to {}", config.topic_root);
                        return config;
                    }
                    Err(e) => {
                        error!(
                            "Error retrieving adapter configuration: {}. Retrying in {:?}",
                            e, self.retry_delay
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockSession;
    use proptest::prelude::*;
    use serde_json::json;
    use tokio::time::Instant;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_zero_rows_yield_defaults() {
        let config = AdapterConfig::from_rows(&[], "pump-7");
        assert_eq!(config.topic_root, "pump-7");
        assert_eq!(config.adapter_settings, "");
    }

    #[test]
    fn test_topic_root_without_settings() {
        let rows = vec![row(json!({"adapter_name": "pump-7", "topic_root": "foo"}))];
        let config = AdapterConfig::from_rows(&rows, "pump-7");
        assert_eq!(
            config,
            AdapterConfig {
                topic_root: "foo".to_string(),
                adapter_settings: String::new(),
            }
        );
    }

    #[test]
    fn test_empty_and_null_fields_keep_defaults() {
        let rows = vec![row(json!({"topic_root": "", "adapter_settings": null}))];
        assert_eq!(
            AdapterConfig::from_rows(&rows, "pump-7"),
            AdapterConfig::defaults("pump-7")
        );
    }

    #[test]
    fn test_structured_settings_kept_as_json_text() {
        let rows = vec![row(json!({"adapter_settings": {"interval": 5}}))];
        let config = AdapterConfig::from_rows(&rows, "pump-7");
        assert_eq!(config.adapter_settings, r#"{"interval":5}"#);
    }

    #[test]
    fn test_only_first_row_is_used() {
        let rows = vec![
            row(json!({"topic_root": "first"})),
            row(json!({"topic_root": "second"})),
        ];
        assert_eq!(AdapterConfig::from_rows(&rows, "pump-7").topic_root, "first");
    }

    proptest! {
        #[test]
        fn prop_topic_root_never_empty(
            device in "[a-z][a-z0-9-]{0,15}",
            topic_root in proptest::option::of("[a-z/]{0,12}"),
            settings in proptest::option::of(".{0,20}"),
        ) {
            let mut value = serde_json::Map::new();
            if let Some(t) = &topic_root {
                value.insert(TOPIC_ROOT_FIELD.to_string(), json!(t));
            }
            if let Some(s) = &settings {
                value.insert(ADAPTER_SETTINGS_FIELD.to_string(), json!(s));
            }

            let config = AdapterConfig::from_rows(&[value], &device);

            prop_assert!(!config.topic_root.is_empty());
            match topic_root.as_deref() {
                Some(t) if !t.is_empty() => prop_assert_eq!(&config.topic_root, t),
                _ => prop_assert_eq!(&config.topic_root, &device),
            }
            prop_assert_eq!(config.adapter_settings, settings.unwrap_or_default());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_retries_every_thirty_seconds() {
        // Arrange
        let session = MockSession::new();
        session.fail_queries_times(2);
        session.set_query_rows(vec![row(json!({"topic_root": "site/pumps"}))]);
        let fetcher = ConfigFetcher::new("adapter_config", Duration::from_secs(30));
        let start = Instant::now();

        // Act
        let config = fetcher.fetch(&session, "pump-7", "pump-7").await;

        // Assert
        assert_eq!(config.topic_root, "site/pumps");
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(session.query_attempts(), 3);
    }

    #[tokio::test]
    async fn test_fetch_queries_by_lookup_name() {
        let session = MockSession::new();
        let fetcher = ConfigFetcher::new("adapter_config", Duration::from_secs(30));

        let config = fetcher.fetch(&session, "svc-pumps", "pump-7").await;

        assert_eq!(config, AdapterConfig::defaults("pump-7"));
        assert_eq!(
            session.queries(),
            vec![(
                "adapter_config".to_string(),
                ADAPTER_NAME_FIELD.to_string(),
                "svc-pumps".to_string()
            )]
        );
    }
}
