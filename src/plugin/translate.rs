//! URL Translation
//!
//! Rewrites resource paths between the platform's northbound namespace and a
//! plugin's southbound namespace.

use crate::config::UrlTranslationConfig;
use std::collections::BTreeMap;

/// Bidirectional path rewriter built from the configured translation tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlTranslator {
    south_bound: BTreeMap<String, String>,
    north_bound: BTreeMap<String, String>,
}

impl UrlTranslator {
    pub fn new(config: &UrlTranslationConfig) -> Self {
        Self {
            south_bound: config.south_bound_url.clone(),
            north_bound: config.north_bound_url.clone(),
        }
    }

    /// Rewrite a northbound path into the plugin's namespace
    pub fn to_southbound(&self, path: &str) -> String {
        replace_all(path, &self.south_bound)
    }

    /// Rewrite a plugin response body into the platform's namespace
    pub fn to_northbound(&self, body: &str) -> String {
        replace_all(body, &self.north_bound)
    }
}

// Every table entry is applied in key order; an empty key is ignored.
fn replace_all(input: &str, table: &BTreeMap<String, String>) -> String {
    let mut output = input.to_string();
    for (from, to) in table {
        if from.is_empty() {
            continue;
        }
        output = output.replace(from.as_str(), to);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> UrlTranslator {
        let mut config = UrlTranslationConfig::default();
        config
            .south_bound_url
            .insert("redfish".to_string(), "ODIM".to_string());
        config
            .north_bound_url
            .insert("ODIM".to_string(), "redfish".to_string());
        UrlTranslator::new(&config)
    }

    #[test]
    fn test_round_trip_paths() {
        let t = translator();
        assert_eq!(t.to_southbound("/redfish/v1/Systems/1"), "/ODIM/v1/Systems/1");
        assert_eq!(
            t.to_northbound(r#"{"@odata.id":"/ODIM/v1/Systems/1"}"#),
            r#"{"@odata.id":"/redfish/v1/Systems/1"}"#
        );
    }

    #[test]
    fn test_empty_tables_are_identity() {
        let t = UrlTranslator::default();
        assert_eq!(t.to_southbound("/redfish/v1"), "/redfish/v1");
        assert_eq!(t.to_northbound("body"), "body");
    }
}
