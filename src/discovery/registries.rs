//! Registry Discovery
//!
//! Fetches the message registry files a plugin publishes that are neither
//! shipped with the service nor already stored.

use crate::discovery::crawler::{DiscoveredResource, GraphCrawler};
use crate::discovery::links::member_links;
use crate::discovery::progress;
use crate::error::Result;
use crate::store::tables;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Root collection of message registries
pub const REGISTRIES_COLLECTION: &str = "/redfish/v1/Registries";

/// Names of the standard registry files shipped in `dir`
pub async fn standard_registry_files(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Registry store is not readable");
            return names;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names
}

/// Registry name and English file URI of a registry file-info document.
///
/// `None` when there is nothing to fetch.
pub fn registry_location(file_info: &Value) -> Option<(String, Option<String>)> {
    let registry = file_info.get("Registry")?.as_str()?;
    // '#'-prefixed names break routing, fall back to the Id
    let name = if registry.starts_with('#') {
        file_info.get("Id")?.as_str()?
    } else {
        registry
    };

    let uri = file_info
        .get("Location")
        .and_then(Value::as_array)
        .and_then(|locations| {
            locations
                .iter()
                .find(|l| l.get("Language").and_then(Value::as_str) == Some("en"))
        })
        .and_then(|location| location.get("Uri"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((name.to_string(), uri))
}

impl GraphCrawler {
    /// Discover registry files missing from `store_dir` and the store
    pub async fn discover_registries(&self, store_dir: &Path, budget: u32) -> u32 {
        let standard_files = standard_registry_files(store_dir).await;
        let collection = match self.fetch_json(REGISTRIES_COLLECTION).await {
            Ok(collection) => collection,
            Err(e) => {
                warn!(error = %e, "Registries collection unavailable");
                return budget;
            }
        };
        let members = member_links(&collection);
        let share = progress::divide(budget, members.len());

        let mut fetched = 0usize;
        for member in &members {
            match self.discover_registry(member, &standard_files).await {
                Ok(true) => fetched += 1,
                Ok(false) => {}
                Err(e) => debug!(registry = %member, error = %e, "Registry file skipped"),
            }
        }
        info!(fetched, total = members.len(), "Registry discovery complete");
        if members.is_empty() {
            budget
        } else {
            share * members.len() as u32
        }
    }

    async fn discover_registry(&self, member: &str, standard_files: &[String]) -> Result<bool> {
        let file_info = self.fetch_json(member).await?;
        let Some((name, uri)) = registry_location(&file_info) else {
            return Ok(false);
        };
        let file_name = format!("{}.json", name);
        if standard_files.iter().any(|f| f.contains(&file_name))
            || self.store().exists(tables::REGISTRIES, &file_name).await?
        {
            return Ok(false);
        }
        let Some(uri) = uri else {
            return Ok(false);
        };

        let reply = self.session().get(&uri).await?;
        self.insert_resource(DiscoveredResource {
            table: tables::REGISTRIES.to_string(),
            key: file_name,
            path: uri,
            body: reply.body,
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::crawler::CrawlerConfig;
    use crate::domain::ports::{PluginResponse, ResourceStore};
    use crate::store::MemoryStore;
    use crate::testing::{basic_session, ScriptedTransport};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_registry_location() {
        let info = json!({
            "Id": "HpeBiosMessageRegistry",
            "Registry": "#HpeBios.v1",
            "Location": [
                {"Language": "ja", "Uri": "/ja"},
                {"Language": "en", "Uri": "/redfish/v1/registrystore/en/HpeBios.json"}
            ]
        });
        assert_eq!(
            registry_location(&info),
            Some((
                "HpeBiosMessageRegistry".to_string(),
                Some("/redfish/v1/registrystore/en/HpeBios.json".to_string())
            ))
        );

        let map_uri = json!({"Registry": "Base.1.0", "Location": [{"Language": "en", "Uri": {"x": 1}}]});
        assert_eq!(registry_location(&map_uri), Some(("Base.1.0".to_string(), None)));
        assert_eq!(registry_location(&json!({"Id": "x"})), None);
    }

    #[tokio::test]
    async fn test_discover_skips_shipped_and_stored_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Base.1.0.json"), b"{}").unwrap();

        let transport = ScriptedTransport::new();
        transport.respond(
            REGISTRIES_COLLECTION,
            PluginResponse::json(
                200,
                &json!({"Members": [
                    {"@odata.id": "/redfish/v1/Registries/Base"},
                    {"@odata.id": "/redfish/v1/Registries/Stored"},
                    {"@odata.id": "/redfish/v1/Registries/Vendor"}
                ]}),
            ),
        );
        for (member, registry) in [("Base", "Base.1.0"), ("Stored", "Stored.1.0"), ("Vendor", "Vendor.2.1")] {
            transport.respond(
                &format!("/redfish/v1/Registries/{}", member),
                PluginResponse::json(
                    200,
                    &json!({
                        "Registry": registry,
                        "Location": [{"Language": "en", "Uri": format!("/registrystore/{}.json", registry)}]
                    }),
                ),
            );
        }
        transport.respond(
            "/registrystore/Vendor.2.1.json",
            PluginResponse::json(200, &json!({"Id": "Vendor.2.1"})),
        );

        let store = Arc::new(MemoryStore::new());
        store.save(tables::REGISTRIES, "Stored.1.0.json", b"{}").await.unwrap();
        let crawler = GraphCrawler::new(
            basic_session(transport.clone()).await,
            store.clone(),
            "d1",
            CrawlerConfig::default(),
        );

        let progress = crawler.discover_registries(dir.path(), 10).await;
        assert_eq!(progress, 9);
        assert_eq!(transport.calls("/registrystore/Base.1.0.json"), 0);
        assert_eq!(transport.calls("/registrystore/Stored.1.0.json"), 0);

        crawler.persist_inventory().await.unwrap();
        assert!(store.exists(tables::REGISTRIES, "Vendor.2.1.json").await.unwrap());
    }
}
