//! Resource Registry - the catalog of classes to collect
//!
//! The default catalog is embedded at compile time from
//! `src/resources/catalog.json`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Embedded catalog (compiled into the binary)
const CATALOG_FILE: &str = include_str!("../resources/catalog.json");

/// Class selector meaning "use the whole catalog"
pub const ALL_CLASSES: &str = "all";

/// One class query to run against the controller
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceDescriptor {
    /// Managed-object class, e.g. `fvTenant`
    pub class: String,
    /// Name used for archive entries; defaults to the class
    #[serde(default)]
    pub prefix: Option<String>,
    /// Query string parameters, sent in key order
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

impl ResourceDescriptor {
    pub fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
            prefix: None,
            query: BTreeMap::new(),
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    /// Name this resource is stored under
    pub fn alias(&self) -> &str {
        self.prefix.as_deref().unwrap_or(&self.class)
    }

    /// Archive entry for an unpaginated result
    pub fn file_name(&self) -> String {
        format!("{}.json", self.alias())
    }

    /// Archive entry for one page of a paginated result
    pub fn page_file_name(&self, page: u64) -> String {
        format!("{}-{}.json", self.alias(), page)
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Root structure of resources/catalog.json
#[derive(Debug, Deserialize)]
struct CatalogFile {
    resources: Vec<ResourceDescriptor>,
}

static CATALOG: OnceLock<Vec<ResourceDescriptor>> = OnceLock::new();

/// Get the embedded catalog (parsed on first access)
pub fn get_catalog() -> &'static [ResourceDescriptor] {
    CATALOG.get_or_init(|| {
        let parsed: CatalogFile = serde_json::from_str(CATALOG_FILE)
            .unwrap_or_else(|e| panic!("Failed to parse embedded catalog JSON: {}", e));
        parsed.resources
    })
}

/// Get a catalog entry by class
pub fn get_resource(class: &str) -> Option<&'static ResourceDescriptor> {
    get_catalog().iter().find(|r| r.class == class)
}

/// Catalog for a run: the whole thing, or one class when overridden
pub fn resolve_catalog(class: &str, query: &BTreeMap<String, String>) -> Vec<ResourceDescriptor> {
    if class.is_empty() || class == ALL_CLASSES {
        return get_catalog().to_vec();
    }

    vec![ResourceDescriptor {
        class: class.to_string(),
        prefix: None,
        query: query.clone(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_loads_successfully() {
        let catalog = get_catalog();
        assert!(!catalog.is_empty(), "Catalog should have resources");
    }

    #[test]
    fn test_catalog_entry_with_query() {
        let health = get_resource("healthInst").expect("healthInst should be in the catalog");
        assert_eq!(
            health.query.get("query-target-filter").map(String::as_str),
            Some(r#"wcard(healthInst.dn,"^sys/health$")"#)
        );
    }

    #[test]
    fn test_file_names_use_alias() {
        let mut desc = ResourceDescriptor::new("fvCEp");
        assert_eq!(desc.file_name(), "fvCEp.json");
        assert_eq!(desc.page_file_name(2), "fvCEp-2.json");

        desc.prefix = Some("endpoints".to_string());
        assert_eq!(desc.file_name(), "endpoints.json");
    }

    #[test]
    fn test_query_pairs_are_key_ordered() {
        let desc = ResourceDescriptor::new("fvBD")
            .with_query("rsp-subtree", "full")
            .with_query("query-target", "self");
        let keys: Vec<_> = desc.query_pairs().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["query-target", "rsp-subtree"]);
    }

    #[test]
    fn test_resolve_catalog_override() {
        let all = resolve_catalog(ALL_CLASSES, &BTreeMap::new());
        assert_eq!(all.len(), get_catalog().len());

        let mut query = BTreeMap::new();
        query.insert("page-size".to_string(), "5".to_string());
        let single = resolve_catalog("fvTenant", &query);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].class, "fvTenant");
        assert_eq!(single[0].query, query);
    }
}
