//! Pick the datasource a query runs against

use std::sync::Arc;

use super::{Datasource, DatasourceConfig};
use crate::engine::EngineKind;
use crate::storage::{Store, StoreError};

/// A datasource with its decoded config and authoritative endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDatasource {
    pub datasource: Datasource,
    pub config: DatasourceConfig,
    pub endpoint: String,
}

impl ResolvedDatasource {
    /// Decode the config and settle the endpoint: the record's own endpoint
    /// wins, else `config.endpoint`.
    pub fn from_datasource(datasource: Datasource) -> Self {
        let config = datasource.typed_config();
        let own = datasource.endpoint.trim();
        let endpoint = if own.is_empty() {
            config.endpoint().unwrap_or_default().to_string()
        } else {
            own.to_string()
        };
        Self {
            datasource,
            config,
            endpoint,
        }
    }
}

/// Read-only datasource lookup
#[derive(Clone)]
pub struct DatasourceResolver {
    store: Arc<dyn Store>,
}

impl DatasourceResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolve by id when given, falling back to the default datasource of
    /// `kind`. An id that is missing or belongs to another engine falls through
    /// to the kind lookup.
    pub fn resolve(
        &self,
        kind: EngineKind,
        id: Option<u64>,
    ) -> Result<Option<ResolvedDatasource>, StoreError> {
        if let Some(id) = id {
            match self.store.get_datasource(id)? {
                Some(ds) if ds.kind == kind => return Ok(Some(ResolvedDatasource::from_datasource(ds))),
                Some(ds) => {
                    tracing::warn!(
                        datasource_id = id,
                        expected = %kind,
                        actual = %ds.kind,
                        "Datasource engine mismatch, using engine default"
                    );
                }
                None => {
                    tracing::warn!(datasource_id = id, engine = %kind, "Datasource not found, using engine default");
                }
            }
        }

        let candidates = self.store.list_datasources(Some(kind))?;
        let chosen = candidates
            .iter()
            .position(|ds| ds.typed_config().is_default)
            .or_else(|| (!candidates.is_empty()).then_some(0));

        Ok(chosen.map(|idx| ResolvedDatasource::from_datasource(candidates[idx].clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn resolver_with(datasources: Vec<Datasource>) -> DatasourceResolver {
        let store = Arc::new(MemoryStore::new());
        for ds in datasources {
            store.insert_datasource(ds).unwrap();
        }
        DatasourceResolver::new(store)
    }

    #[test]
    fn test_resolve_by_id() {
        let resolver = resolver_with(vec![
            Datasource::new("a", EngineKind::Loki, "http://a:3100"),
            Datasource::new("b", EngineKind::Loki, "http://b:3100"),
        ]);
        let resolved = resolver.resolve(EngineKind::Loki, Some(2)).unwrap().unwrap();
        assert_eq!(resolved.datasource.name, "b");
        assert_eq!(resolved.endpoint, "http://b:3100");
    }

    #[test]
    fn test_prefers_default_flag_then_lowest_id() {
        let resolver = resolver_with(vec![
            Datasource::new("first", EngineKind::Elasticsearch, "http://es1:9200"),
            Datasource::new("flagged", EngineKind::Elasticsearch, "http://es2:9200")
                .with_config(json!({"isDefault": true})),
            Datasource::new("loki", EngineKind::Loki, "http://loki:3100"),
        ]);
        let resolved = resolver.resolve(EngineKind::Elasticsearch, None).unwrap().unwrap();
        assert_eq!(resolved.datasource.name, "flagged");

        let resolver = resolver_with(vec![
            Datasource::new("first", EngineKind::VictoriaLogs, "http://vl1"),
            Datasource::new("second", EngineKind::VictoriaLogs, "http://vl2"),
        ]);
        let resolved = resolver.resolve(EngineKind::VictoriaLogs, None).unwrap().unwrap();
        assert_eq!(resolved.datasource.name, "first");
    }

    #[test]
    fn test_stale_or_mismatched_id_falls_through() {
        let resolver = resolver_with(vec![
            Datasource::new("loki", EngineKind::Loki, "http://loki:3100"),
            Datasource::new("es", EngineKind::Elasticsearch, "http://es:9200"),
        ]);
        let stale = resolver.resolve(EngineKind::Loki, Some(99)).unwrap().unwrap();
        assert_eq!(stale.datasource.name, "loki");

        let mismatched = resolver.resolve(EngineKind::Loki, Some(2)).unwrap().unwrap();
        assert_eq!(mismatched.datasource.name, "loki");
    }

    #[test]
    fn test_endpoint_falls_back_to_config() {
        let resolver = resolver_with(vec![Datasource::new("vl", EngineKind::VictoriaLogs, "")
            .with_config(json!({"endpoint": "http://vl:9428"}))]);
        let resolved = resolver.resolve(EngineKind::VictoriaLogs, None).unwrap().unwrap();
        assert_eq!(resolved.endpoint, "http://vl:9428");
    }

    #[test]
    fn test_no_datasource_of_kind() {
        let resolver = resolver_with(vec![Datasource::new("loki", EngineKind::Loki, "http://loki")]);
        assert!(resolver.resolve(EngineKind::Elasticsearch, None).unwrap().is_none());
    }
}
