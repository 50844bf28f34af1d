//! Metrics service for collecting application metrics

use crate::db::DynStore;

/// Service for collecting application metrics
#[derive(Clone)]
pub struct MetricsService {
    store: DynStore,
}

impl MetricsService {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Update database connection pool metrics
    pub fn update_db_connection_metrics(&self) {
        let Some(stats) = self.store.pool_stats() else {
            return;
        };
        let idle = stats.idle as i64;
        crate::metrics::DB_CONNECTIONS_ACTIVE.set((stats.size as i64 - idle).max(0));
        crate::metrics::DB_CONNECTIONS_IDLE.set(idle);
    }

    /// Collect all custom application metrics
    pub fn collect_custom_metrics(&self, server_version: &str) -> String {
        let mut output = String::new();
        output.push_str("# HELP clinicq_server_info clinicq server information\n");
        output.push_str("# TYPE clinicq_server_info gauge\n");
        output.push_str(&format!(
            "clinicq_server_info{{version=\"{}\",storage=\"{}\"}} 1\n",
            server_version,
            self.store.backend()
        ));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_info_line_names_backend() {
        let service = MetricsService::new(Arc::new(MemoryStore::new()));
        let text = service.collect_custom_metrics("1.2.3");
        assert!(text.contains("clinicq_server_info{version=\"1.2.3\",storage=\"memory\"} 1"));
    }
}
