//! Prometheus Exporter
//!
//! Publishes cache statistics as gauges on a private registry. Values are
//! pulled from the coordinator on every [`refresh`](PrometheusExporter::refresh),
//! so the exporter never sits on the access path.

use std::sync::Arc;

use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::MultiLevelCache;
use crate::error::{Error, Result};

const NAMESPACE_LABEL: &str = "namespace";
const COUNTER_LABEL: &str = "counter";

/// Prometheus view of a [`MultiLevelCache`]
pub struct PrometheusExporter {
    registry: Registry,
    cache: Arc<MultiLevelCache>,

    l1_hits: IntGaugeVec,
    l1_misses: IntGaugeVec,
    l1_evictions: IntGaugeVec,
    l1_expirations: IntGaugeVec,
    l1_entries: IntGaugeVec,
    l1_memory_bytes: IntGaugeVec,

    coordinator: IntGaugeVec,
    hit_ratio: Gauge,
    access_records: IntGauge,
}

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}

fn namespace_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), &[NAMESPACE_LABEL]).map_err(prom_err)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(prom_err)?;
    Ok(gauge)
}

impl PrometheusExporter {
    /// Register all gauges on a fresh registry
    pub fn new(cache: Arc<MultiLevelCache>) -> Result<Self> {
        let registry = Registry::new();

        let coordinator = IntGaugeVec::new(
            Opts::new(
                "tiercache_coordinator_events",
                "Coordinator event counters by name",
            ),
            &[COUNTER_LABEL],
        )
        .map_err(prom_err)?;
        registry
            .register(Box::new(coordinator.clone()))
            .map_err(prom_err)?;

        let hit_ratio = Gauge::new(
            "tiercache_hit_ratio",
            "Hits at any level over all lookups",
        )
        .map_err(prom_err)?;
        registry
            .register(Box::new(hit_ratio.clone()))
            .map_err(prom_err)?;

        let access_records = IntGauge::new(
            "tiercache_access_records",
            "Access records held by the analyzer",
        )
        .map_err(prom_err)?;
        registry
            .register(Box::new(access_records.clone()))
            .map_err(prom_err)?;

        Ok(Self {
            l1_hits: namespace_gauge(&registry, "tiercache_l1_hits", "L1 hits")?,
            l1_misses: namespace_gauge(&registry, "tiercache_l1_misses", "L1 misses")?,
            l1_evictions: namespace_gauge(&registry, "tiercache_l1_evictions", "L1 LRU evictions")?,
            l1_expirations: namespace_gauge(
                &registry,
                "tiercache_l1_expirations",
                "L1 entries dropped on TTL expiry",
            )?,
            l1_entries: namespace_gauge(&registry, "tiercache_l1_entries", "L1 resident entries")?,
            l1_memory_bytes: namespace_gauge(
                &registry,
                "tiercache_l1_memory_bytes",
                "Estimated bytes held by L1",
            )?,
            coordinator,
            hit_ratio,
            access_records,
            registry,
            cache,
        })
    }

    /// Copy current statistics into the gauges
    pub fn refresh(&self) -> Result<()> {
        for ns in self.cache.namespaces() {
            let stats = self.cache.stats(Some(&ns))?;
            let labels = [ns.as_str()];
            self.l1_hits.with_label_values(&labels).set(stats.hits as i64);
            self.l1_misses.with_label_values(&labels).set(stats.misses as i64);
            self.l1_evictions
                .with_label_values(&labels)
                .set(stats.evictions as i64);
            self.l1_expirations
                .with_label_values(&labels)
                .set(stats.expirations as i64);
            self.l1_entries
                .with_label_values(&labels)
                .set(stats.entries as i64);
            self.l1_memory_bytes
                .with_label_values(&labels)
                .set(stats.memory_estimate_bytes as i64);
        }

        let m = self.cache.metrics();
        for (name, value) in [
            ("l1_hits", m.l1_hits),
            ("l1_misses", m.l1_misses),
            ("l2_hits", m.l2_hits),
            ("l2_misses", m.l2_misses),
            ("fallback_hits", m.fallback_hits),
            ("write_backs", m.write_backs),
            ("remote_errors", m.remote_errors),
            ("remote_timeouts", m.remote_timeouts),
            ("migrations", m.migrations),
            ("corrupt_payloads", m.corrupt_payloads),
            ("compressed_writes", m.compressed_writes),
            ("bytes_saved", m.bytes_saved),
            ("sets", m.sets),
            ("set_failures", m.set_failures),
        ] {
            self.coordinator.with_label_values(&[name]).set(value as i64);
        }
        self.hit_ratio.set(m.overall_hit_ratio);
        self.access_records
            .set(self.cache.analyzer().record_count() as i64);
        Ok(())
    }

    /// Refresh and render in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        self.refresh()?;

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics not UTF-8: {}", e)))
    }

    /// Content type for [`render`](Self::render) output
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

// =============================================================================
// Tests
// =============================================================================
