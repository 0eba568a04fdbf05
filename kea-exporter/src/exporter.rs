//! Kea statistics exporter.
//!
//! [`Exporter::bootstrap`] reads the module list and the DHCPv4 subnet table
//! once. [`Exporter::update`] then fetches every module's statistics in bulk
//! and republishes them into the [`MetricRegistry`](crate::MetricRegistry).

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, error, info, trace, warn};

use crate::client::KeaClient;
use crate::error::{ExporterError, KeyError, Result};
use crate::mapping::{Family, MappingTables};
use crate::registry::SharedRegistry;
use crate::subnet::{SubnetTable, resolve_key};

/// Outcome of applying one statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A gauge was set.
    Set,
    /// The key is an aggregate and was skipped.
    Ignored,
}

/// Summary of one update cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Modules whose statistics were requested.
    pub modules_polled: usize,
    /// Modules whose request failed.
    pub modules_failed: usize,
    /// Gauges set.
    pub keys_set: usize,
    /// Aggregate keys skipped.
    pub keys_ignored: usize,
    /// Keys skipped because of a mapping or value error.
    pub keys_failed: usize,
}

/// Exporter statistics accumulated over all cycles.
#[derive(Debug, Clone, Default)]
pub struct ExporterStats {
    /// Completed update cycles.
    pub cycles: u64,
    /// Failed module fetches.
    pub module_failures: u64,
    /// Gauge updates.
    pub keys_set: u64,
    /// Skipped keys.
    pub key_failures: u64,
    /// Report of the most recent cycle.
    pub last_cycle: Option<CycleReport>,
}

/// Extract the value of the most recent sample from a statistic series.
///
/// Kea reports each statistic as `[[value, timestamp], ...]`, newest first.
pub fn head_value(series: &Value) -> Option<f64> {
    series.as_array()?.first()?.as_array()?.first()?.as_f64()
}

/// Read the control-socket module names from the control agent configuration.
pub fn parse_modules(config: &Value) -> Result<Vec<String>> {
    let sockets = config
        .get("Control-agent")
        .and_then(|agent| agent.get("control-sockets"))
        .and_then(Value::as_object)
        .ok_or_else(|| ExporterError::shape("missing Control-agent.control-sockets"))?;

    Ok(sockets.keys().cloned().collect())
}

/// Read the subnet table from a DHCPv4 server configuration.
///
/// Subnets are taken from `Dhcp4.subnet4` and from every
/// `Dhcp4.shared-networks[].subnet4`.
pub fn parse_subnets(config: &Value) -> Result<SubnetTable> {
    let dhcp4 = config
        .get("Dhcp4")
        .and_then(Value::as_object)
        .ok_or_else(|| ExporterError::shape("missing Dhcp4 configuration"))?;

    let mut table = SubnetTable::new();
    collect_subnets(dhcp4, &mut table);

    if let Some(networks) = dhcp4.get("shared-networks").and_then(Value::as_array) {
        for network in networks.iter().filter_map(Value::as_object) {
            collect_subnets(network, &mut table);
        }
    }

    Ok(table)
}

fn collect_subnets(scope: &Map<String, Value>, table: &mut SubnetTable) {
    let Some(subnets) = scope.get("subnet4").and_then(Value::as_array) else {
        return;
    };

    for subnet in subnets {
        let id = subnet
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok());
        let cidr = subnet.get("subnet").and_then(Value::as_str);

        match (id, cidr) {
            (Some(id), Some(cidr)) => table.insert(id, cidr),
            _ => warn!(subnet = %subnet, "Ignoring subnet without id or prefix"),
        }
    }
}

/// Polls Kea and republishes its statistics as gauges.
pub struct Exporter {
    client: KeaClient,
    tables: Arc<MappingTables>,
    registry: SharedRegistry,
    modules: Vec<String>,
    subnets: SubnetTable,
    stats: RwLock<ExporterStats>,
}

impl Exporter {
    /// Create an exporter with an already known module list and subnet table.
    pub fn new(
        client: KeaClient,
        tables: Arc<MappingTables>,
        registry: SharedRegistry,
        modules: Vec<String>,
        subnets: SubnetTable,
    ) -> Self {
        Self {
            client,
            tables,
            registry,
            modules,
            subnets,
            stats: RwLock::new(ExporterStats::default()),
        }
    }

    /// Discover modules and subnets from the server configuration.
    ///
    /// Any failure here is fatal: without the module list nothing can be polled.
    pub async fn bootstrap(
        client: KeaClient,
        tables: Arc<MappingTables>,
        registry: SharedRegistry,
    ) -> Result<Self> {
        let config = client
            .config_get()
            .await
            .map_err(|source| ExporterError::ConfigFetch {
                what: "control agent configuration",
                source,
            })?;
        let modules = parse_modules(&config)?;

        for module in &modules {
            if Family::from_module(module).is_none() {
                info!(module = %module, "Module has no DHCP statistics, not polling it");
            }
        }

        let dhcp4 = Family::Dhcp4.as_str();
        let subnets = if modules.iter().any(|m| m == dhcp4) {
            let config = client.service_config_get(dhcp4).await.map_err(|source| {
                ExporterError::ConfigFetch {
                    what: "DHCPv4 configuration",
                    source,
                }
            })?;
            parse_subnets(&config)?
        } else {
            SubnetTable::new()
        };

        info!(
            target_url = %client.target(),
            modules = ?modules,
            subnets = subnets.len(),
            "Discovered Kea configuration"
        );

        Ok(Self::new(client, tables, registry, modules, subnets))
    }

    /// Module names in discovery order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Subnet table read at startup.
    pub fn subnets(&self) -> &SubnetTable {
        &self.subnets
    }

    /// The registry receiving the gauges.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Accumulated statistics.
    pub fn stats(&self) -> ExporterStats {
        self.stats.read().clone()
    }

    /// Whether at least one update cycle has completed.
    pub fn is_ready(&self) -> bool {
        self.stats.read().cycles > 0
    }

    /// Run one update cycle over all modules.
    ///
    /// A failing module is logged and skipped; gauges it set earlier keep
    /// their last value.
    pub async fn update(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for module in &self.modules {
            let Some(family) = Family::from_module(module) else {
                trace!(module = %module, "Skipping module");
                continue;
            };

            report.modules_polled += 1;
            match self.fetch_statistics(module).await {
                Ok(statistics) => self.ingest(family, &statistics, &mut report),
                Err(e) => {
                    report.modules_failed += 1;
                    warn!(module = %module, error = %e, "Statistics fetch failed");
                }
            }
        }

        self.record(&report);
        debug!(
            modules_polled = report.modules_polled,
            modules_failed = report.modules_failed,
            keys_set = report.keys_set,
            keys_ignored = report.keys_ignored,
            keys_failed = report.keys_failed,
            "Update cycle complete"
        );

        report
    }

    async fn fetch_statistics(&self, module: &str) -> Result<Map<String, Value>> {
        let arguments = self
            .client
            .statistic_get_all(module)
            .await
            .map_err(|source| ExporterError::StatisticsFetch {
                module: module.to_string(),
                source,
            })?;

        match arguments {
            Value::Object(statistics) => Ok(statistics),
            _ => Err(ExporterError::StatisticsShape {
                module: module.to_string(),
            }),
        }
    }

    /// Apply a module's statistics to the registry.
    pub fn ingest(&self, family: Family, statistics: &Map<String, Value>, report: &mut CycleReport) {
        for (key, series) in statistics {
            match self.apply(family, key, series) {
                Ok(Applied::Set) => report.keys_set += 1,
                Ok(Applied::Ignored) => report.keys_ignored += 1,
                Err(KeyError::Registry(e)) => {
                    report.keys_failed += 1;
                    error!(module = %family, key = %key, error = %e, "Metric schema violation");
                }
                Err(e) => {
                    report.keys_failed += 1;
                    warn!(module = %family, key = %key, error = %e, "Skipping statistic");
                }
            }
        }
    }

    /// Apply a single statistic.
    pub fn apply(&self, family: Family, key: &str, series: &Value) -> std::result::Result<Applied, KeyError> {
        let mapping = self.tables.family(family);
        if mapping.is_ignored(key) {
            trace!(module = %family, key = %key, "Ignoring aggregate statistic");
            return Ok(Applied::Ignored);
        }

        let resolved = resolve_key(mapping, &self.subnets, key)?;
        let value = head_value(series).ok_or_else(|| KeyError::MalformedValue(key.to_string()))?;

        self.registry
            .set(&resolved.metric.name, &resolved.label_pairs(), value)?;
        Ok(Applied::Set)
    }

    fn record(&self, report: &CycleReport) {
        let mut stats = self.stats.write();
        stats.cycles += 1;
        stats.module_failures += report.modules_failed as u64;
        stats.keys_set += report.keys_set as u64;
        stats.key_failures += report.keys_failed as u64;
        stats.last_cycle = Some(report.clone());
    }
}
