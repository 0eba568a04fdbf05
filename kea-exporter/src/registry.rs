//! Gauge registry holding the exported Kea metrics.
//!
//! Every gauge family carries its own lock, so a scrape never waits on the
//! whole registry and may observe a cycle that is only partially applied.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::trace;

use crate::mapping::{MappingTables, MetricDefinition};

/// Errors raised when setting a gauge.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
    #[error("Label mismatch for {metric}: expected [{expected}], got [{actual}]")]
    LabelMismatch {
        metric: String,
        expected: String,
        actual: String,
    },
}

/// One gauge metric with all its label combinations.
#[derive(Debug)]
pub struct GaugeFamily {
    definition: MetricDefinition,
    /// Label values (in schema order) to current value.
    series: RwLock<HashMap<Vec<String>, f64>>,
}

impl GaugeFamily {
    fn new(definition: MetricDefinition) -> Self {
        Self {
            definition,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// The metric definition backing this family.
    pub fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    /// Order label values by the declared schema.
    ///
    /// Fails unless every declared label is given exactly once and nothing else.
    fn label_values(&self, labels: &[(&str, &str)]) -> Result<Vec<String>, RegistryError> {
        let schema = self.definition.labels;
        let mismatch = || RegistryError::LabelMismatch {
            metric: self.definition.name.clone(),
            expected: schema.join(","),
            actual: labels
                .iter()
                .map(|(k, _)| *k)
                .collect::<Vec<_>>()
                .join(","),
        };

        if labels.len() != schema.len() {
            return Err(mismatch());
        }

        schema
            .iter()
            .map(|name| {
                let mut matches = labels.iter().filter(|(k, _)| k == name);
                match (matches.next(), matches.next()) {
                    (Some((_, value)), None) => Ok((*value).to_string()),
                    _ => Err(mismatch()),
                }
            })
            .collect()
    }

    fn set(&self, labels: &[(&str, &str)], value: f64) -> Result<(), RegistryError> {
        let values = self.label_values(labels)?;
        self.series.write().insert(values, value);
        Ok(())
    }

    fn get(&self, labels: &[(&str, &str)]) -> Result<Option<f64>, RegistryError> {
        let values = self.label_values(labels)?;
        Ok(self.series.read().get(&values).copied())
    }

    fn len(&self) -> usize {
        self.series.read().len()
    }

    fn render(&self, output: &mut String) {
        let series = self.series.read();
        if series.is_empty() {
            return;
        }

        let name = &self.definition.name;
        writeln!(output, "# HELP {} {}", name, escape_help(self.definition.help)).ok();
        writeln!(output, "# TYPE {} gauge", name).ok();

        let mut entries: Vec<_> = series.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (values, value) in entries {
            writeln!(
                output,
                "{}{} {}",
                name,
                format_labels(self.definition.labels, values),
                format_value(*value)
            )
            .ok();
        }
    }
}

/// Registry of all gauge families, keyed by exposed metric name.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    families: BTreeMap<String, GaugeFamily>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

impl MetricRegistry {
    /// Create a registry declaring the given metrics.
    pub fn new(definitions: impl IntoIterator<Item = MetricDefinition>) -> Self {
        let families = definitions
            .into_iter()
            .map(|definition| (definition.name.clone(), GaugeFamily::new(definition)))
            .collect();

        Self { families }
    }

    /// Create a registry declaring every metric of the mapping tables.
    pub fn from_tables(tables: &MappingTables) -> Self {
        Self::new(tables.definitions().cloned())
    }

    /// Look up a gauge family by exposed name.
    pub fn family(&self, name: &str) -> Option<&GaugeFamily> {
        self.families.get(name)
    }

    /// Set a gauge value.
    ///
    /// `labels` must name exactly the labels declared for the metric.
    pub fn set(&self, name: &str, labels: &[(&str, &str)], value: f64) -> Result<(), RegistryError> {
        let family = self
            .families
            .get(name)
            .ok_or_else(|| RegistryError::UnknownMetric(name.to_string()))?;

        family.set(labels, value)?;
        trace!(metric = %name, ?labels, value, "Gauge set");
        Ok(())
    }

    /// Current value of a gauge, if it has been set.
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> Result<Option<f64>, RegistryError> {
        let family = self
            .families
            .get(name)
            .ok_or_else(|| RegistryError::UnknownMetric(name.to_string()))?;

        family.get(labels)
    }

    /// Number of declared metrics.
    pub fn metric_count(&self) -> usize {
        self.families.len()
    }

    /// Number of label combinations that carry a value.
    pub fn series_count(&self) -> usize {
        self.families.values().map(GaugeFamily::len).sum()
    }

    /// Render all set gauges in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::with_capacity(self.series_count() * 100);

        for family in self.families.values() {
            family.render(&mut output);
        }

        output
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape help text (no quote escaping in HELP lines).
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(names: &[&str], values: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
