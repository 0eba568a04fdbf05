//! Mapping from Kea statistic names to exported gauge metrics.
//!
//! Each protocol family has its own metric schema, its own statistic key
//! namespace and its own set of aggregate keys that are never republished.
//! The tables are plain data; [`MappingTables`] turns them into lookup
//! structures once at startup.

use std::collections::{HashMap, HashSet};
use std::fmt;

/// Default metric name prefix.
pub const DEFAULT_PREFIX: &str = "kea";

/// Label carrying the numeric Kea subnet id.
pub const LABEL_ID: &str = "id";
/// Label carrying the subnet CIDR.
pub const LABEL_SUBNET: &str = "subnet";
/// Label carrying the packet type.
pub const LABEL_OPERATION: &str = "operation";

const OPERATION: &[&str] = &[LABEL_OPERATION];
const PER_SUBNET: &[&str] = &[LABEL_ID, LABEL_SUBNET];

/// Static labels attached by a key mapping.
pub type StaticLabels = &'static [(&'static str, &'static str)];

/// DHCP protocol family served by a Kea module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Dhcp4,
    Dhcp6,
}

impl Family {
    /// Classify a control-socket module name.
    ///
    /// Returns `None` for modules that do not serve DHCP statistics (e.g. `d2`).
    pub fn from_module(module: &str) -> Option<Self> {
        match module {
            "dhcp4" => Some(Family::Dhcp4),
            "dhcp6" => Some(Family::Dhcp6),
            _ => None,
        }
    }

    /// Name used both as Kea service name and as metric name component.
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Dhcp4 => "dhcp4",
            Family::Dhcp6 => "dhcp6",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gauge metric declared at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDefinition {
    /// Family the metric belongs to.
    pub family: Family,
    /// Key used by the mapping tables (e.g. `received_packets`).
    pub key: &'static str,
    /// Full exposed name (e.g. `kea_dhcp4_packets_received`).
    pub name: String,
    /// Help text.
    pub help: &'static str,
    /// Label names, in exposition order.
    pub labels: &'static [&'static str],
}

impl MetricDefinition {
    /// Whether this metric is broken down per subnet.
    pub fn is_per_subnet(&self) -> bool {
        self.labels.contains(&LABEL_ID)
    }
}

struct MetricSpec {
    key: &'static str,
    suffix: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
}

struct KeySpec {
    stat: &'static str,
    metric: &'static str,
    labels: StaticLabels,
}

const fn metric(
    key: &'static str,
    suffix: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
) -> MetricSpec {
    MetricSpec {
        key,
        suffix,
        help,
        labels,
    }
}

const fn stat(stat: &'static str, metric: &'static str, labels: StaticLabels) -> KeySpec {
    KeySpec {
        stat,
        metric,
        labels,
    }
}

const DHCP4_METRICS: &[MetricSpec] = &[
    // Packets
    metric(
        "received_packets",
        "packets_received",
        "Number of DHCPv4 packets received",
        OPERATION,
    ),
    metric(
        "sent_packets",
        "packets_sent",
        "Number of DHCPv4 packets sent",
        OPERATION,
    ),
    // Per subnet
    metric(
        "addresses_assigned_total",
        "addresses_assigned_total",
        "Assigned addresses",
        PER_SUBNET,
    ),
    metric(
        "addresses_declined_total",
        "addresses_declined_total",
        "Declined counts",
        PER_SUBNET,
    ),
    metric(
        "addresses_declined_reclaimed_total",
        "addresses_declined_reclaimed_total",
        "Declined addresses that were reclaimed",
        PER_SUBNET,
    ),
    metric(
        "addresses_reclaimed_total",
        "addresses_reclaimed_total",
        "Expired addresses that were reclaimed",
        PER_SUBNET,
    ),
    metric(
        "addresses_total",
        "addresses_total",
        "Size of subnet address pool",
        PER_SUBNET,
    ),
];

const DHCP4_KEYS: &[KeySpec] = &[
    // received_packets
    stat("pkt4-received", "received_packets", &[(LABEL_OPERATION, "all")]),
    stat(
        "pkt4-parse-failed",
        "received_packets",
        &[(LABEL_OPERATION, "parse-failed")],
    ),
    stat(
        "pkt4-receive-drop",
        "received_packets",
        &[(LABEL_OPERATION, "dropped")],
    ),
    stat(
        "pkt4-discover-received",
        "received_packets",
        &[(LABEL_OPERATION, "discover")],
    ),
    stat(
        "pkt4-offer-received",
        "received_packets",
        &[(LABEL_OPERATION, "offer")],
    ),
    stat(
        "pkt4-request-received",
        "received_packets",
        &[(LABEL_OPERATION, "request")],
    ),
    stat(
        "pkt4-ack-received",
        "received_packets",
        &[(LABEL_OPERATION, "ack")],
    ),
    stat(
        "pkt4-nak-received",
        "received_packets",
        &[(LABEL_OPERATION, "nak")],
    ),
    stat(
        "pkt4-release-received",
        "received_packets",
        &[(LABEL_OPERATION, "release")],
    ),
    stat(
        "pkt4-decline-received",
        "received_packets",
        &[(LABEL_OPERATION, "decline")],
    ),
    stat(
        "pkt4-inform-received",
        "received_packets",
        &[(LABEL_OPERATION, "inform")],
    ),
    stat(
        "pkt4-unknown-received",
        "received_packets",
        &[(LABEL_OPERATION, "unknown")],
    ),
    // sent_packets
    stat("pkt4-sent", "sent_packets", &[(LABEL_OPERATION, "all")]),
    stat(
        "pkt4-offer-sent",
        "sent_packets",
        &[(LABEL_OPERATION, "offer")],
    ),
    stat("pkt4-ack-sent", "sent_packets", &[(LABEL_OPERATION, "ack")]),
    stat("pkt4-nak-sent", "sent_packets", &[(LABEL_OPERATION, "nak")]),
    // per subnet
    stat("assigned-addresses", "addresses_assigned_total", &[]),
    stat("declined-addresses", "addresses_declined_total", &[]),
    stat(
        "declined-reclaimed-addresses",
        "addresses_declined_reclaimed_total",
        &[],
    ),
    stat(
        "reclaimed-declined-addresses",
        "addresses_declined_reclaimed_total",
        &[],
    ),
    stat("reclaimed-leases", "addresses_reclaimed_total", &[]),
    stat("total-addresses", "addresses_total", &[]),
];

/// Sums of per-subnet values.
const DHCP4_IGNORED: &[&str] = &[
    "declined-addresses",
    "declined-reclaimed-addresses",
    "reclaimed-declined-addresses",
    "reclaimed-leases",
];

const DHCP6_METRICS: &[MetricSpec] = &[
    // Packets sent/received
    metric(
        "sent_packets",
        "packets_sent_total",
        "Packets sent",
        OPERATION,
    ),
    metric(
        "received_packets",
        "packets_received_total",
        "Packets received",
        OPERATION,
    ),
    // DHCPv4-over-DHCPv6
    metric(
        "sent_dhcp4_packets",
        "packets_sent_dhcp4_total",
        "DHCPv4-over-DHCPv6 Packets sent",
        OPERATION,
    ),
    metric(
        "received_dhcp4_packets",
        "packets_received_dhcp4_total",
        "DHCPv4-over-DHCPv6 Packets received",
        OPERATION,
    ),
    // Per subnet
    metric(
        "addresses_declined_total",
        "addresses_declined_total",
        "Declined addresses",
        PER_SUBNET,
    ),
    metric(
        "addresses_declined_reclaimed_total",
        "addresses_declined_reclaimed_total",
        "Declined addresses that were reclaimed",
        PER_SUBNET,
    ),
    metric(
        "addresses_reclaimed_total",
        "addresses_reclaimed_total",
        "Expired addresses that were reclaimed",
        PER_SUBNET,
    ),
    // IA_NA
    metric(
        "na_assigned_total",
        "na_assigned_total",
        "Assigned non-temporary addresses (IA_NA)",
        PER_SUBNET,
    ),
    metric(
        "na_total",
        "na_total",
        "Size of non-temporary address pool",
        PER_SUBNET,
    ),
    // IA_PD
    metric(
        "pd_assigned_total",
        "pd_assigned_total",
        "Assigned prefix delegations (IA_PD)",
        PER_SUBNET,
    ),
    metric(
        "pd_total",
        "pd_total",
        "Size of prefix delegation pool",
        PER_SUBNET,
    ),
];

const DHCP6_KEYS: &[KeySpec] = &[
    // sent_packets
    stat(
        "pkt6-advertise-sent",
        "sent_packets",
        &[(LABEL_OPERATION, "advertise")],
    ),
    stat(
        "pkt6-reply-sent",
        "sent_packets",
        &[(LABEL_OPERATION, "reply")],
    ),
    // received_packets
    stat(
        "pkt6-receive-drop",
        "received_packets",
        &[(LABEL_OPERATION, "drop")],
    ),
    stat(
        "pkt6-parse-failed",
        "received_packets",
        &[(LABEL_OPERATION, "parse-failed")],
    ),
    stat(
        "pkt6-solicit-received",
        "received_packets",
        &[(LABEL_OPERATION, "solicit")],
    ),
    stat(
        "pkt6-advertise-received",
        "received_packets",
        &[(LABEL_OPERATION, "advertise")],
    ),
    stat(
        "pkt6-request-received",
        "received_packets",
        &[(LABEL_OPERATION, "request")],
    ),
    stat(
        "pkt6-reply-received",
        "received_packets",
        &[(LABEL_OPERATION, "reply")],
    ),
    stat(
        "pkt6-renew-received",
        "received_packets",
        &[(LABEL_OPERATION, "renew")],
    ),
    stat(
        "pkt6-rebind-received",
        "received_packets",
        &[(LABEL_OPERATION, "rebind")],
    ),
    stat(
        "pkt6-release-received",
        "received_packets",
        &[(LABEL_OPERATION, "release")],
    ),
    stat(
        "pkt6-decline-received",
        "received_packets",
        &[(LABEL_OPERATION, "decline")],
    ),
    stat(
        "pkt6-infrequest-received",
        "received_packets",
        &[(LABEL_OPERATION, "infrequest")],
    ),
    stat(
        "pkt6-unknown-received",
        "received_packets",
        &[(LABEL_OPERATION, "unknown")],
    ),
    // DHCPv4-over-DHCPv6
    stat(
        "pkt6-dhcpv4-response-sent",
        "sent_dhcp4_packets",
        &[(LABEL_OPERATION, "response")],
    ),
    stat(
        "pkt6-dhcpv4-query-received",
        "received_dhcp4_packets",
        &[(LABEL_OPERATION, "query")],
    ),
    stat(
        "pkt6-dhcpv4-response-received",
        "received_dhcp4_packets",
        &[(LABEL_OPERATION, "response")],
    ),
    // per subnet
    stat("assigned-nas", "na_assigned_total", &[]),
    stat("assigned-pds", "pd_assigned_total", &[]),
    stat("declined-addresses", "addresses_declined_total", &[]),
    stat(
        "declined-reclaimed-addresses",
        "addresses_declined_reclaimed_total",
        &[],
    ),
    stat(
        "reclaimed-declined-addresses",
        "addresses_declined_reclaimed_total",
        &[],
    ),
    stat("reclaimed-leases", "addresses_reclaimed_total", &[]),
    stat("total-nas", "na_total", &[]),
    stat("total-pds", "pd_total", &[]),
];

const DHCP6_IGNORED: &[&str] = &[
    // sums of different packet types
    "pkt6-sent",
    "pkt6-received",
    // sums of subnet values
    "declined-addresses",
    "declined-reclaimed-addresses",
    "reclaimed-declined-addresses",
    "reclaimed-leases",
];

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`. Invalid
/// characters become underscores, runs of underscores collapse and trailing
/// underscores are dropped.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
        last_was_underscore = true;
    }

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == ':' {
            result.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    result
}

/// Build a full metric name: `{prefix}_{family}_{suffix}`.
pub fn build_metric_name(prefix: &str, family: Family, suffix: &str) -> String {
    let prefix = sanitize_metric_name(prefix);

    if prefix.is_empty() {
        format!("{}_{}", family.as_str(), suffix)
    } else {
        format!("{}_{}_{}", prefix, family.as_str(), suffix)
    }
}

/// Result of looking up a flat statistic key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// Aggregate key that must not be republished.
    Ignored,
    /// Key maps onto a metric with the given static labels.
    Mapped {
        metric: &'a MetricDefinition,
        labels: StaticLabels,
    },
    /// Key is neither mapped nor ignored.
    Unmapped,
}

#[derive(Debug, Clone)]
struct KeyMapping {
    metric: &'static str,
    labels: StaticLabels,
}

/// Lookup tables for one protocol family.
#[derive(Debug, Clone)]
pub struct FamilyMapping {
    family: Family,
    metrics: Vec<MetricDefinition>,
    keys: HashMap<&'static str, KeyMapping>,
    ignored: HashSet<&'static str>,
}

impl FamilyMapping {
    fn build(
        family: Family,
        prefix: &str,
        metrics: &[MetricSpec],
        keys: &[KeySpec],
        ignored: &[&'static str],
    ) -> Self {
        let metrics = metrics
            .iter()
            .map(|spec| MetricDefinition {
                family,
                key: spec.key,
                name: build_metric_name(prefix, family, spec.suffix),
                help: spec.help,
                labels: spec.labels,
            })
            .collect();

        let keys = keys
            .iter()
            .map(|spec| {
                (
                    spec.stat,
                    KeyMapping {
                        metric: spec.metric,
                        labels: spec.labels,
                    },
                )
            })
            .collect();

        Self {
            family,
            metrics,
            keys,
            ignored: ignored.iter().copied().collect(),
        }
    }

    /// The family these tables describe.
    pub fn family(&self) -> Family {
        self.family
    }

    /// All metric definitions of this family.
    pub fn metrics(&self) -> &[MetricDefinition] {
        &self.metrics
    }

    /// Find a metric definition by its mapping key.
    pub fn metric(&self, key: &str) -> Option<&MetricDefinition> {
        self.metrics.iter().find(|m| m.key == key)
    }

    /// Whether the raw statistic key is an aggregate to skip.
    pub fn is_ignored(&self, stat: &str) -> bool {
        self.ignored.contains(stat)
    }

    /// Resolve a statistic name to its metric, ignoring the ignore set.
    ///
    /// Used for the inner name of indexed keys, where the aggregate
    /// restriction does not apply.
    pub fn resolve(&self, stat: &str) -> Option<(&MetricDefinition, StaticLabels)> {
        let mapping = self.keys.get(stat)?;
        let metric = self.metric(mapping.metric)?;
        Some((metric, mapping.labels))
    }

    /// Classify a flat statistic key.
    pub fn lookup(&self, stat: &str) -> Lookup<'_> {
        if self.is_ignored(stat) {
            return Lookup::Ignored;
        }

        match self.resolve(stat) {
            Some((metric, labels)) => Lookup::Mapped { metric, labels },
            None => Lookup::Unmapped,
        }
    }
}

/// Immutable mapping tables for both families, built once at startup.
#[derive(Debug, Clone)]
pub struct MappingTables {
    dhcp4: FamilyMapping,
    dhcp6: FamilyMapping,
}

impl MappingTables {
    /// Build the tables with the given metric name prefix.
    pub fn new(prefix: &str) -> Self {
        Self {
            dhcp4: FamilyMapping::build(
                Family::Dhcp4,
                prefix,
                DHCP4_METRICS,
                DHCP4_KEYS,
                DHCP4_IGNORED,
            ),
            dhcp6: FamilyMapping::build(
                Family::Dhcp6,
                prefix,
                DHCP6_METRICS,
                DHCP6_KEYS,
                DHCP6_IGNORED,
            ),
        }
    }

    /// Tables for one family.
    pub fn family(&self, family: Family) -> &FamilyMapping {
        match family {
            Family::Dhcp4 => &self.dhcp4,
            Family::Dhcp6 => &self.dhcp6,
        }
    }

    /// Every metric definition across both families.
    pub fn definitions(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.dhcp4.metrics.iter().chain(self.dhcp6.metrics.iter())
    }
}

impl Default for MappingTables {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}
