//! Subnet-indexed statistic keys and the subnet id table.
//!
//! Kea reports per-subnet statistics as `subnet[<id>].<name>`. The id is
//! resolved against the subnet list read from the server configuration at
//! startup.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::KeyError;
use crate::mapping::{Family, FamilyMapping, LABEL_ID, LABEL_SUBNET, MetricDefinition};

/// Prefix shared by all subnet-indexed keys.
const SUBNET_KEY_PREFIX: &str = "subnet[";

static SUBNET_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^subnet\[(?P<index>\d+)\]\.(?P<metric>[\w-]+)$").unwrap());

/// A statistic key split into its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedKey<'a> {
    /// Plain statistic name, e.g. `pkt4-received`.
    Flat(&'a str),
    /// Per-subnet statistic, e.g. `subnet[3].assigned-addresses`.
    Indexed { index: u32, metric: &'a str },
    /// Looks like a per-subnet key but the index or name cannot be parsed.
    Unparseable,
}

/// Parse a Kea statistic key.
///
/// Keys starting with `subnet[` are never treated as flat: if they do not
/// match `subnet[<u32>].<name>` exactly they are [`ParsedKey::Unparseable`].
pub fn parse_key(key: &str) -> ParsedKey<'_> {
    if !key.starts_with(SUBNET_KEY_PREFIX) {
        return ParsedKey::Flat(key);
    }

    let Some(caps) = SUBNET_KEY_REGEX.captures(key) else {
        return ParsedKey::Unparseable;
    };

    let (Some(index), Some(metric)) = (caps.name("index"), caps.name("metric")) else {
        return ParsedKey::Unparseable;
    };

    match index.as_str().parse::<u32>() {
        Ok(index) => ParsedKey::Indexed {
            index,
            metric: metric.as_str(),
        },
        Err(_) => ParsedKey::Unparseable,
    }
}

/// Mapping from Kea subnet id to its CIDR string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetTable {
    subnets: HashMap<u32, String>,
}

impl SubnetTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subnet. A later entry with the same id replaces the earlier one.
    pub fn insert(&mut self, id: u32, subnet: impl Into<String>) {
        self.subnets.insert(id, subnet.into());
    }

    /// Look up the CIDR for a subnet id.
    pub fn get(&self, id: u32) -> Option<&str> {
        self.subnets.get(&id).map(String::as_str)
    }

    /// Subnet label value for an id; empty when the id is unknown.
    pub fn label_for(&self, id: u32) -> &str {
        self.get(id).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.subnets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subnets.is_empty()
    }
}

impl FromIterator<(u32, String)> for SubnetTable {
    fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
        Self {
            subnets: iter.into_iter().collect(),
        }
    }
}

/// A statistic key resolved to its metric and full label set.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedKey<'a> {
    pub metric: &'a MetricDefinition,
    pub labels: Vec<(&'static str, String)>,
}

impl ResolvedKey<'_> {
    /// Borrowed label pairs, as taken by the registry.
    pub fn label_pairs(&self) -> Vec<(&str, &str)> {
        self.labels.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }
}

/// Resolve a non-ignored statistic key against a family's mapping.
///
/// Flat keys go straight to the mapping; indexed keys have their inner name
/// mapped and gain `id` and `subnet` labels. An id missing from `subnets`
/// still resolves, with an empty `subnet` label.
pub fn resolve_key<'a>(
    mapping: &'a FamilyMapping,
    subnets: &SubnetTable,
    key: &str,
) -> Result<ResolvedKey<'a>, KeyError> {
    let family = mapping.family();
    let unmapped = || KeyError::Unmapped {
        family,
        key: key.to_string(),
    };

    match parse_key(key) {
        ParsedKey::Flat(name) => {
            let (metric, labels) = mapping.resolve(name).ok_or_else(unmapped)?;
            if metric.is_per_subnet() {
                return Err(KeyError::MissingIndex {
                    key: key.to_string(),
                    metric: metric.name.clone(),
                });
            }

            Ok(ResolvedKey {
                metric,
                labels: labels.iter().map(|(k, v)| (*k, (*v).to_string())).collect(),
            })
        }
        ParsedKey::Indexed { index, metric } => {
            if family != Family::Dhcp4 {
                return Err(KeyError::SubnetUnsupported {
                    family,
                    key: key.to_string(),
                });
            }

            let (definition, labels) = mapping.resolve(metric).ok_or_else(unmapped)?;
            if !definition.is_per_subnet() {
                return Err(KeyError::UnexpectedIndex {
                    key: key.to_string(),
                    metric: definition.name.clone(),
                });
            }

            let subnet = subnets.label_for(index);
            if subnet.is_empty() {
                debug!(key = %key, id = index, "Subnet id not in configuration");
            }

            let mut resolved: Vec<(&'static str, String)> =
                labels.iter().map(|(k, v)| (*k, (*v).to_string())).collect();
            resolved.push((LABEL_ID, index.to_string()));
            resolved.push((LABEL_SUBNET, subnet.to_string()));

            Ok(ResolvedKey {
                metric: definition,
                labels: resolved,
            })
        }
        ParsedKey::Unparseable => Err(KeyError::MalformedIndex(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingTables;

    fn v4_subnets() -> SubnetTable {
        let mut table = SubnetTable::new();
        table.insert(0, "10.0.0.0/24");
        table
    }

    #[test]
    fn test_parse_flat_key() {
        assert_eq!(parse_key("pkt4-received"), ParsedKey::Flat("pkt4-received"));
        assert_eq!(
            parse_key("assigned-addresses"),
            ParsedKey::Flat("assigned-addresses")
        );
    }

    #[test]
    fn test_parse_indexed_key() {
        assert_eq!(
            parse_key("subnet[0].total-addresses"),
            ParsedKey::Indexed {
                index: 0,
                metric: "total-addresses"
            }
        );
        assert_eq!(
            parse_key("subnet[42].assigned-nas"),
            ParsedKey::Indexed {
                index: 42,
                metric: "assigned-nas"
            }
        );
    }

    #[test]
    fn test_parse_unparseable_index() {
        assert_eq!(parse_key("subnet[x].total-addresses"), ParsedKey::Unparseable);
        assert_eq!(parse_key("subnet[].total-addresses"), ParsedKey::Unparseable);
        assert_eq!(parse_key("subnet[-1].total-addresses"), ParsedKey::Unparseable);
        assert_eq!(parse_key("subnet[1"), ParsedKey::Unparseable);
    }

    #[test]
    fn test_parse_index_overflow() {
        assert_eq!(
            parse_key("subnet[99999999999].total-addresses"),
            ParsedKey::Unparseable
        );
    }

    #[test]
    fn test_parse_nested_key_is_unparseable() {
        // Pool-level keys carry a second index that has no mapping
        assert_eq!(
            parse_key("subnet[1].pool[0].assigned-addresses"),
            ParsedKey::Unparseable
        );
    }

    #[test]
    fn test_parse_missing_metric_name() {
        assert_eq!(parse_key("subnet[1]."), ParsedKey::Unparseable);
        assert_eq!(parse_key("subnet[1]"), ParsedKey::Unparseable);
    }

    #[test]
    fn test_subnet_table_lookup() {
        let mut table = SubnetTable::new();
        table.insert(1, "192.168.1.0/24");
        table.insert(2, "10.0.0.0/8");

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1), Some("192.168.1.0/24"));
        assert_eq!(table.label_for(2), "10.0.0.0/8");
        assert_eq!(table.get(3), None);
        assert_eq!(table.label_for(3), "");
    }

    #[test]
    fn test_subnet_table_from_iter() {
        let table: SubnetTable = vec![(7, "172.16.0.0/16".to_string())]
            .into_iter()
            .collect();

        assert!(!table.is_empty());
        assert_eq!(table.get(7), Some("172.16.0.0/16"));
    }

    #[test]
    fn test_resolve_flat_key() {
        let tables = MappingTables::default();
        let resolved =
            resolve_key(tables.family(Family::Dhcp4), &v4_subnets(), "pkt4-received").unwrap();

        assert_eq!(resolved.metric.name, "kea_dhcp4_packets_received");
        assert_eq!(resolved.label_pairs(), vec![("operation", "all")]);
    }

    #[test]
    fn test_resolve_indexed_key() {
        let tables = MappingTables::default();
        let resolved = resolve_key(
            tables.family(Family::Dhcp4),
            &v4_subnets(),
            "subnet[0].total-addresses",
        )
        .unwrap();

        assert_eq!(resolved.metric.name, "kea_dhcp4_addresses_total");
        assert_eq!(
            resolved.label_pairs(),
            vec![("id", "0"), ("subnet", "10.0.0.0/24")]
        );
    }

    #[test]
    fn test_resolve_indexed_key_unknown_subnet() {
        let tables = MappingTables::default();
        let resolved = resolve_key(
            tables.family(Family::Dhcp4),
            &v4_subnets(),
            "subnet[9].assigned-addresses",
        )
        .unwrap();

        assert_eq!(resolved.label_pairs(), vec![("id", "9"), ("subnet", "")]);
    }

    #[test]
    fn test_resolve_indexed_aggregate_name() {
        // The ignore set applies to raw keys only
        let tables = MappingTables::default();
        let resolved = resolve_key(
            tables.family(Family::Dhcp4),
            &v4_subnets(),
            "subnet[0].reclaimed-leases",
        )
        .unwrap();

        assert_eq!(resolved.metric.name, "kea_dhcp4_addresses_reclaimed_total");
    }

    #[test]
    fn test_resolve_flat_per_subnet_key_missing_index() {
        let tables = MappingTables::default();
        let err = resolve_key(
            tables.family(Family::Dhcp4),
            &v4_subnets(),
            "assigned-addresses",
        )
        .unwrap_err();

        assert_eq!(
            err,
            KeyError::MissingIndex {
                key: "assigned-addresses".to_string(),
                metric: "kea_dhcp4_addresses_assigned_total".to_string(),
            }
        );
    }

    #[test]
    fn test_resolve_unmapped() {
        let tables = MappingTables::default();
        let v4 = tables.family(Family::Dhcp4);

        assert!(matches!(
            resolve_key(v4, &v4_subnets(), "cumulative-assigned-addresses"),
            Err(KeyError::Unmapped { .. })
        ));
        assert!(matches!(
            resolve_key(v4, &v4_subnets(), "subnet[0].unknown-thing"),
            Err(KeyError::Unmapped { .. })
        ));
    }

    #[test]
    fn test_resolve_malformed_index() {
        let tables = MappingTables::default();

        assert_eq!(
            resolve_key(
                tables.family(Family::Dhcp4),
                &v4_subnets(),
                "subnet[abc].total-addresses"
            ),
            Err(KeyError::MalformedIndex(
                "subnet[abc].total-addresses".to_string()
            ))
        );
    }

    #[test]
    fn test_resolve_index_on_packet_counter() {
        let tables = MappingTables::default();

        assert!(matches!(
            resolve_key(
                tables.family(Family::Dhcp4),
                &v4_subnets(),
                "subnet[0].pkt4-received"
            ),
            Err(KeyError::UnexpectedIndex { .. })
        ));
    }

    #[test]
    fn test_resolve_dhcp6_indexed_not_supported() {
        let tables = MappingTables::default();

        assert!(matches!(
            resolve_key(
                tables.family(Family::Dhcp6),
                &SubnetTable::new(),
                "subnet[1].total-nas"
            ),
            Err(KeyError::SubnetUnsupported {
                family: Family::Dhcp6,
                ..
            })
        ));
    }
}
