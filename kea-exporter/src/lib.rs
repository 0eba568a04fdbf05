//! Prometheus exporter for ISC Kea DHCP statistics.
//!
//! This crate polls a Kea Control Agent for DHCPv4 and DHCPv6 statistics and
//! republishes them as labeled gauges on an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Kea Control    │<────│    Exporter     │────>│   HTTP Server   │
//! │  Agent (JSON)   │     │ (mapping/subnet)│     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!                                  ^
//!                                  │ every interval
//!                         ┌─────────────────┐
//!                         │     Poller      │
//!                         └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! kea-exporter --target http://kea.example.com:8000 --port 9547 --interval 10
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for the optional JSON5 configuration file.

pub mod client;
pub mod config;
pub mod error;
pub mod exporter;
pub mod http;
pub mod mapping;
pub mod poller;
pub mod registry;
pub mod service;
pub mod subnet;

pub use client::{ClientError, KeaClient};
pub use config::ExporterConfig;
pub use error::{ExporterError, KeyError, Result};
pub use exporter::{CycleReport, Exporter, ExporterStats};
pub use http::HttpServer;
pub use mapping::{Family, MappingTables, MetricDefinition};
pub use poller::Poller;
pub use registry::{MetricRegistry, RegistryError, SharedRegistry};
pub use service::Service;
pub use subnet::{ParsedKey, SubnetTable, parse_key};
