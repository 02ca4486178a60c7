//! Resolved bus settings. Flags override env vars, which override defaults;
//! clap applies that order, this module only validates and converts.

use std::time::Duration;

use anyhow::Context;
use dbwinfwd_bus::{BusName, OversizePolicy};

use crate::cli::Cli;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub name: BusName,
    pub publish_timeout: Option<Duration>,
    pub oversize: OversizePolicy,
    /// Publish even when no consumer is detected.
    pub force: bool,
}

impl BusConfig {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut name = BusName::new(cli.bus_name.clone())
            .with_context(|| format!("invalid --bus-name {:?}", cli.bus_name))?;
        if cli.global {
            name = name.global();
        }
        Ok(Self {
            name,
            publish_timeout: cli.publish_timeout_ms.map(Duration::from_millis),
            oversize: cli.oversize.into(),
            force: cli.force,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn flags_are_converted() {
        let cli = Cli::try_parse_from([
            "dbwinfwd",
            "--bus-name",
            "MYBUS",
            "--global",
            "--publish-timeout-ms",
            "250",
            "--oversize",
            "reject",
            "probe",
        ])
        .unwrap();
        let config = BusConfig::from_cli(&cli).unwrap();
        assert_eq!(config.name.base(), "MYBUS");
        assert!(config.name.is_global());
        assert_eq!(config.publish_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.oversize, OversizePolicy::Reject);
        assert!(!config.force);
    }

    #[test]
    fn invalid_bus_name_is_rejected() {
        let cli = Cli::try_parse_from(["dbwinfwd", "--bus-name", "a/b", "probe"]).unwrap();
        let err = BusConfig::from_cli(&cli).unwrap_err();
        assert!(err.to_string().contains("--bus-name"), "got: {err:#}");
    }
}
