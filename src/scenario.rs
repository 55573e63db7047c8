//! Named workload shapes run against each target.

use crate::cli::{RunConfig, Workload};
use serde::{Deserialize, Serialize};

/// A workload run against one target with one client count.
///
/// `label` ends up in report file names (`<target>_<label>.json`), so it never
/// contains an underscore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub label: String,
    pub workload: Workload,
    /// memtier `--ratio`, SET:GET
    pub ratio: String,
    pub rate_limit: Option<u32>,
    pub clients: u32,
}

impl Scenario {
    /// Base label for a workload, without the client-count suffix.
    pub fn base_label(workload: Workload) -> &'static str {
        match workload {
            Workload::Balanced => "balanced",
            Workload::WriteHeavy => "writeheavy",
            Workload::ReadHeavy => "readheavy",
            Workload::RateLimited => "ratelimited",
            Workload::All => "all",
        }
    }

    /// SET:GET ratio passed to the load generator.
    pub fn ratio_for(workload: Workload) -> &'static str {
        match workload {
            Workload::Balanced | Workload::RateLimited | Workload::All => "1:1",
            Workload::WriteHeavy => "3:1",
            Workload::ReadHeavy => "1:3",
        }
    }

    pub fn new(workload: Workload, clients: u32, rate_limit: u32, suffix_clients: bool) -> Self {
        let base = Self::base_label(workload);
        let label = if suffix_clients {
            format!("{}-c{}", base, clients)
        } else {
            base.to_string()
        };

        Self {
            label,
            workload,
            ratio: Self::ratio_for(workload).to_string(),
            rate_limit: (workload == Workload::RateLimited).then_some(rate_limit),
            clients,
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} clients, ratio {}", self.workload, self.clients, self.ratio)?;
        if let Some(rate) = self.rate_limit {
            write!(f, ", {} req/s per connection", rate)?;
        }
        write!(f, ")")
    }
}

/// Every scenario of a run, workload-major then client count.
pub fn scenarios(config: &RunConfig) -> Vec<Scenario> {
    let suffix_clients = config.clients.len() > 1;
    let mut scenarios = Vec::with_capacity(config.workloads.len() * config.clients.len());

    for workload in Workload::expand_all(config.workloads.clone()) {
        for clients in &config.clients {
            scenarios.push(Scenario::new(workload, *clients, config.rate_limit, suffix_clients));
        }
    }

    scenarios
}
