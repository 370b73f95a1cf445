//! Deterministic delay propagation.
//!
//! A delay shrinks by a fixed recovery allowance at each following station,
//! and compounds across the network by a factor that grows with its size.
//! The thresholds (15, 30 and 60 minutes) also set the risk tier.

use std::fmt;

use railmind_common::Priority;
use serde::Serialize;

/// Minutes a delayed train makes up at each following station.
pub const RECOVERY_PER_STATION: u64 = 3;
/// Following stations the projection covers.
pub const PROJECTED_STATIONS: usize = 5;
/// A connecting passenger is likely stranded above this delay.
pub const MISSED_CONNECTION_MINUTES: u64 = 20;
/// Share of passengers assumed to hold an onward connection.
pub const CONNECTING_SHARE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPotential {
    High,
    Medium,
    Low,
}

impl RecoveryPotential {
    fn for_delay(minutes: u64) -> Self {
        if minutes < 15 {
            Self::High
        } else if minutes < 30 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for RecoveryPotential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        })
    }
}

/// Load on the network as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStress {
    Normal,
    Moderate,
    High,
    Critical,
}

impl fmt::Display for SystemStress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownstreamDelay {
    /// 1 for the next station
    pub station_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
    pub estimated_delay_minutes: u64,
    pub recovery_potential: RecoveryPotential,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelayPropagation {
    pub initial_delay_minutes: u64,
    pub propagation_factor: f64,
    pub downstream: Vec<DownstreamDelay>,
    /// How far down the line the train is back on time
    pub recovery_estimate: &'static str,
    pub risk: Priority,
}

/// Multiplier for how much a delay of `minutes` compounds.
pub fn propagation_factor(minutes: u64) -> f64 {
    match minutes {
        0..=15 => 1.0,
        16..=30 => 1.1,
        31..=60 => 1.2,
        _ => 1.3,
    }
}

pub fn recovery_estimate(minutes: u64) -> &'static str {
    match minutes {
        0..=15 => "1-2 stations",
        16..=30 => "3-4 stations",
        31..=60 => "5-6 stations",
        _ => "7+ stations or may not fully recover",
    }
}

pub fn risk_for_delay(minutes: u64) -> Priority {
    match minutes {
        0..=15 => Priority::Low,
        16..=30 => Priority::Medium,
        31..=60 => Priority::High,
        _ => Priority::Critical,
    }
}

/// Projects a delay over the next stations. `stations` names them when the
/// route is known; projections past its end stay unnamed.
pub fn simulate_delay(minutes: u64, stations: &[String]) -> DelayPropagation {
    let mut remaining = minutes;
    let mut downstream = Vec::new();
    for index in 0..PROJECTED_STATIONS {
        remaining = remaining.saturating_sub(RECOVERY_PER_STATION);
        if remaining == 0 {
            break;
        }
        downstream.push(DownstreamDelay {
            station_index: index + 1,
            station: stations.get(index).cloned(),
            estimated_delay_minutes: remaining,
            recovery_potential: RecoveryPotential::for_delay(remaining),
        });
    }
    DelayPropagation {
        initial_delay_minutes: minutes,
        propagation_factor: propagation_factor(minutes),
        downstream,
        recovery_estimate: recovery_estimate(minutes),
        risk: risk_for_delay(minutes),
    }
}

impl DelayPropagation {
    /// Section for an operations prompt.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "## Delay propagation\nInitial delay: {} minutes\nPropagation factor: {:.1}\nRisk: {}\nBack on schedule within: {}\n",
            self.initial_delay_minutes,
            self.propagation_factor,
            self.risk,
            self.recovery_estimate,
        );
        for d in &self.downstream {
            let at = d
                .station
                .clone()
                .unwrap_or_else(|| format!("station +{}", d.station_index));
            out.push_str(&format!(
                "- {at}: about {} minutes late ({} recovery potential)\n",
                d.estimated_delay_minutes, d.recovery_potential
            ));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelayedTrain {
    pub train_number: String,
    pub delay_minutes: u64,
    pub passengers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissedConnection {
    pub train_number: String,
    pub passengers_affected: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeSummary {
    pub trains_affected: usize,
    pub total_delay_minutes: u64,
    pub average_delay_minutes: f64,
    pub missed_connections: Vec<MissedConnection>,
    pub stress: SystemStress,
}

/// Network-wide effect of several delayed trains.
pub fn simulate_cascade(trains: &[DelayedTrain]) -> CascadeSummary {
    let total: u64 = trains.iter().map(|t| t.delay_minutes).sum();
    let average = if trains.is_empty() {
        0.0
    } else {
        total as f64 / trains.len() as f64
    };
    let missed_connections = trains
        .iter()
        .filter(|t| t.delay_minutes > MISSED_CONNECTION_MINUTES)
        .map(|t| MissedConnection {
            train_number: t.train_number.clone(),
            passengers_affected: (t.passengers as f64 * CONNECTING_SHARE).round() as u64,
        })
        .collect();
    let stress = if average <= 15.0 {
        SystemStress::Normal
    } else if average <= 30.0 {
        SystemStress::Moderate
    } else if average <= 60.0 {
        SystemStress::High
    } else {
        SystemStress::Critical
    };
    CascadeSummary {
        trains_affected: trains.len(),
        total_delay_minutes: total,
        average_delay_minutes: average,
        missed_connections,
        stress,
    }
}
