//! Single-run parameter file.
//!
//! One `key=value` per line with `#` comments, read as TOML. The keys follow
//! the baseline experiment files (`n`, `V`, `d_star`, ...); gains of the
//! symmetric law map onto [`SymmetricGains`].
//!
//! Agents start evenly spread over the perimeter with `d_star` as the
//! spacing target only. Commands are applied without a rate limit unless
//! `max_accel` is set. With `resilience` on, each loss is replaced by at
//! most one spare, up to `num_losses`, holding nominal speed for
//! `incoming_hold_steps` steps.

use anyhow::{Context, Result};
use fleet_core::{
    ControlPolicy, Layout, RunConfig, Scenario, SpareEntry, SpareTrigger, SymmetricGains,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamFile {
    /// Number of agents, all active at start
    pub n: usize,
    pub perimeter: f64,
    #[serde(rename = "V", default = "default_v")]
    pub v: f64,
    #[serde(rename = "Vmax", default = "default_vmax")]
    pub v_max: f64,
    #[serde(default = "default_d_star")]
    pub d_star: f64,
    #[serde(default = "default_d_safe")]
    pub d_safe: f64,
    #[serde(default = "default_k_sym")]
    pub k_sym: f64,
    #[serde(default = "default_k_sym")]
    pub k_sym_rec: f64,
    /// Older files name the symmetric gain `w_back`; it overrides `k_sym`
    #[serde(default)]
    pub w_back: Option<f64>,
    #[serde(default = "default_k_rep")]
    pub k_rep: f64,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_beta")]
    pub beta: f64,
    #[serde(rename = "V_cap", default = "default_v_cap")]
    pub v_cap: f64,
    #[serde(default = "default_steps")]
    pub steps: u64,
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Losses to generate when the loss file is missing or empty
    #[serde(default)]
    pub num_losses: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Non-zero enables spare insertion after losses
    #[serde(default)]
    pub resilience: u32,
    #[serde(default)]
    pub min_spare_delay_steps: u64,
    /// Steps an inserted spare holds `V` before following the control law
    #[serde(default = "default_incoming_hold_steps")]
    pub incoming_hold_steps: u64,
    /// Acceleration limit; commands are applied directly when unset
    #[serde(default)]
    pub max_accel: Option<f64>,
    /// Table policy id; the symmetric law when unset
    #[serde(default)]
    pub policy: Option<u32>,
}

fn default_v() -> f64 {
    1.0
}
fn default_vmax() -> f64 {
    2.0
}
fn default_d_star() -> f64 {
    5.0
}
fn default_d_safe() -> f64 {
    1.0
}
fn default_k_sym() -> f64 {
    0.5
}
fn default_k_rep() -> f64 {
    0.2
}
fn default_alpha() -> f64 {
    1.2
}
fn default_beta() -> f64 {
    0.8
}
fn default_v_cap() -> f64 {
    1.5
}
fn default_steps() -> u64 {
    500
}
fn default_dt() -> f64 {
    0.1
}
fn default_seed() -> u64 {
    1
}
fn default_incoming_hold_steps() -> u64 {
    50
}

impl ParamFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid parameter file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("In {}", path.display()))
    }

    /// Scenario of this run. Every slot starts active.
    pub fn scenario(&self) -> Scenario {
        let even_spacing = self.perimeter / self.n.max(1) as f64;
        if (even_spacing - self.d_star).abs() > 1e-9 {
            warn!(
                d_star = self.d_star,
                even_spacing,
                "d_star differs from perimeter / n, agents start at perimeter / n"
            );
        }
        Scenario {
            perimeter: self.perimeter,
            capacity: self.n,
            initial_active: self.n,
            v_nominal: self.v,
            v_max: self.v_max,
            nominal_spacing: self.d_star,
            policy: self.policy.map_or(ControlPolicy::Symmetric, ControlPolicy::from),
            failure_rate: 0.0,
            failure_count: self.num_losses,
            seed: self.seed,
            ..Default::default()
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            steps: self.steps,
            dt: self.dt,
            min_spare_delay_steps: self.min_spare_delay_steps,
            max_accel: self.max_accel,
            layout: Layout::EvenPerimeter,
            spare_trigger: if self.resilience != 0 {
                SpareTrigger::AfterLoss {
                    max_spares: self.num_losses,
                }
            } else {
                SpareTrigger::Disabled
            },
            spare_entry: SpareEntry::Hold {
                steps: self.incoming_hold_steps,
            },
            symmetric: SymmetricGains {
                k_sym: self.w_back.unwrap_or(self.k_sym),
                k_sym_rec: self.k_sym_rec,
                d_safe: self.d_safe,
                k_rep: self.k_rep,
                v_cap: self.v_cap,
                alpha: self.alpha,
                beta: self.beta,
            },
            ..Default::default()
        }
    }
}
