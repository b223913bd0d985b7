//! Priorities driving the fitness of agents.

use crate::agent::{Agent, AgentKind};
use crate::config::{MarketConfig, check_num};
use crate::world::WorldMap;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Named metric an agent may care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    OwnProfits,
    CommunityWealth,
    WildFishPrice,
    SalmonPrice,
    FishingIndustryExisting,
    NaturalFishHealth,
    AquacultureIndustryExisting,
    NonintrusiveAquaculture,
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let priority = match s {
            "OwnProfits" => Priority::OwnProfits,
            "CommunityWealth" => Priority::CommunityWealth,
            "WildFishPrice" => Priority::WildFishPrice,
            "SalmonPrice" => Priority::SalmonPrice,
            "FishingIndustryExisting" => Priority::FishingIndustryExisting,
            "NaturalFishHealth" => Priority::NaturalFishHealth,
            "AquacultureIndustryExisting" => Priority::AquacultureIndustryExisting,
            "NonintrusiveAquaculture" => Priority::NonintrusiveAquaculture,
            _ => bail!("unknown priority {s:?}"),
        };
        Ok(priority)
    }
}

/// Parse a table of priority names to non-negative weights.
pub fn parse_weights(weights: &BTreeMap<String, f64>) -> Result<Vec<(Priority, f64)>> {
    weights
        .iter()
        .map(|(name, &weight)| -> Result<(Priority, f64)> {
            let priority = name.parse()?;
            check_num(weight, 0.0..1e9).with_context(|| format!("invalid weight of {name}"))?;
            Ok((priority, weight))
        })
        .collect()
}

/// Shared state every priority is evaluated against.
#[derive(Debug, Clone)]
pub struct Influences {
    wild_fish_price: f64,
    farmed_fish_price: f64,
    /// Mean capital of fishermen, aquaculture agents and civilians.
    community_wealth: f64,
    /// Mean capital of fishermen.
    fishing_industry: f64,
    /// Mean fish quantity over the map.
    natural_fish_health: f64,
    aquaculture_existing: bool,
}

impl Influences {
    pub fn gather<'a>(
        agents: impl IntoIterator<Item = &'a Agent>,
        world: &WorldMap,
        market: &MarketConfig,
    ) -> Self {
        let mut community = Vec::new();
        let mut fishermen = Vec::new();
        let mut aquaculture_existing = false;
        for agent in agents {
            match agent.kind() {
                AgentKind::Fisherman => {
                    fishermen.push(agent.capital());
                    community.push(agent.capital());
                }
                AgentKind::Aquaculture => {
                    aquaculture_existing = true;
                    community.push(agent.capital());
                }
                AgentKind::Civilian => community.push(agent.capital()),
                _ => {}
            }
        }
        Self {
            wild_fish_price: market.wild_fish_price,
            farmed_fish_price: market.farmed_fish_price,
            community_wealth: mean(&community),
            fishing_industry: mean(&fishermen),
            natural_fish_health: world.total_fish_quantity() / world.n_cells() as f64,
            aquaculture_existing,
        }
    }

    /// Value of one priority from the point of view of `agent`.
    pub fn value(&self, priority: Priority, agent: &Agent, world: &WorldMap) -> f64 {
        match priority {
            Priority::OwnProfits => agent.capital(),
            Priority::CommunityWealth => self.community_wealth,
            Priority::WildFishPrice => self.wild_fish_price,
            Priority::SalmonPrice => self.farmed_fish_price,
            Priority::FishingIndustryExisting => self.fishing_industry,
            Priority::NaturalFishHealth => self.natural_fish_health,
            Priority::AquacultureIndustryExisting => {
                if self.aquaculture_existing {
                    1.0
                } else {
                    0.0
                }
            }
            Priority::NonintrusiveAquaculture => {
                let care_cells = agent.voter().map(|v| v.care_cells()).unwrap_or_default();
                if care_cells.is_empty() {
                    return 1.0;
                }
                let n_free = care_cells
                    .iter()
                    .filter(|&&pos| !world.cell(pos).has_aquaculture())
                    .count();
                n_free as f64 / care_cells.len() as f64
            }
        }
    }

    /// Weighted mean of the agent's priorities (0 when it has no weight).
    pub fn fitness(&self, agent: &Agent, world: &WorldMap) -> f64 {
        let (sum, total) = agent
            .priorities()
            .iter()
            .fold((0.0, 0.0), |(sum, total), &(priority, weight)| {
                (sum + weight * self.value(priority, agent, world), total + weight)
            });
        if total > 0.0 { sum / total } else { 0.0 }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
