//! Subscription tiers and the tier allowance resolver.
//!
//! The catalog is static configuration: immutable after construction and
//! safely shared by any number of concurrent callers. Unknown tier labels
//! resolve to the free tier so a billing misconfiguration degrades to "most
//! restrictive", never to "most permissive".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Monthly credit allowance for the free tier.
pub const FREE_TIER_CREDITS: i64 = 10;

/// Monthly credit allowance for the starter tier.
pub const STARTER_TIER_CREDITS: i64 = 100;

/// Monthly credit allowance for the professional tier.
pub const PROFESSIONAL_TIER_CREDITS: i64 = 500;

/// Display sentinel for the allowance of unlimited tiers.
///
/// Display-only: the authoritative unlimited signal is always the
/// `is_unlimited` flag, never this value.
pub const UNLIMITED_ALLOWANCE_SENTINEL: i64 = -1;

/// A named subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Free tier: a small monthly allowance for trials.
    Free,

    /// Starter tier: individual marketers.
    Starter,

    /// Professional tier: power users, cheaper report exports.
    Professional,

    /// Agency tier: unlimited usage, billed flat.
    Agency,
}

impl Tier {
    /// Get the tier label as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Agency => "agency",
        }
    }

    /// Parse a tier label, falling back to `Free` for unknown labels.
    #[must_use]
    pub fn parse_or_free(label: &str) -> Self {
        label.parse().unwrap_or(Self::Free)
    }
}

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "professional" => Ok(Self::Professional),
            "agency" => Ok(Self::Agency),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized tier label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tier: {0}")]
pub struct UnknownTier(
    /// The label that did not match any tier.
    pub String,
);

/// A billable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Rule-based quick pass over a single piece of ad copy.
    BasicAnalysis,

    /// Full scoring pipeline over a piece of ad copy.
    FullAnalysis,

    /// Rendered report export (PDF/share link).
    ReportExport,
}

impl Operation {
    /// Get the operation label as it appears in transaction records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BasicAnalysis => "BASIC_ANALYSIS",
            Self::FullAnalysis => "FULL_ANALYSIS",
            Self::ReportExport => "REPORT_EXPORT",
        }
    }

    /// All operations, for building cost tables.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::BasicAnalysis, Self::FullAnalysis, Self::ReportExport]
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved configuration for a single tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Credits granted each monthly reset cycle.
    pub monthly_allowance: i64,

    /// Whether balance checks are bypassed entirely.
    pub is_unlimited: bool,

    /// Credit cost per operation.
    pub costs: HashMap<Operation, i64>,
}

impl TierConfig {
    /// Credit cost of an operation on this tier.
    ///
    /// Operations absent from the table cost 1 credit; the table is built
    /// from `Operation::all()` so this is a safety net, not a pricing rule.
    #[must_use]
    pub fn cost_of(&self, operation: Operation) -> i64 {
        self.costs.get(&operation).copied().unwrap_or(1)
    }

    /// Allowance as reported to clients: `-1` for unlimited tiers.
    #[must_use]
    pub const fn display_allowance(&self) -> i64 {
        if self.is_unlimited {
            UNLIMITED_ALLOWANCE_SENTINEL
        } else {
            self.monthly_allowance
        }
    }
}

/// The tier allowance resolver: maps tiers to allowance, unlimited flag,
/// and per-operation cost tables.
#[derive(Debug, Clone)]
pub struct TierCatalog {
    configs: HashMap<Tier, TierConfig>,
}

impl Default for TierCatalog {
    fn default() -> Self {
        let base_costs: HashMap<Operation, i64> = [
            (Operation::BasicAnalysis, 1),
            (Operation::FullAnalysis, 2),
            (Operation::ReportExport, 5),
        ]
        .into_iter()
        .collect();

        let mut discounted_costs = base_costs.clone();
        discounted_costs.insert(Operation::ReportExport, 4);

        let mut configs = HashMap::new();
        configs.insert(
            Tier::Free,
            TierConfig {
                monthly_allowance: FREE_TIER_CREDITS,
                is_unlimited: false,
                costs: base_costs.clone(),
            },
        );
        configs.insert(
            Tier::Starter,
            TierConfig {
                monthly_allowance: STARTER_TIER_CREDITS,
                is_unlimited: false,
                costs: base_costs,
            },
        );
        configs.insert(
            Tier::Professional,
            TierConfig {
                monthly_allowance: PROFESSIONAL_TIER_CREDITS,
                is_unlimited: false,
                costs: discounted_costs.clone(),
            },
        );
        configs.insert(
            Tier::Agency,
            TierConfig {
                monthly_allowance: UNLIMITED_ALLOWANCE_SENTINEL,
                is_unlimited: true,
                costs: discounted_costs,
            },
        );

        Self { configs }
    }
}

impl TierCatalog {
    /// Resolve a tier's configuration.
    ///
    /// # Panics
    ///
    /// Never panics: the catalog is constructed with every `Tier` variant
    /// present, and falls back to the free tier configuration otherwise.
    #[must_use]
    pub fn resolve(&self, tier: Tier) -> &TierConfig {
        self.configs
            .get(&tier)
            .or_else(|| self.configs.get(&Tier::Free))
            .expect("catalog always contains the free tier")
    }

    /// Resolve a tier by label, falling back to the free tier for unknown
    /// labels.
    #[must_use]
    pub fn resolve_label(&self, label: &str) -> (Tier, &TierConfig) {
        let tier = Tier::parse_or_free(label);
        (tier, self.resolve(tier))
    }

    /// Credit cost of an operation on a tier.
    #[must_use]
    pub fn cost(&self, tier: Tier, operation: Operation) -> i64 {
        self.resolve(tier).cost_of(operation)
    }

    /// All tiers with their configurations, for the public costs endpoint.
    #[must_use]
    pub fn tiers(&self) -> Vec<(Tier, &TierConfig)> {
        let mut entries: Vec<_> = self.configs.iter().map(|(t, c)| (*t, c)).collect();
        entries.sort_by_key(|(t, _)| t.as_str());
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_label_roundtrip() {
        for tier in [Tier::Free, Tier::Starter, Tier::Professional, Tier::Agency] {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
    }

    #[test]
    fn unknown_tier_falls_back_to_free() {
        let catalog = TierCatalog::default();
        let (tier, config) = catalog.resolve_label("platinum-legacy");
        assert_eq!(tier, Tier::Free);
        assert_eq!(config.monthly_allowance, FREE_TIER_CREDITS);
        assert!(!config.is_unlimited);
    }

    #[test]
    fn full_analysis_costs_more_than_basic() {
        let catalog = TierCatalog::default();
        let basic = catalog.cost(Tier::Free, Operation::BasicAnalysis);
        let full = catalog.cost(Tier::Free, Operation::FullAnalysis);
        assert!(full > basic);
        assert_eq!(full, 2);
    }

    #[test]
    fn professional_report_export_is_discounted() {
        let catalog = TierCatalog::default();
        assert_eq!(catalog.cost(Tier::Starter, Operation::ReportExport), 5);
        assert_eq!(catalog.cost(Tier::Professional, Operation::ReportExport), 4);
    }

    #[test]
    fn agency_is_unlimited_with_display_sentinel() {
        let catalog = TierCatalog::default();
        let config = catalog.resolve(Tier::Agency);
        assert!(config.is_unlimited);
        assert_eq!(config.display_allowance(), UNLIMITED_ALLOWANCE_SENTINEL);
    }

    #[test]
    fn operation_labels() {
        assert_eq!(Operation::FullAnalysis.as_str(), "FULL_ANALYSIS");
        assert_eq!(Operation::ReportExport.as_str(), "REPORT_EXPORT");
    }
}
