use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription tier. The surrounding billing provider speaks free-text plan
/// keys; inside the core this is a closed enumeration and anything
/// unrecognized degrades to Free rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub enum Membership {
    Free,
    Pro,
    Premium,
}

impl Membership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Membership::Free => "free",
            Membership::Pro => "pro",
            Membership::Premium => "premium",
        }
    }

    /// Normalize a provider plan key to a tier. Unknown keys map to Free.
    pub fn from_plan_key(key: &str) -> Self {
        match key.trim().to_lowercase().as_str() {
            "pro" => Membership::Pro,
            "premium" => Membership::Premium,
            _ => Membership::Free,
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, Membership::Free)
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-tier plan definition.
#[derive(Debug, Clone, Copy)]
pub struct PlanDefinition {
    /// Stories included per billing period.
    pub base_quota: u32,
    /// Whether the tier may purchase add-on credit packs.
    pub allows_add_ons: bool,
}

/// Static tier → entitlement mapping. Pure and infallible: every Membership
/// value resolves to a definition.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    free: PlanDefinition,
    pro: PlanDefinition,
    premium: PlanDefinition,
}

impl PlanCatalog {
    pub fn new(free: PlanDefinition, pro: PlanDefinition, premium: PlanDefinition) -> Self {
        Self { free, pro, premium }
    }

    pub fn from_config(config: &config::PlansConfig) -> Self {
        Self {
            free: PlanDefinition {
                base_quota: config.free_quota,
                allows_add_ons: false,
            },
            pro: PlanDefinition {
                base_quota: config.pro_quota,
                allows_add_ons: true,
            },
            premium: PlanDefinition {
                base_quota: config.premium_quota,
                allows_add_ons: true,
            },
        }
    }

    pub fn definition(&self, membership: Membership) -> &PlanDefinition {
        match membership {
            Membership::Free => &self.free,
            Membership::Pro => &self.pro,
            Membership::Premium => &self.premium,
        }
    }

    pub fn base_quota(&self, membership: Membership) -> u32 {
        self.definition(membership).base_quota
    }

    pub fn allows_add_ons(&self, membership: Membership) -> bool {
        self.definition(membership).allows_add_ons
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            free: PlanDefinition {
                base_quota: 1,
                allows_add_ons: false,
            },
            pro: PlanDefinition {
                base_quota: 10,
                allows_add_ons: true,
            },
            premium: PlanDefinition {
                base_quota: 30,
                allows_add_ons: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_plan_key_degrades_to_free() {
        assert_eq!(Membership::from_plan_key("enterprise"), Membership::Free);
        assert_eq!(Membership::from_plan_key(""), Membership::Free);
        assert_eq!(Membership::from_plan_key("  PRO "), Membership::Pro);
        assert_eq!(Membership::from_plan_key("Premium"), Membership::Premium);
    }

    #[test]
    fn test_catalog_defaults() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.base_quota(Membership::Free), 1);
        assert_eq!(catalog.base_quota(Membership::Pro), 10);
        assert_eq!(catalog.base_quota(Membership::Premium), 30);
        assert!(!catalog.allows_add_ons(Membership::Free));
        assert!(catalog.allows_add_ons(Membership::Pro));
        assert!(catalog.allows_add_ons(Membership::Premium));
    }

    #[test]
    fn test_catalog_from_config() {
        let catalog = PlanCatalog::from_config(&config::PlansConfig {
            free_quota: 2,
            pro_quota: 20,
            premium_quota: 50,
            add_on_carryover: false,
            consumption_order: "base_first".to_string(),
            free_cycle_days: 30,
        });
        assert_eq!(catalog.base_quota(Membership::Pro), 20);
        assert!(!catalog.allows_add_ons(Membership::Free));
    }
}
