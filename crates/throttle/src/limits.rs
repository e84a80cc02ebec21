//! Static throttling tables: the documented per-action quotas and the
//! per-priority quota overrides.
use std::collections::HashMap;

/// The leaky-bucket envelope for one action. `restore_rate` is the
/// number of seconds it takes for one unit of quota to come back.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionLimits {
    pub quota_max: u64,
    pub restore_rate: f64,
    pub hourly_max: Option<u64>,
}

impl ActionLimits {
    const fn new(quota_max: u64, restore_rate: f64, hourly_max: Option<u64>) -> Self {
        Self {
            quota_max,
            restore_rate,
            hourly_max,
        }
    }
}

const DEFAULT_LIMITS: &[(&str, ActionLimits)] = &[
    ("ListMatchingProducts", ActionLimits::new(20, 5.0, Some(720))),
    ("GetMatchingProduct", ActionLimits::new(20, 0.5, Some(7200))),
    (
        "GetMatchingProductForId",
        ActionLimits::new(20, 0.2, Some(18000)),
    ),
    (
        "GetCompetitivePricingForSKU",
        ActionLimits::new(20, 0.1, Some(36000)),
    ),
    (
        "GetCompetitivePricingForASIN",
        ActionLimits::new(20, 0.1, Some(36000)),
    ),
    (
        "GetLowestOfferListingsForSKU",
        ActionLimits::new(20, 0.1, Some(36000)),
    ),
    (
        "GetLowestOfferListingsForASIN",
        ActionLimits::new(20, 0.1, Some(36000)),
    ),
    (
        "GetLowestPricedOffersForSKU",
        ActionLimits::new(10, 0.2, Some(200)),
    ),
    (
        "GetLowestPricedOffersForASIN",
        ActionLimits::new(10, 0.2, Some(36000)),
    ),
    ("GetMyFeesEstimate", ActionLimits::new(20, 0.1, Some(36000))),
    ("GetMyPriceForSKU", ActionLimits::new(20, 0.1, Some(36000))),
    ("GetMyPriceForASIN", ActionLimits::new(20, 0.1, Some(36000))),
    (
        "GetProductCategoriesForSKU",
        ActionLimits::new(20, 5.0, Some(720)),
    ),
    (
        "GetProductCategoriesForASIN",
        ActionLimits::new(20, 5.0, Some(720)),
    ),
    ("GetServiceStatus", ActionLimits::new(2, 300.0, None)),
];

/// The documented limits for every throttled action. Cloned into each
/// throttler instance so per-call overrides never race across
/// gateways.
pub fn default_limits() -> HashMap<String, ActionLimits> {
    DEFAULT_LIMITS
        .iter()
        .map(|(name, limits)| (name.to_string(), limits.clone()))
        .collect()
}

/// Priorities above this clamp down to it.
pub const MAX_PRIORITY: i64 = 2;

/// The quota ceiling for `action` at the given priority, if that
/// action participates in priority scheduling. Priorities above
/// [`MAX_PRIORITY`] clamp; priorities below zero match no table.
pub fn priority_quota(action: &str, priority: i64) -> Option<u64> {
    let table: &[(&str, u64)] = match priority.min(MAX_PRIORITY) {
        0 => &[
            ("GetServiceStatus", 1),
            ("ListMatchingProducts", 1),
            ("GetMyFeesEstimate", 1),
        ],
        1 => &[
            ("GetServiceStatus", 1),
            ("ListMatchingProducts", 5),
            ("GetMyFeesEstimate", 5),
        ],
        2 => &[
            ("GetServiceStatus", 2),
            ("ListMatchingProducts", 20),
            ("GetMyFeesEstimate", 20),
        ],
        _ => return None,
    };

    table
        .iter()
        .find_map(|(name, quota)| if *name == action { Some(*quota) } else { None })
}
