//! Endpoint hosts and marketplace identifiers for the MWS and Product
//! Advertising APIs. Two-letter codes resolve through these tables;
//! anything longer is treated as a literal host or marketplace id by
//! the callers.

/// MWS API hosts, keyed by region code.
pub const MWS_DOMAINS: &[(&str, &str)] = &[
    ("NA", "mws.amazonservices.com"),
    ("EU", "mws-eu.amazonservices.com"),
    ("IN", "mws.amazonservices.in"),
    ("CN", "mws.amazonservices.com.cn"),
    ("JP", "mws.amazonservices.jp"),
];

/// Product Advertising API hosts, keyed by country code.
pub const PA_ENDPOINTS: &[(&str, &str)] = &[
    ("BR", "webservices.amazon.com.br"),
    ("CN", "webservices.amazon.cn"),
    ("CA", "webservices.amazon.ca"),
    ("DE", "webservices.amazon.de"),
    ("ES", "webservices.amazon.es"),
    ("FR", "webservices.amazon.fr"),
    ("IN", "webservices.amazon.in"),
    ("IT", "webservices.amazon.it"),
    ("JP", "webservices.amazon.co.jp"),
    ("MX", "webservices.amazon.com.mx"),
    ("UK", "webservices.amazon.co.uk"),
    ("US", "webservices.amazon.com"),
];

/// Amazon marketplace ids, keyed by country code.
pub const MARKETPLACE_IDS: &[(&str, &str)] = &[
    ("CA", "A2EUQ1WTGCTBG2"),
    ("MX", "A1AM78C64UM0Y8"),
    ("US", "ATVPDKIKX0DER"),
    ("DE", "A1PA6795UKMFR9"),
    ("ES", "A1RKKUPIHCS9HS"),
    ("FR", "A13V1IB3VIYZZH"),
    ("IT", "APJ6JRA9NG5V4"),
    ("UK", "A1F83G8C2ARO7P"),
    ("IN", "A21TJRUUN4KGV"),
    ("JP", "A21TJRUUN4KGV"),
    ("CN", "AAHKV2X7AFYLW"),
];

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table
        .iter()
        .find_map(|(k, v)| if *k == key { Some(*v) } else { None })
}

pub fn mws_domain(region: &str) -> Option<&'static str> {
    lookup(MWS_DOMAINS, region)
}

pub fn pa_endpoint(region: &str) -> Option<&'static str> {
    lookup(PA_ENDPOINTS, region)
}

pub fn marketplace_id(country: &str) -> Option<&'static str> {
    lookup(MARKETPLACE_IDS, country)
}

/// Normalize a per-call marketplace designation: two-letter codes are
/// resolved through the marketplace table, falling back to the US
/// marketplace for unrecognized codes; longer strings pass through as
/// literal marketplace ids.
pub fn normalize_marketplace(input: &str) -> String {
    if input.len() > 2 {
        input.to_string()
    } else {
        marketplace_id(input)
            .unwrap_or("ATVPDKIKX0DER")
            .to_string()
    }
}

pub fn known_regions() -> String {
    MWS_DOMAINS
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn known_marketplaces() -> String {
    MARKETPLACE_IDS
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(", ")
}
