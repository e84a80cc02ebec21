//! Request builders and response projections for the `Products`
//! section. Builders translate the caller's arguments into Amazon's
//! parameter names; projections flatten the normalized XML into the
//! JSON records workers consume. Keys whose value is absent in the
//! response are omitted from the records.
use amz_xml::{AmzXmlResponse, Node};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::args::{marketplace_param, optional_str, required_str, required_value, ArgSet};

pub fn build_request(
    action: &str,
    args: &[Value],
    kwargs: &Map<String, Value>,
    default_market: &str,
) -> anyhow::Result<BTreeMap<String, Value>> {
    match action {
        "GetServiceStatus" => Ok(ArgSet::new(args, kwargs).into_params()),
        "ListMatchingProducts" => {
            let mut set = ArgSet::new(args, kwargs);
            let query = required_str(&mut set, "query", 0)?;
            let marketplace = marketplace_param(&mut set, default_market);

            let mut params = BTreeMap::from([
                ("Query".to_string(), json!(query)),
                ("MarketplaceId".to_string(), json!(marketplace)),
            ]);
            if let Some(context) = optional_str(&mut set, "query_context_id") {
                params.insert("QueryContextId".to_string(), json!(context));
            }
            params.extend(set.into_params());
            Ok(params)
        }
        "GetMyFeesEstimate" => {
            let mut set = ArgSet::new(args, kwargs);
            let asin = required_str(&mut set, "asin", 0)?;
            let price = required_value(&mut set, "price", 1)?;
            let marketplace = marketplace_param(&mut set, default_market);

            let request = json!({
                "MarketplaceId": marketplace,
                "IdType": "ASIN",
                "IdValue": asin,
                "IsAmazonFulfilled": "true",
                "Identifier": "request1",
                "PriceToEstimateFees.ListingPrice.CurrencyCode": "USD",
                "PriceToEstimateFees.ListingPrice.Amount": price,
            });

            let mut params = BTreeMap::from([(
                "FeesEstimateRequestList".to_string(),
                Value::Array(vec![request]),
            )]);
            params.extend(set.into_params());
            Ok(params)
        }
        "GetCompetitivePricingForASIN" => {
            let mut set = ArgSet::new(args, kwargs);
            let asin = required_str(&mut set, "asin", 0)?;
            let marketplace = marketplace_param(&mut set, default_market);

            let mut params = BTreeMap::from([
                ("MarketplaceId".to_string(), json!(marketplace)),
                ("ASINList".to_string(), json!([asin])),
            ]);
            params.extend(set.into_params());
            Ok(params)
        }
        other => anyhow::bail!("no request builder for Products.{other}"),
    }
}

pub fn project(action: &str, response: &AmzXmlResponse) -> anyhow::Result<Value> {
    match action {
        "GetServiceStatus" => Ok(json!(response.root().text_at(".//Status"))),
        "ListMatchingProducts" => Ok(project_matching_products(response)),
        "GetMyFeesEstimate" => Ok(json!(float_at(
            response.root(),
            ".//TotalFeesEstimate/Amount"
        ))),
        "GetCompetitivePricingForASIN" => Ok(project_competitive_pricing(response)),
        other => anyhow::bail!("no projection for Products.{other}"),
    }
}

/// First non-empty text among `paths`, evaluated against `node`.
fn first_text<'a>(node: &'a Node, paths: &[&str]) -> Option<&'a str> {
    paths
        .iter()
        .find_map(|path| node.text_at(path).filter(|text| !text.is_empty()))
}

/// serde_json cannot represent non-finite numbers, and "NaN" parses
/// as a valid f64.
pub(crate) fn float_at(node: &Node, path: &str) -> Option<f64> {
    node.value_at::<f64>(path).filter(|value| value.is_finite())
}

fn insert_str(record: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        record.insert(key.to_string(), json!(value));
    }
}

fn is_numeric(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

fn project_matching_products(response: &AmzXmlResponse) -> Value {
    let mut results = Vec::new();

    for product in response.root().descendants("Product") {
        let mut record = Map::new();

        insert_str(
            &mut record,
            "sku",
            product.text_at("./Identifiers/MarketplaceASIN/ASIN"),
        );
        insert_str(
            &mut record,
            "brand",
            first_text(
                product,
                &[".//Brand", ".//Manufacturer", ".//Label", ".//Publisher", ".//Studio"],
            ),
        );
        insert_str(
            &mut record,
            "model",
            first_text(product, &[".//Model", ".//PartNumber"]),
        );
        if let Some(price) = float_at(product, ".//ListPrice/Amount") {
            record.insert("price".to_string(), json!(price));
        }
        if let Some(count) = product.value_at::<i64>(".//NumberOfItems") {
            record.insert("NumberOfItems".to_string(), json!(count));
        }
        if let Some(count) = product.value_at::<i64>(".//PackageQuantity") {
            record.insert("PackageQuantity".to_string(), json!(count));
        }
        insert_str(&mut record, "image_url", product.text_at(".//SmallImage/URL"));
        insert_str(&mut record, "title", product.text_at(".//Title"));

        // The first sales rank in a browse category, skipping the
        // numeric website-display category ids.
        for rank in product.descendants("SalesRank") {
            let Some(category) = rank.text_at("./ProductCategoryId") else {
                continue;
            };
            if !is_numeric(category) {
                record.insert("category".to_string(), json!(category));
                if let Some(value) = rank.value_at::<i64>("./Rank") {
                    record.insert("rank".to_string(), json!(value));
                }
                break;
            }
        }

        let description = product
            .descendants("Feature")
            .iter()
            .filter_map(|feature| feature.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        if !description.is_empty() {
            record.insert("description".to_string(), json!(description));
        }

        results.push(Value::Object(record));
    }

    Value::Array(results)
}

fn project_competitive_pricing(response: &AmzXmlResponse) -> Value {
    let mut results = Map::new();

    for result in response
        .root()
        .descendants("GetCompetitivePricingForASINResult")
    {
        let sku = result.attr("ASIN").unwrap_or_default().to_string();
        let mut price = Map::new();

        if result.attr("status") != Some("Success") {
            let code = result.text_at(".//Error/Code").unwrap_or_default();
            let message = result.text_at(".//Error/Message").unwrap_or_default();
            price.insert("error".to_string(), json!(format!("{code}: {message}")));
            results.insert(sku, Value::Object(price));
            continue;
        }

        for competitive in result.descendants("CompetitivePrice") {
            if competitive.attr("condition") != Some("New") {
                continue;
            }
            if let Some(value) = float_at(competitive, ".//ListingPrice/Amount") {
                price.insert("listing_price".to_string(), json!(value));
            }
            if let Some(value) = float_at(competitive, ".//Shipping/Amount") {
                price.insert("shipping".to_string(), json!(value));
            }
            if let Some(value) = float_at(competitive, ".//LandedPrice/Amount") {
                price.insert("landed_price".to_string(), json!(value));
            }
        }

        let mut offers = 0i64;
        for count in result.descendants("OfferListingCount") {
            if count.attr("condition") == Some("New") {
                if let Some(value) = count.text.as_deref().and_then(|t| t.parse().ok()) {
                    offers = value;
                }
            }
        }
        price.insert("offers".to_string(), json!(offers));

        results.insert(sku, Value::Object(price));
    }

    Value::Object(results)
}
