//! Request builder and projection for the Product Advertising API.
//! PA calls are GETs against the `/onca/xml` endpoint and carry the
//! `Service=AWSECommerceService` parameter, which the gateway injects
//! for every PA action.
use amz_xml::AmzXmlResponse;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::args::{optional_str, ArgSet};

pub fn build_request(
    action: &str,
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> anyhow::Result<BTreeMap<String, Value>> {
    match action {
        "ItemLookup" => {
            let mut set = ArgSet::new(args, kwargs);
            let item_id = match set.take("item_id", 0).or_else(|| set.take_kwarg("asin")) {
                Some(Value::String(value)) => value,
                Some(other) => anyhow::bail!("item_id must be a string, got {other}"),
                None => anyhow::bail!("missing required argument: item_id"),
            };

            let mut params = BTreeMap::from([("ItemId".to_string(), json!(item_id))]);
            if let Some(group) = optional_str(&mut set, "response_group") {
                params.insert("ResponseGroup".to_string(), json!(group));
            }
            params.extend(set.into_params());
            Ok(params)
        }
        other => anyhow::bail!("no request builder for ProductAdvertising.{other}"),
    }
}

pub fn project(action: &str, response: &AmzXmlResponse) -> anyhow::Result<Value> {
    match action {
        "ItemLookup" => Ok(project_item_lookup(response)),
        other => anyhow::bail!("no projection for ProductAdvertising.{other}"),
    }
}

fn project_item_lookup(response: &AmzXmlResponse) -> Value {
    let mut results = Vec::new();

    for item in response.root().descendants("Item") {
        let mut record = Map::new();

        if let Some(asin) = item.text_at("./ASIN") {
            record.insert("asin".to_string(), json!(asin));
        }
        if let Some(title) = item.text_at(".//Title") {
            record.insert("title".to_string(), json!(title));
        }
        if let Some(brand) = item.text_at(".//Brand") {
            record.insert("brand".to_string(), json!(brand));
        }
        if let Some(price) = crate::products::float_at(item, ".//ListPrice/Amount") {
            record.insert("price".to_string(), json!(price));
        }
        if let Some(url) = item.text_at(".//SmallImage/URL") {
            record.insert("image_url".to_string(), json!(url));
        }

        results.push(Value::Object(record));
    }

    Value::Array(results)
}
