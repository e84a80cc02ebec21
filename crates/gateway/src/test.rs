use super::*;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;

const SERVICE_STATUS: &str = r#"<?xml version="1.0"?>
<GetServiceStatusResponse xmlns="http://mws.amazonservices.com/schema/Products/2011-10-01">
  <GetServiceStatusResult>
    <Status>GREEN</Status>
    <Timestamp>2017-06-09T19:40:35Z</Timestamp>
  </GetServiceStatusResult>
  <ResponseMetadata>
    <RequestId>d384713e-7da5-4e49-b752-bef0b1b64b9c</RequestId>
  </ResponseMetadata>
</GetServiceStatusResponse>"#;

const MATCHING_PRODUCTS: &str = r#"<?xml version="1.0"?>
<ListMatchingProductsResponse xmlns="http://mws.amazonservices.com/schema/Products/2011-10-01">
  <ListMatchingProductsResult>
    <Products xmlns:ns2="http://mws.amazonservices.com/schema/Products/2011-10-01/default.xsd">
      <Product>
        <Identifiers>
          <MarketplaceASIN>
            <MarketplaceId>ATVPDKIKX0DER</MarketplaceId>
            <ASIN>B000123</ASIN>
          </MarketplaceASIN>
        </Identifiers>
        <AttributeSets>
          <ns2:ItemAttributes xml:lang="en-US">
            <ns2:Brand>Acme</ns2:Brand>
            <ns2:Model>W-100</ns2:Model>
            <ns2:PackageQuantity>1</ns2:PackageQuantity>
            <ns2:ListPrice>
              <ns2:Amount>19.99</ns2:Amount>
              <ns2:CurrencyCode>USD</ns2:CurrencyCode>
            </ns2:ListPrice>
            <ns2:SmallImage>
              <ns2:URL>https://img.example/b000123.jpg</ns2:URL>
            </ns2:SmallImage>
            <ns2:Title>Acme Widget</ns2:Title>
            <ns2:Feature>Durable</ns2:Feature>
            <ns2:Feature>Lightweight</ns2:Feature>
          </ns2:ItemAttributes>
        </AttributeSets>
        <SalesRankings>
          <SalesRank>
            <ProductCategoryId>12345</ProductCategoryId>
            <Rank>10</Rank>
          </SalesRank>
          <SalesRank>
            <ProductCategoryId>home_garden_display_on_website</ProductCategoryId>
            <Rank>55</Rank>
          </SalesRank>
        </SalesRankings>
      </Product>
    </Products>
  </ListMatchingProductsResult>
</ListMatchingProductsResponse>"#;

const COMPETITIVE_PRICING: &str = r#"<?xml version="1.0"?>
<GetCompetitivePricingForASINResponse xmlns="http://mws.amazonservices.com/schema/Products/2011-10-01">
  <GetCompetitivePricingForASINResult ASIN="B000123" status="Success">
    <Product>
      <CompetitivePricing>
        <CompetitivePrices>
          <CompetitivePrice belongsToRequester="false" condition="New">
            <Price>
              <LandedPrice><Amount>21.99</Amount></LandedPrice>
              <ListingPrice><Amount>19.99</Amount></ListingPrice>
              <Shipping><Amount>2.00</Amount></Shipping>
            </Price>
          </CompetitivePrice>
          <CompetitivePrice belongsToRequester="false" condition="Used">
            <Price>
              <LandedPrice><Amount>11.99</Amount></LandedPrice>
              <ListingPrice><Amount>9.99</Amount></ListingPrice>
              <Shipping><Amount>2.00</Amount></Shipping>
            </Price>
          </CompetitivePrice>
        </CompetitivePrices>
        <NumberOfOfferListings>
          <OfferListingCount condition="Any">12</OfferListingCount>
          <OfferListingCount condition="New">5</OfferListingCount>
        </NumberOfOfferListings>
      </CompetitivePricing>
    </Product>
  </GetCompetitivePricingForASINResult>
  <GetCompetitivePricingForASINResult ASIN="B000999" status="ClientError">
    <Error>
      <Code>InvalidParameterValue</Code>
      <Message>B000999 is not a valid ASIN</Message>
    </Error>
  </GetCompetitivePricingForASINResult>
</GetCompetitivePricingForASINResponse>"#;

const COMPETITIVE_PRICING_NO_NEW_OFFERS: &str = r#"<?xml version="1.0"?>
<GetCompetitivePricingForASINResponse xmlns="http://mws.amazonservices.com/schema/Products/2011-10-01">
  <GetCompetitivePricingForASINResult ASIN="B000777" status="Success">
    <Product>
      <CompetitivePricing>
        <CompetitivePrices/>
        <NumberOfOfferListings>
          <OfferListingCount condition="Any">3</OfferListingCount>
        </NumberOfOfferListings>
      </CompetitivePricing>
    </Product>
  </GetCompetitivePricingForASINResult>
</GetCompetitivePricingForASINResponse>"#;

const FEES_ESTIMATE: &str = r#"<?xml version="1.0"?>
<GetMyFeesEstimateResponse xmlns="http://mws.amazonservices.com/schema/Products/2011-10-01">
  <GetMyFeesEstimateResult>
    <FeesEstimateResultList>
      <FeesEstimateResult>
        <Status>Success</Status>
        <FeesEstimate>
          <TotalFeesEstimate>
            <CurrencyCode>USD</CurrencyCode>
            <Amount>2.56</Amount>
          </TotalFeesEstimate>
        </FeesEstimate>
      </FeesEstimateResult>
    </FeesEstimateResultList>
  </GetMyFeesEstimateResult>
</GetMyFeesEstimateResponse>"#;

const ERROR_RESPONSE: &str = "<ErrorResponse>\
   <Error><Code>AccessDenied</Code><Message>Bad key</Message></Error>\
   <RequestID>R1</RequestID>\
 </ErrorResponse>";

const ITEM_LOOKUP: &str = r#"<?xml version="1.0"?>
<ItemLookupResponse xmlns="http://webservices.amazon.com/AWSECommerceService/2013-08-01">
  <Items>
    <Item>
      <ASIN>B000123</ASIN>
      <ItemAttributes>
        <Title>Acme Widget</Title>
        <Brand>Acme</Brand>
        <ListPrice><Amount>1999</Amount></ListPrice>
      </ItemAttributes>
      <SmallImage>
        <URL>https://img.example/b000123.jpg</URL>
      </SmallImage>
    </Item>
  </Items>
</ItemLookupResponse>"#;

struct TestDispatch {
    responses: Mutex<VecDeque<anyhow::Result<String>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl TestDispatch {
    fn with_responses<I: IntoIterator<Item = anyhow::Result<String>>>(responses: I) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Dispatch for TestDispatch {
    fn dispatch<'a>(
        &'a self,
        request: HttpRequest,
    ) -> futures::future::BoxFuture<'a, anyhow::Result<String>> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(response) => response,
                None => anyhow::bail!("no canned response left"),
            }
        })
    }
}

fn gateway(dispatch: &Arc<TestDispatch>) -> (TaskGateway, Store) {
    gateway_with_config(dispatch, GatewayConfig::default())
}

fn gateway_with_config(
    dispatch: &Arc<TestDispatch>,
    config: GatewayConfig,
) -> (TaskGateway, Store) {
    let store = Store::memory();
    let seam: Arc<dyn Dispatch> = dispatch.clone();
    let gateway = TaskGateway::with_dispatch(config, store.clone(), seam).unwrap();
    (gateway, store)
}

fn kwargs(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

#[tokio::test]
async fn service_status_and_cache_hit() {
    let dispatch = TestDispatch::with_responses([Ok(SERVICE_STATUS.to_string())]);
    let (gateway, _store) = gateway(&dispatch);

    let result = gateway
        .invoke("products.GetServiceStatus", &[], Map::new())
        .await
        .unwrap();
    assert_eq!(result, json!("GREEN"));

    // The second call is served from the cache: no second dispatch,
    // and no 300 second throttle wait.
    let result = gateway
        .invoke("products.GetServiceStatus", &[], Map::new())
        .await
        .unwrap();
    assert_eq!(result, json!("GREEN"));
    assert_eq!(dispatch.count(), 1);

    let request = &dispatch.requests()[0];
    assert_eq!(request.method, "POST");
    assert!(request
        .url
        .starts_with("https://mws.amazonservices.com/Products/2011-10-01?"));
    assert!(request.url.contains("Action=GetServiceStatus"));
    assert!(request.url.contains("&Signature="));
}

#[tokio::test]
async fn matching_products_record() {
    let dispatch = TestDispatch::with_responses([Ok(MATCHING_PRODUCTS.to_string())]);
    let (gateway, _store) = gateway(&dispatch);

    let result = gateway
        .invoke(
            "products.ListMatchingProducts",
            &[],
            kwargs(&[
                ("query", json!("widget")),
                ("marketplace_id", json!("US")),
            ]),
        )
        .await
        .unwrap();

    // Keys whose selectors missed (NumberOfItems) are omitted.
    assert_eq!(
        result,
        json!([{
            "sku": "B000123",
            "brand": "Acme",
            "model": "W-100",
            "price": 19.99,
            "PackageQuantity": 1,
            "image_url": "https://img.example/b000123.jpg",
            "title": "Acme Widget",
            "category": "home_garden_display_on_website",
            "rank": 55,
            "description": "Durable\nLightweight",
        }])
    );

    let request = &dispatch.requests()[0];
    assert!(request.url.contains("Query=widget"));
    assert!(request.url.contains("MarketplaceId=ATVPDKIKX0DER"));
}

#[tokio::test]
async fn unknown_two_letter_marketplace_falls_back_to_us() {
    let dispatch = TestDispatch::with_responses([Ok(MATCHING_PRODUCTS.to_string())]);
    let (gateway, _store) = gateway(&dispatch);

    gateway
        .invoke(
            "products.ListMatchingProducts",
            &[],
            kwargs(&[
                ("query", json!("widget")),
                ("marketplace_id", json!("XX")),
            ]),
        )
        .await
        .unwrap();

    assert!(dispatch.requests()[0]
        .url
        .contains("MarketplaceId=ATVPDKIKX0DER"));
}

#[tokio::test]
async fn priority_is_removed_before_caching_and_signing() {
    let dispatch = TestDispatch::with_responses([Ok(MATCHING_PRODUCTS.to_string())]);
    let (gateway, _store) = gateway(&dispatch);

    gateway
        .invoke(
            "products.ListMatchingProducts",
            &[],
            kwargs(&[("query", json!("widget")), ("priority", json!(2))]),
        )
        .await
        .unwrap();
    assert!(!dispatch.requests()[0].url.contains("priority"));

    // The same call without a priority hits the same cache entry.
    gateway
        .invoke(
            "products.ListMatchingProducts",
            &[],
            kwargs(&[("query", json!("widget"))]),
        )
        .await
        .unwrap();
    assert_eq!(dispatch.count(), 1);
}

#[tokio::test]
async fn amazon_errors_become_envelopes_and_are_not_cached() {
    let dispatch = TestDispatch::with_responses([
        Ok(ERROR_RESPONSE.to_string()),
        Ok(ERROR_RESPONSE.to_string()),
    ]);
    let (gateway, store) = gateway(&dispatch);

    let call = || {
        gateway.invoke(
            "products.GetCompetitivePricingForASIN",
            &[],
            kwargs(&[("asin", json!("B000123"))]),
        )
    };

    let expected = json!({
        "error": {
            "code": "AccessDenied",
            "message": "Bad key",
            "request_id": "R1",
        }
    });
    assert_eq!(call().await.unwrap(), expected);
    // Not cached: the second call dispatches again.
    assert_eq!(call().await.unwrap(), expected);
    assert_eq!(dispatch.count(), 2);

    // Both calls counted against the quota and were released.
    assert_eq!(
        store
            .get("products.GetCompetitivePricingForASIN_pending")
            .await
            .unwrap(),
        Some("0".to_string())
    );
    // Quota was consumed; the exact level depends on how much time the
    // 0.1 s/unit restore rate credited back between the two calls.
    let usage = throttle::parse_usage(
        &store
            .get("products.GetCompetitivePricingForASIN_usage")
            .await
            .unwrap()
            .unwrap(),
    );
    assert!(usage.quota_level >= 1);
    assert!(usage.last_request.is_some());
}

#[tokio::test]
async fn competitive_pricing_projection() {
    let dispatch = TestDispatch::with_responses([Ok(COMPETITIVE_PRICING.to_string())]);
    let (gateway, _store) = gateway(&dispatch);

    let result = gateway
        .invoke(
            "products.GetCompetitivePricingForASIN",
            &[],
            kwargs(&[("asin", json!("B000123"))]),
        )
        .await
        .unwrap();

    assert_eq!(
        result,
        json!({
            "B000123": {
                "listing_price": 19.99,
                "shipping": 2.0,
                "landed_price": 21.99,
                "offers": 5,
            },
            "B000999": {
                "error": "InvalidParameterValue: B000999 is not a valid ASIN",
            },
        })
    );

    assert!(dispatch.requests()[0]
        .url
        .contains("ASINList.ASIN.1=B000123"));
}

#[tokio::test]
async fn offers_default_to_zero_without_new_condition_counts() {
    let dispatch =
        TestDispatch::with_responses([Ok(COMPETITIVE_PRICING_NO_NEW_OFFERS.to_string())]);
    let (gateway, _store) = gateway(&dispatch);

    let result = gateway
        .invoke(
            "products.GetCompetitivePricingForASIN",
            &[],
            kwargs(&[("asin", json!("B000777"))]),
        )
        .await
        .unwrap();

    assert_eq!(result, json!({"B000777": {"offers": 0}}));
}

#[tokio::test]
async fn fees_estimate_request_and_projection() {
    let dispatch = TestDispatch::with_responses([Ok(FEES_ESTIMATE.to_string())]);
    let (gateway, _store) = gateway(&dispatch);

    let result = gateway
        .invoke(
            "products.GetMyFeesEstimate",
            &[],
            kwargs(&[("asin", json!("B000123")), ("price", json!(9.99))]),
        )
        .await
        .unwrap();
    assert_eq!(result, json!(2.56));

    let url = &dispatch.requests()[0].url;
    assert!(url.contains("FeesEstimateRequestList.FeesEstimateRequest.1.IdType=ASIN"));
    assert!(url.contains("FeesEstimateRequestList.FeesEstimateRequest.1.IdValue=B000123"));
    assert!(url.contains(
        "FeesEstimateRequestList.FeesEstimateRequest.1.PriceToEstimateFees.ListingPrice.Amount=9.99"
    ));
}

#[tokio::test]
async fn item_lookup_uses_the_pa_surface() {
    let dispatch = TestDispatch::with_responses([Ok(ITEM_LOOKUP.to_string())]);
    let (gateway, _store) = gateway(&dispatch);

    let result = gateway
        .invoke(
            "productadvertising.ItemLookup",
            &[],
            kwargs(&[("item_id", json!("B000123"))]),
        )
        .await
        .unwrap();
    assert_eq!(
        result,
        json!([{
            "asin": "B000123",
            "title": "Acme Widget",
            "brand": "Acme",
            "price": 1999.0,
            "image_url": "https://img.example/b000123.jpg",
        }])
    );

    let request = &dispatch.requests()[0];
    assert_eq!(request.method, "GET");
    assert!(request.url.starts_with("https://webservices.amazon.com/onca/xml?"));
    assert!(request.url.contains("Operation=ItemLookup"));
    assert!(request.url.contains("Service=AWSECommerceService"));
    assert!(request.url.contains("AssociateTag=test_account_id"));
    assert!(request.url.contains("ItemId=B000123"));
}

#[tokio::test]
async fn transport_errors_propagate_but_release_the_throttle() {
    let dispatch =
        TestDispatch::with_responses([Err(anyhow::anyhow!("connection reset by peer"))]);
    let (gateway, store) = gateway(&dispatch);

    let err = gateway
        .invoke("products.GetServiceStatus", &[], Map::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("connection reset"));

    assert_eq!(
        store
            .get("products.GetServiceStatus_pending")
            .await
            .unwrap(),
        Some("0".to_string())
    );
    assert!(store
        .get("products.GetServiceStatus_usage")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn malformed_responses_are_errors_and_release_the_throttle() {
    let dispatch = TestDispatch::with_responses([Ok("this is not xml".to_string())]);
    let (gateway, store) = gateway(&dispatch);

    let err = gateway
        .invoke("products.GetServiceStatus", &[], Map::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no root element"));

    assert_eq!(
        store
            .get("products.GetServiceStatus_pending")
            .await
            .unwrap(),
        Some("0".to_string())
    );
}

#[tokio::test]
async fn unsupported_actions_and_sections() {
    let dispatch = TestDispatch::with_responses(Vec::new());
    let (gateway, _store) = gateway(&dispatch);

    let err = gateway
        .invoke("products.GetMatchingProduct", &[], Map::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not a supported action"));

    let err = gateway
        .invoke("orders.ListOrders", &[], Map::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not a supported action"));

    let err = gateway
        .invoke("nosuchsection.Foo", &[], Map::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown API section"));

    let err = gateway
        .invoke("GetServiceStatus", &[], Map::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("fully qualified"));

    assert_eq!(dispatch.count(), 0);
}

#[tokio::test]
async fn cache_ttl_overrides_disable_caching() {
    let dispatch = TestDispatch::with_responses([
        Ok(COMPETITIVE_PRICING.to_string()),
        Ok(COMPETITIVE_PRICING.to_string()),
    ]);
    let mut config = GatewayConfig::default();
    config
        .cache_ttl_overrides
        .insert("GETCOMPETITIVEPRICINGFORASIN".to_string(), 0);
    let (gateway, _store) = gateway_with_config(&dispatch, config);

    for _ in 0..2 {
        gateway
            .invoke(
                "products.GetCompetitivePricingForASIN",
                &[],
                kwargs(&[("asin", json!("B000123"))]),
            )
            .await
            .unwrap();
    }
    assert_eq!(dispatch.count(), 2);
}

#[tokio::test]
async fn auth_token_is_signed_into_requests() {
    let dispatch = TestDispatch::with_responses([Ok(SERVICE_STATUS.to_string())]);
    let mut config = GatewayConfig::default();
    config.auth_token = Some("amzn.mws.token".to_string());
    let (gateway, _store) = gateway_with_config(&dispatch, config);

    gateway
        .invoke("products.GetServiceStatus", &[], Map::new())
        .await
        .unwrap();
    assert!(dispatch.requests()[0]
        .url
        .contains("MWSAuthToken=amzn.mws.token"));
}

#[test]
fn cache_ttl_table() {
    let dispatch = TestDispatch::with_responses(Vec::new());
    let (gateway, _store) = gateway(&dispatch);

    assert_eq!(gateway.cache_ttl_for("GetServiceStatus"), 300);
    assert_eq!(gateway.cache_ttl_for("ListMatchingProducts"), 3600);
    assert_eq!(gateway.cache_ttl_for("GetMyFeesEstimate"), 1800);
    assert_eq!(gateway.cache_ttl_for("GetCompetitivePricingForASIN"), 30);
}

#[test]
fn priority_pop_handles_malformed_values() {
    let mut map = kwargs(&[("priority", json!(2))]);
    assert_eq!(pop_priority(&mut map), 2);
    assert!(map.is_empty());

    let mut map = kwargs(&[("priority", json!("1"))]);
    assert_eq!(pop_priority(&mut map), 1);

    let mut map = kwargs(&[("priority", json!("high"))]);
    assert_eq!(pop_priority(&mut map), 0);

    let mut map = kwargs(&[("priority", json!([1, 2]))]);
    assert_eq!(pop_priority(&mut map), 0);

    let mut map = Map::new();
    assert_eq!(pop_priority(&mut map), 0);
}

#[test]
fn config_from_env() {
    std::env::set_var("MWS_ACCESS_KEY", "env_access_key");
    std::env::set_var("MWS_SECRET_KEY", "env_secret_key");
    std::env::set_var("MWS_SELLER_ID", "env_seller");
    std::env::set_var("MWS_AUTH_TOKEN", "env_token");
    std::env::set_var("MWS_CACHE_TTL_GETSERVICESTATUS", "600");

    let config = GatewayConfig::from_env();
    assert_eq!(config.access_key, "env_access_key");
    assert_eq!(config.secret_key, "env_secret_key");
    assert_eq!(config.seller_id, "env_seller");
    assert_eq!(config.auth_token.as_deref(), Some("env_token"));
    assert_eq!(config.cache_ttl_overrides.get("GETSERVICESTATUS"), Some(&600));

    std::env::remove_var("MWS_ACCESS_KEY");
    std::env::remove_var("MWS_SECRET_KEY");
    std::env::remove_var("MWS_SELLER_ID");
    std::env::remove_var("MWS_AUTH_TOKEN");
    std::env::remove_var("MWS_CACHE_TTL_GETSERVICESTATUS");
}
