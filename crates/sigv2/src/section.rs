//! Static descriptions of the API sections the signer can address.
//! Each section is a family of actions sharing a URI path, API version
//! and parameter naming convention. Only `Products` and
//! `ProductAdvertising` carry operations; the remaining sections are
//! listed so the signing core admits them once operations are added.

#[derive(Debug)]
pub struct SectionSpec {
    pub name: &'static str,
    pub uri_path: &'static str,
    pub version: &'static str,
    /// `SellerId` for MWS sections, `AssociateTag` for PA.
    pub account_param: &'static str,
    /// `Action` for MWS sections, `Operation` for PA.
    pub action_param: &'static str,
    /// MWS calls POST, PA calls GET.
    pub method: &'static str,
    pub operations: &'static [&'static str],
}

impl SectionSpec {
    pub fn supports(&self, action: &str) -> bool {
        self.operations.contains(&action)
    }

    pub fn is_product_advertising(&self) -> bool {
        self.account_param == "AssociateTag"
    }
}

pub static SECTIONS: &[SectionSpec] = &[
    SectionSpec {
        name: "Products",
        uri_path: "/Products/2011-10-01",
        version: "2011-10-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[
            "GetServiceStatus",
            "ListMatchingProducts",
            "GetCompetitivePricingForASIN",
            "GetMyFeesEstimate",
        ],
    },
    SectionSpec {
        name: "ProductAdvertising",
        uri_path: "/onca/xml",
        version: "",
        account_param: "AssociateTag",
        action_param: "Operation",
        method: "GET",
        operations: &["ItemLookup"],
    },
    SectionSpec {
        name: "Feeds",
        uri_path: "/",
        version: "2009-01-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
    SectionSpec {
        name: "Finances",
        uri_path: "/Finances/2015-05-01",
        version: "2015-05-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
    SectionSpec {
        name: "FulfillmentInboundShipment",
        uri_path: "/FulfillmentInboundShipment/2010-10-01",
        version: "2010-10-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
    SectionSpec {
        name: "FulfillmentInventory",
        uri_path: "/FulfillmentInventory/2010-10-01",
        version: "2010-10-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
    SectionSpec {
        name: "FulfillmentOutboundShipment",
        uri_path: "/FulfillmentOutboundShipment/2010-10-01",
        version: "2010-10-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
    SectionSpec {
        name: "MerchantFulfillment",
        uri_path: "/MerchantFulfillment/2015-06-01",
        version: "2015-06-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
    SectionSpec {
        name: "Orders",
        uri_path: "/Orders/2013-09-01",
        version: "2013-09-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
    SectionSpec {
        name: "Recommendations",
        uri_path: "/Recommendations/2013-04-01",
        version: "2013-04-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
    SectionSpec {
        name: "Reports",
        uri_path: "/",
        version: "2009-01-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
    SectionSpec {
        name: "Sellers",
        uri_path: "/Sellers",
        version: "2011-07-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
    SectionSpec {
        name: "Subscriptions",
        uri_path: "/Subscriptions/2013-07-01",
        version: "2013-07-01",
        account_param: "SellerId",
        action_param: "Action",
        method: "POST",
        operations: &[],
    },
];

/// Look up a section by name, case-insensitively, so the lowercased
/// section component of a fully qualified action name resolves.
pub fn section(name: &str) -> Option<&'static SectionSpec> {
    SECTIONS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}
