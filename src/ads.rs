use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::auth::TokenProvider;
use crate::config::Settings;
use crate::http::{pretty, JsonRequest, Transport};

const ADS_ENDPOINT: &str = "https://googleads.googleapis.com";

/// Text assets of one responsive search ad.
///
/// Every field is optional: rows with a partial shape still map to a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextAd {
    pub id: Option<i64>,
    pub headlines: Option<Vec<String>>,
    pub descriptions: Option<Vec<String>>,
}

impl TextAd {
    /// Each field is read on its own, so a malformed field only drops itself.
    pub fn from_search_row(item: &Value) -> TextAd {
        let ad = item.pointer("/adGroupAd/ad");
        let rsa = ad.and_then(|a| a.get("responsiveSearchAd"));
        TextAd {
            id: ad.and_then(|a| a.get("id")).and_then(lenient_i64),
            headlines: rsa.and_then(|r| asset_texts(r.get("headlines"))),
            descriptions: rsa.and_then(|r| asset_texts(r.get("descriptions"))),
        }
    }

    /// Headlines first, then descriptions.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.headlines
            .iter()
            .flatten()
            .chain(self.descriptions.iter().flatten())
            .map(String::as_str)
    }
}

/// Assets whose `text` is missing or not a string are skipped.
fn asset_texts(assets: Option<&Value>) -> Option<Vec<String>> {
    let list = assets?.as_array()?;
    Some(
        list.iter()
            .filter_map(|a| a.get("text").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
    )
}

/// The REST API sends int64 values as strings.
fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct SearchPage {
    results: Option<Vec<Value>>,
    next_page_token: Option<String>,
    error: Option<Value>,
    errors: Option<Value>,
}

pub struct AdsClient<'a, T, A> {
    transport: &'a T,
    auth: &'a A,
    developer_token: String,
    login_customer_id: String,
    api_version: String,
}

impl<'a, T: Transport, A: TokenProvider> AdsClient<'a, T, A> {
    pub fn new(transport: &'a T, auth: &'a A, settings: &Settings) -> Self {
        Self {
            transport,
            auth,
            developer_token: settings.developer_token.trim().to_string(),
            login_customer_id: settings.customer_id(),
            api_version: settings.ads_api_version.clone(),
        }
    }

    /// Run a GAQL query and collect every page of results in server order.
    ///
    /// An `error` or `errors` payload on any page fails the whole call.
    pub async fn run_query(&self, query: &str, customer_id: &str) -> Result<Vec<Value>> {
        let url = format!(
            "{}/{}/customers/{}/googleAds:search",
            ADS_ENDPOINT, self.api_version, customer_id
        );
        let bearer = self.auth.bearer_token()?;

        let mut results = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let body = search_body(query, customer_id, page_token.as_deref());
            let request = JsonRequest::post(&url, &bearer, body)
                .header("developer-token", &self.developer_token)
                .header("login-customer-id", &self.login_customer_id);

            let Some(body) = self.transport.send_json(&request).await? else {
                bail!("Search page {} was not valid JSON", pages + 1);
            };
            let page: SearchPage =
                serde_json::from_value(body).context("Unexpected search response")?;
            if let Some(error) = page.error.or(page.errors) {
                bail!("{}", pretty(&error));
            }

            pages += 1;
            results.extend(page.results.unwrap_or_default());
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        debug!(pages, rows = results.len(), "query finished");
        Ok(results)
    }
}

fn search_body(query: &str, customer_id: &str, page_token: Option<&str>) -> Value {
    let mut body = json!({ "customerId": customer_id, "query": query });
    if let Some(token) = page_token {
        body["pageToken"] = json!(token);
    }
    body
}

pub fn build_ads_query(campaigns: &[String], limit: Option<u32>) -> String {
    let campaign_condition = if campaigns.is_empty() {
        String::new()
    } else {
        format!("AND campaign.id IN ({})", campaigns.join(","))
    };
    let limit_clause = match limit.filter(|n| *n > 0) {
        Some(n) => format!("LIMIT {}", n),
        None => String::new(),
    };

    format!(
        "
    SELECT
      ad_group_ad.ad.id,
      ad_group_ad.ad.responsive_search_ad.headlines,
      ad_group_ad.ad.responsive_search_ad.descriptions,
      ad_group_ad.status,
      ad_group_ad.policy_summary.review_status,
      ad_group_ad.policy_summary.approval_status,
      ad_group_ad.policy_summary.policy_topic_entries
    FROM
      ad_group_ad
    WHERE
      ad_group_ad.status IN ('ENABLED', 'PAUSED', 'REMOVED', 'UNKNOWN') AND
      ad_group_ad.ad.type = RESPONSIVE_SEARCH_AD
      {}
    {}
    PARAMETERS include_drafts=true
    ",
        campaign_condition, limit_clause
    )
}

/// Fetch responsive search ads for an account, optionally filtered by campaign.
pub async fn fetch_ads<T: Transport, A: TokenProvider>(
    client: &AdsClient<'_, T, A>,
    customer_id: &str,
    campaigns: &[String],
    limit: Option<u32>,
) -> Result<Vec<TextAd>> {
    let query = build_ads_query(campaigns, limit);
    debug!("{}", query);
    info!(customer_id, campaigns = campaigns.len(), ?limit, "Fetching ads");

    let rows = client
        .run_query(&query, customer_id)
        .await
        .with_context(|| format!("Ads query failed for customer {}", customer_id))?;
    Ok(rows.iter().map(TextAd::from_search_row).collect())
}
