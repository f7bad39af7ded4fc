//! In-process stand-in for the remote authority, plus engine fixtures.

#![allow(dead_code)] // each test binary uses a subset

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use url::Url;

use scrip_sdk::{HttpParams, HttpRequester, HttpResult, Method, Result, Scrip};

/// Smallest-denomination units per displayed reward unit.
pub const ONE_TRILLION: i64 = 1_000_000_000_000;

pub const SPEED_BOOST: &str = "speed-boost";
pub const TEST_CLASS: &str = "test";
pub const TEST_ONE_TRILLION_ONE_SECOND: &str = "1trillion-1second";

pub struct CatalogEntry {
    pub class: &'static str,
    pub distinguisher: &'static str,
    pub price: i64,
    pub lifetime: Duration,
}

fn default_catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry {
            class: SPEED_BOOST,
            distinguisher: "1hr",
            price: ONE_TRILLION,
            lifetime: Duration::hours(1),
        },
        CatalogEntry {
            class: SPEED_BOOST,
            distinguisher: "2hr",
            price: 2 * ONE_TRILLION,
            lifetime: Duration::hours(2),
        },
        CatalogEntry {
            class: TEST_CLASS,
            distinguisher: TEST_ONE_TRILLION_ONE_SECOND,
            price: ONE_TRILLION,
            lifetime: Duration::seconds(1),
        },
    ]
}

struct MockUser {
    /// Token type to value, as issued.
    tokens: BTreeMap<String, String>,
    balance: i64,
    /// Active expiring purchases: (class, distinguisher) to server expiry.
    active: HashMap<(String, String), DateTime<Utc>>,
}

struct MockState {
    user: Option<MockUser>,
    catalog: Vec<CatalogEntry>,
    clock_skew: Duration,
    token_counter: u64,
    transaction_counter: u64,
}

/// An in-process fake of the remote authority, implementing the same
/// validation ladder the real server applies. Single-user: one tracker at a
/// time, which is all an engine instance ever is.
pub struct MockAuthority {
    state: Mutex<MockState>,
}

impl MockAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                user: None,
                catalog: default_catalog(),
                clock_skew: Duration::zero(),
                token_counter: 0,
                transaction_counter: 0,
            }),
        })
    }

    /// Credit the current user, standing in for a completed earning action.
    pub fn grant_reward(&self, amount: i64) {
        let mut state = self.state.lock().unwrap();
        state
            .user
            .as_mut()
            .expect("no tracker user exists; refresh state first")
            .balance += amount;
    }

    /// Offset the authority's clock from the local one; affects the `Date`
    /// header and purchase expiries.
    pub fn set_clock_skew(&self, skew: Duration) {
        self.state.lock().unwrap().clock_skew = skew;
    }

    pub fn user_balance(&self) -> i64 {
        self.state.lock().unwrap().user.as_ref().map_or(0, |user| user.balance)
    }

    /// Forget the current user, invalidating every token it was issued.
    pub fn revoke_all(&self) {
        self.state.lock().unwrap().user = None;
    }
}

impl HttpRequester for MockAuthority {
    fn request(&self, params: &HttpParams) -> HttpResult {
        let url = match Url::parse(&params.url) {
            Ok(url) => url,
            Err(e) => return HttpResult::critical(format!("bad request URL: {e}")),
        };

        let mut state = self.state.lock().unwrap();
        let date = (Utc::now() + state.clock_skew).to_rfc2822();

        let (code, body) = match (params.method, url.path()) {
            (Method::Post, "/v1/tracker") => state.new_tracker(),
            (Method::Get, "/v1/refresh-state") => state.refresh(&params.headers, &url),
            (Method::Post, "/v1/transaction") => state.transaction(&params.headers, &url),
            _ => (404, String::new()),
        };

        HttpResult {
            code,
            body,
            date,
            error: String::new(),
        }
    }
}

impl MockState {
    fn server_now(&self) -> DateTime<Utc> {
        Utc::now() + self.clock_skew
    }

    fn new_tracker(&mut self) -> (i32, String) {
        self.token_counter += 1;
        let n = self.token_counter;
        let tokens: BTreeMap<String, String> = [
            ("earner".to_string(), format!("earner-{n}")),
            ("spender".to_string(), format!("spender-{n}")),
            ("indicator".to_string(), format!("indicator-{n}")),
        ]
        .into();

        self.user = Some(MockUser {
            tokens: tokens.clone(),
            balance: 0,
            active: HashMap::new(),
        });

        (200, serde_json::to_string(&tokens).unwrap())
    }

    fn presented_tokens(headers: &[(String, String)]) -> Vec<String> {
        headers
            .iter()
            .find(|(name, _)| name == "X-Scrip-Auth")
            .map(|(_, value)| {
                value
                    .split(',')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn refresh(&mut self, headers: &[(String, String)], url: &Url) -> (i32, String) {
        let presented = Self::presented_tokens(headers);
        let Some(user) = &self.user else {
            return (401, String::new());
        };

        let tokens_valid: BTreeMap<String, bool> = presented
            .iter()
            .map(|token| (token.clone(), user.tokens.values().any(|v| v == token)))
            .collect();
        if !tokens_valid.values().any(|valid| *valid) {
            return (401, String::new());
        }

        let classes: Vec<String> = url
            .query_pairs()
            .filter(|(key, _)| key == "class")
            .map(|(_, value)| value.into_owned())
            .collect();
        let prices: Vec<serde_json::Value> = self
            .catalog
            .iter()
            .filter(|entry| classes.iter().any(|class| class == entry.class))
            .map(|entry| {
                serde_json::json!({
                    "Class": entry.class,
                    "Distinguisher": entry.distinguisher,
                    "Price": entry.price,
                })
            })
            .collect();

        let body = serde_json::json!({
            "TokensValid": tokens_valid,
            "IsAccount": false,
            "Balance": user.balance,
            "PurchasePrices": prices,
        });
        (200, body.to_string())
    }

    fn transaction(&mut self, headers: &[(String, String)], url: &Url) -> (i32, String) {
        let presented = Self::presented_tokens(headers);
        let now = self.server_now();

        let query: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let class = query.get("class").cloned().unwrap_or_default();
        let distinguisher = query.get("distinguisher").cloned().unwrap_or_default();
        let expected_amount: i64 = query
            .get("expectedAmount")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let entry_price;
        let entry_lifetime;
        {
            let Some(user) = &self.user else {
                return (401, String::new());
            };
            let Some(spender) = user.tokens.get("spender") else {
                return (401, String::new());
            };
            if !presented.iter().any(|token| token == spender) {
                return (401, String::new());
            }

            let Some(entry) = self
                .catalog
                .iter()
                .find(|e| e.class == class && e.distinguisher == distinguisher)
            else {
                return (404, String::new());
            };
            entry_price = entry.price;
            entry_lifetime = entry.lifetime;
        }

        let user = self.user.as_mut().unwrap();
        let balance_body = serde_json::json!({ "Balance": user.balance }).to_string();

        if expected_amount != -entry_price {
            return (409, balance_body);
        }
        if user.balance < entry_price {
            return (402, balance_body);
        }
        let key = (class.clone(), distinguisher.clone());
        if user.active.get(&key).is_some_and(|expiry| *expiry > now) {
            return (429, balance_body);
        }

        user.balance -= entry_price;
        let expiry = now + entry_lifetime;
        user.active.insert(key, expiry);

        self.transaction_counter += 1;
        let transaction_id = format!("txn-{}", self.transaction_counter);
        let authorization = BASE64.encode(
            serde_json::json!({
                "Authorization": {
                    "ID": format!("auth-{}", self.transaction_counter),
                    "AccessType": class,
                    "Expires": expiry.to_rfc3339(),
                }
            })
            .to_string(),
        );

        let user = self.user.as_ref().unwrap();
        let body = serde_json::json!({
            "TransactionID": transaction_id,
            "Balance": user.balance,
            "Authorization": authorization,
            "TransactionResponse": {
                "Type": "expiring-purchase",
                "Values": { "Expires": expiry.to_rfc3339() },
            },
        });
        (200, body.to_string())
    }
}

pub fn new_engine(storage_root: &Path, requester: Arc<dyn HttpRequester>) -> Result<Scrip> {
    Scrip::new("scrip-tests/1.0", storage_root, requester)
}
