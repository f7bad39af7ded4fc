//! The Scrip client engine.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use base64::engine::general_purpose::{STANDARD as BASE64, STANDARD_NO_PAD as BASE64_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, ScripError};
use crate::http::{is_server_error, HttpParams, HttpRequester, HttpResult, Method, RECOVERABLE_ERROR};
use crate::storage::{FileStorage, StorageAdapter};
use crate::types::{
    decode_authorization, NewExpiringPurchaseResponse, Purchase, PurchasePrice, Status,
    TransactionId,
};
use crate::userdata::UserData;

/// Default Scrip API URL
pub const DEFAULT_BASE_URL: &str = "https://api.scrip.dev";

const API_VERSION: &str = "v1";
const AUTH_HEADER: &str = "X-Scrip-Auth";
const METADATA_HEADER: &str = "X-Scrip-Metadata";
const LANDING_PAGE_PARAM_KEY: &str = "scrip";

/// Retry budget for one engine operation. Attempt `n` is preceded by an
/// `n - 1` second pause; only 5xx responses are retried.
const MAX_ATTEMPTS: u32 = 3;

/// Configuration options for the Scrip engine
#[derive(Clone, Default)]
pub struct ScripOptions {
    /// Scrip server URL (default: "https://api.scrip.dev")
    pub base_url: Option<String>,
    /// Custom storage adapter (default: FileStorage under the storage root)
    pub storage: Option<Arc<dyn StorageAdapter>>,
    /// Wipe any existing persisted state before starting
    pub force_reset: bool,
}

impl std::fmt::Debug for ScripOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScripOptions")
            .field("base_url", &self.base_url)
            .field("storage", &"<storage>")
            .field("force_reset", &self.force_reset)
            .finish()
    }
}

/// Scrip client engine.
///
/// Owns the persisted state for one storage root and keeps it consistent with
/// the remote authority through [`Scrip::refresh_state`]. All operations are
/// serialized per instance: each public method holds the state lock for its
/// full duration, including any blocking remote exchange, so callers should
/// invoke the engine from a background thread, never an event loop. A storage
/// root must be owned by at most one engine instance.
///
/// # Example
/// ```rust,no_run
/// use scrip_sdk::{Scrip, UreqRequester};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// fn main() -> scrip_sdk::Result<()> {
///     let scrip = Scrip::new(
///         "my-app/1.2",
///         Path::new("/path/to/app/data"),
///         Arc::new(UreqRequester::new()),
///     )?;
///
///     // Obtain tokens and the current balance.
///     scrip.refresh_state(&["speed-boost".into()])?;
///     println!("balance: {}", scrip.balance()?);
///     Ok(())
/// }
/// ```
pub struct Scrip {
    user_agent: String,
    base_url: String,
    requester: Arc<dyn HttpRequester>,
    state: Mutex<UserData>,
}

impl Scrip {
    /// Create an engine with default options.
    ///
    /// # Arguments
    /// * `user_agent` - Identifies the host app in requests; must be non-empty
    /// * `storage_root` - Directory for persistent state (created if needed)
    /// * `requester` - Performs the actual HTTP exchanges
    pub fn new(
        user_agent: &str,
        storage_root: &Path,
        requester: Arc<dyn HttpRequester>,
    ) -> Result<Self> {
        Self::with_options(user_agent, storage_root, requester, ScripOptions::default())
    }

    /// Create an engine with custom options.
    pub fn with_options(
        user_agent: &str,
        storage_root: &Path,
        requester: Arc<dyn HttpRequester>,
        options: ScripOptions,
    ) -> Result<Self> {
        if user_agent.is_empty() {
            return Err(ScripError::internal("user_agent is required"));
        }

        let base_url = options
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let storage: Arc<dyn StorageAdapter> = match options.storage {
            Some(storage) => storage,
            None if options.force_reset => Arc::new(FileStorage::reset(storage_root)?),
            None => Arc::new(FileStorage::new(storage_root)?),
        };

        let mut user_data = UserData::new(storage)?;
        if options.force_reset {
            user_data.clear()?;
        }

        Ok(Self {
            user_agent: user_agent.to_string(),
            base_url,
            requester,
            state: Mutex::new(user_data),
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, UserData>> {
        self.state
            .lock()
            .map_err(|_| ScripError::internal("engine state lock poisoned"))
    }

    // ==================== Stored info accessors ====================

    /// Whether tokens are held. When false, [`Scrip::refresh_state`] must run
    /// before the engine can act on behalf of a user.
    pub fn has_tokens(&self) -> Result<bool> {
        Ok(self.lock_state()?.has_tokens())
    }

    /// Whether the holder is an authenticated Account rather than an
    /// anonymous Tracker.
    pub fn is_account(&self) -> Result<bool> {
        Ok(self.lock_state()?.is_account())
    }

    /// The stored balance, in the smallest currency denomination.
    pub fn balance(&self) -> Result<i64> {
        Ok(self.lock_state()?.balance())
    }

    /// The types of the currently held tokens.
    pub fn valid_token_types(&self) -> Result<Vec<String>> {
        Ok(self.lock_state()?.valid_token_types())
    }

    /// The stored purchase-price catalog. Empty until a synchronization that
    /// requested purchase classes has succeeded.
    pub fn get_purchase_prices(&self) -> Result<Vec<PurchasePrice>> {
        Ok(self.lock_state()?.purchase_prices())
    }

    /// Stable identifier of this datastore instance.
    pub fn instance_id(&self) -> Result<String> {
        Ok(self.lock_state()?.instance_id().to_string())
    }

    /// Id of the most recent successful purchase transaction; empty if none.
    pub fn last_transaction_id(&self) -> Result<TransactionId> {
        Ok(self.lock_state()?.last_transaction_id().to_string())
    }

    // ==================== Purchase lifecycle ====================

    /// All ledger entries, expired or not.
    pub fn get_purchases(&self) -> Result<Vec<Purchase>> {
        Ok(self.lock_state()?.purchases())
    }

    /// Ledger entries that have no expiry or whose expiry is strictly in the
    /// future. Does not mutate the ledger.
    pub fn valid_purchases(&self) -> Result<Vec<Purchase>> {
        let user_data = self.lock_state()?;
        let now = Utc::now();
        Ok(user_data
            .purchases()
            .into_iter()
            .filter(|purchase| !is_expired(purchase, now))
            .collect())
    }

    /// Among entries with a defined expiry, the one expiring soonest (which
    /// may already have passed; call [`Scrip::expire_purchases`] to prune).
    /// Ties keep the earlier ledger entry. Compared on server time, since no
    /// comparison against the local clock is involved.
    pub fn next_expiring_purchase(&self) -> Result<Option<Purchase>> {
        let user_data = self.lock_state()?;
        let mut next: Option<(DateTime<Utc>, Purchase)> = None;
        for purchase in user_data.purchases() {
            let Some(expiry) = purchase.server_time_expiry else {
                continue;
            };
            if next.as_ref().map_or(true, |(soonest, _)| expiry < *soonest) {
                next = Some((expiry, purchase));
            }
        }
        Ok(next.map(|(_, purchase)| purchase))
    }

    /// Remove ledger entries whose expiry has passed and return exactly that
    /// set. Idempotent: a second call with no time elapsed returns an empty
    /// list. This is the only operation that prunes by time.
    pub fn expire_purchases(&self) -> Result<Vec<Purchase>> {
        let mut user_data = self.lock_state()?;
        let now = Utc::now();
        let (expired, remaining): (Vec<Purchase>, Vec<Purchase>) = user_data
            .purchases()
            .into_iter()
            .partition(|purchase| is_expired(purchase, now));
        if !expired.is_empty() {
            user_data.set_purchases(remaining)?;
        }
        Ok(expired)
    }

    /// Remove ledger entries by id, regardless of expiry, returning the
    /// removed entries. Unknown ids are silently ignored; an empty input is a
    /// no-op. Used when the host learns server-side that a purchase ended
    /// before the local clock says so.
    pub fn remove_purchases(&self, ids: &[TransactionId]) -> Result<Vec<Purchase>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut user_data = self.lock_state()?;
        let (removed, remaining): (Vec<Purchase>, Vec<Purchase>) = user_data
            .purchases()
            .into_iter()
            .partition(|purchase| ids.iter().any(|id| *id == purchase.id));
        if !removed.is_empty() {
            user_data.set_purchases(remaining)?;
        }
        Ok(removed)
    }

    // ==================== Request metadata & derived artifacts ====================

    /// Upsert one request-metadata item, merged into every outbound request
    /// and derived artifact. The key must be non-empty; the value may be any
    /// string including empty.
    pub fn set_request_metadata_item(&self, key: &str, value: &str) -> Result<()> {
        self.lock_state()?.set_request_metadata_item(key, value)
    }

    /// Append the current tokens and request metadata to a landing-page URL.
    ///
    /// The payload goes into the URL fragment when the fragment is free,
    /// otherwise into the query string; the original URL is always preserved
    /// as a prefix of sorts. Succeeds even with no tokens (the payload then
    /// carries a null token).
    pub fn modify_landing_page(&self, url: &str) -> Result<String> {
        let user_data = self.lock_state()?;
        let mut parsed = Url::parse(url)
            .map_err(|e| ScripError::internal(format!("failed to parse landing page URL: {e}")))?;

        let payload = serde_json::json!({
            "v": 1,
            "tokens": user_data.earner_token(),
            "metadata": self.request_metadata(&user_data, 0),
        });
        let encoded = urlencoding::encode(&BASE64_NO_PAD.encode(payload.to_string())).into_owned();

        let fragment_free = parsed.fragment().map_or(true, str::is_empty);
        if fragment_free {
            // "#!scrip=...": the "!" stops the fragment from acting as a
            // jump-to anchor on a page whose element ids we don't control.
            parsed.set_fragment(Some(&format!("!{LANDING_PAGE_PARAM_KEY}={encoded}")));
        } else {
            // The page already uses its fragment; altering it is riskier than
            // adding a query parameter that will be ignored.
            let query = match parsed.query() {
                Some(q) if !q.is_empty() => format!("{q}&{LANDING_PAGE_PARAM_KEY}={encoded}"),
                _ => format!("{LANDING_PAGE_PARAM_KEY}={encoded}"),
            };
            parsed.set_query(Some(&query));
        }

        Ok(parsed.to_string())
    }

    /// Data package to include with a webhook for a rewarded user action.
    /// Errors if no earner token is held, so the host can decide up front not
    /// to show the rewarded activity. The result still needs URL-encoding by
    /// the caller.
    pub fn get_rewarded_activity_data(&self) -> Result<String> {
        let user_data = self.lock_state()?;
        let Some(earner_token) = user_data.earner_token() else {
            return Err(ScripError::internal(
                "earner token missing; cannot create webhook data",
            ));
        };

        let payload = serde_json::json!({
            "v": 1,
            "tokens": earner_token,
            "metadata": self.request_metadata(&user_data, 0),
        });
        Ok(BASE64.encode(payload.to_string()))
    }

    /// Sanitized state snapshot suitable for a feedback/diagnostic package.
    /// Contains no token values or metadata.
    pub fn diagnostic_info(&self) -> Result<Value> {
        let user_data = self.lock_state()?;
        let purchases: Vec<Value> = user_data
            .purchases()
            .iter()
            .map(|purchase| {
                serde_json::json!({
                    "class": purchase.transaction_class,
                    "distinguisher": purchase.distinguisher,
                })
            })
            .collect();
        Ok(serde_json::json!({
            "validTokenTypes": user_data.valid_token_types(),
            "isAccount": user_data.is_account(),
            "balance": user_data.balance(),
            "serverTimeDiff": user_data.server_time_diff().num_milliseconds(),
            "purchasePrices": user_data.purchase_prices(),
            "purchases": purchases,
        }))
    }

    /// Wipe the persisted state for this storage root, reverting to a fresh
    /// (tokenless) Tracker state.
    pub fn reset_user(&self) -> Result<()> {
        self.lock_state()?.clear()
    }

    // ==================== API server requests ====================

    /// Synchronize with the remote authority.
    ///
    /// Obtains tracker tokens if none are held, refreshes token validity, the
    /// account flag, and the balance, and (when `purchase_classes` is
    /// non-empty) replaces the price catalog for those classes wholesale. An
    /// empty class list means "no catalog refresh": the stored catalog is
    /// left untouched, not cleared. Safe to retry; with tokens already held
    /// and no intervening purchase, repeated calls are no-ops.
    ///
    /// Returns the business outcome as a [`Status`]:
    /// * `Success`: state is refreshed.
    /// * `ServerError`: the server kept failing across the internal retry
    ///   budget; further retries should not be immediate.
    /// * `InvalidTokens`: the server rejected the held tokens (local state
    ///   corruption); user state has been cleared.
    ///
    /// Transport failures and unclassifiable responses are returned as
    /// errors, not statuses.
    pub fn refresh_state(&self, purchase_classes: &[String]) -> Result<Status> {
        let mut user_data = self.lock_state()?;
        self.refresh_state_internal(&mut user_data, purchase_classes, true)
    }

    fn refresh_state_internal(
        &self,
        user_data: &mut UserData,
        purchase_classes: &[String],
        allow_recursion: bool,
    ) -> Result<Status> {
        if !user_data.has_tokens() {
            if user_data.is_account() {
                // A logged-out account can't be given tracker tokens; the
                // host has to trigger a login before anything else happens.
                return Ok(Status::Success);
            }

            if !allow_recursion {
                return Err(ScripError::internal(
                    "failed to obtain valid tracker tokens",
                ));
            }

            let status = self.new_tracker(user_data)?;
            if status != Status::Success {
                return Ok(status);
            }

            return self.refresh_state_internal(user_data, purchase_classes, false);
        }

        let query: Vec<(&str, String)> = purchase_classes
            .iter()
            .map(|class| ("class", class.clone()))
            .collect();

        let result =
            self.request_with_retry(user_data, Method::Get, "/refresh-state", true, &query)?;

        match result.code {
            200 => {
                let body: RefreshStateBody = parse_body(&result)?;

                let prev_is_account = user_data.is_account();
                let refresh_catalog = !purchase_classes.is_empty();
                user_data.commit(|state| {
                    state
                        .auth_tokens
                        .retain(|_, token| body.tokens_valid.get(token).copied().unwrap_or(false));

                    // With at least one valid token, the server's account
                    // flag is authoritative. An account can never silently
                    // become a tracker.
                    if !body.tokens_valid.is_empty() {
                        if let Some(is_account) = body.is_account {
                            if prev_is_account && !is_account {
                                return Err(ScripError::internal("invalid is-account state"));
                            }
                            state.is_account = is_account;
                        }
                    }

                    if let Some(balance) = body.balance {
                        state.balance = balance;
                    }

                    if refresh_catalog {
                        if let Some(prices) = &body.purchase_prices {
                            state.purchase_prices = prices
                                .iter()
                                .map(|price| PurchasePrice {
                                    transaction_class: price.class.clone(),
                                    distinguisher: price.distinguisher.clone(),
                                    price: price.price,
                                })
                                .collect();
                        }
                    }

                    Ok(())
                })?;

                if user_data.is_account() {
                    return Ok(Status::Success);
                }
                if user_data.has_tokens() {
                    return Ok(Status::Success);
                }

                // We started out with tracker tokens but they're all
                // invalid. Re-enter with recursion allowed so the tokenless
                // branch can mint a new tracker; its own recursive refresh
                // then runs with recursion spent.
                if !allow_recursion {
                    return Err(ScripError::internal(
                        "failed to obtain valid tracker tokens",
                    ));
                }
                self.refresh_state_internal(user_data, purchase_classes, true)
            }
            401 => {
                // The tokens we sent didn't all belong to the same user;
                // local state is not salvageable.
                warn!("refresh-state rejected our tokens; clearing user state");
                user_data.clear()?;
                Ok(Status::InvalidTokens)
            }
            code if is_server_error(code) => Ok(Status::ServerError),
            code => Err(ScripError::internal(format!(
                "request returned unexpected result code: {code}"
            ))),
        }
    }

    /// Get new tracker tokens from the server; effectively a new identity.
    fn new_tracker(&self, user_data: &mut UserData) -> Result<Status> {
        let result = self.request_with_retry(user_data, Method::Post, "/tracker", false, &[])?;

        match result.code {
            200 => {
                let tokens: BTreeMap<String, String> = parse_body(&result)?;
                if tokens.len() < 3 {
                    return Err(ScripError::internal(format!(
                        "bad number of tokens received: {}",
                        tokens.len()
                    )));
                }

                user_data.commit(|state| {
                    state.auth_tokens = tokens;
                    state.is_account = false;
                    state.balance = 0;
                    Ok(())
                })?;

                debug!("obtained new tracker tokens");
                Ok(Status::Success)
            }
            code if is_server_error(code) => Ok(Status::ServerError),
            code => Err(ScripError::internal(format!(
                "request returned unexpected result code: {code}"
            ))),
        }
    }

    /// Make a new expiring-purchase transaction.
    ///
    /// `expected_price` must match the authoritative price obtained from the
    /// catalog; the transaction fails with `TransactionAmountMismatch`
    /// otherwise. On `Status::Success` the balance is decremented, the new
    /// purchase is appended to the ledger, and `purchase` is populated; for
    /// every other status `purchase` is `None`.
    ///
    /// On an error result (as opposed to a non-success status), the purchase
    /// may still have gone through server-side; follow up with
    /// [`Scrip::refresh_state`] to resynchronize.
    pub fn new_expiring_purchase(
        &self,
        transaction_class: &str,
        distinguisher: &str,
        expected_price: i64,
    ) -> Result<NewExpiringPurchaseResponse> {
        let mut user_data = self.lock_state()?;

        let query = [
            ("class", transaction_class.to_string()),
            ("distinguisher", distinguisher.to_string()),
            // The server deals in amounts (deltas), not prices.
            ("expectedAmount", (-expected_price).to_string()),
        ];

        let result =
            self.request_with_retry(&mut user_data, Method::Post, "/transaction", true, &query)?;

        match result.code {
            200 => {
                let body: TransactionBody = parse_body(&result)?;

                let transaction_type = body
                    .transaction_response
                    .as_ref()
                    .and_then(|r| r.transaction_type.as_deref());
                if transaction_type != Some("expiring-purchase") {
                    return Err(ScripError::internal(format!(
                        "response contained incorrect TransactionResponse.Type; want 'expiring-purchase', got {transaction_type:?}"
                    )));
                }

                let transaction_id = body
                    .transaction_id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        ScripError::internal("response did not provide valid TransactionID")
                    })?;

                // Expiry is optional for purchases in general, but this is
                // specifically an *expiring* purchase.
                let expires_raw = body
                    .transaction_response
                    .as_ref()
                    .and_then(|r| r.values.as_ref())
                    .and_then(|v| v.expires.clone())
                    .ok_or_else(|| {
                        ScripError::internal(
                            "response did not provide valid TransactionResponse.Values.Expires",
                        )
                    })?;
                let server_expiry = DateTime::parse_from_rfc3339(&expires_raw)
                    .map_err(|e| {
                        ScripError::internal(format!(
                            "failed to parse TransactionResponse.Values.Expires; got {expires_raw}: {e}"
                        ))
                    })?
                    .with_timezone(&Utc);

                // An authorization doesn't apply to all expiring purchases,
                // but if one is present it must decode.
                let authorization = match body.authorization.as_deref() {
                    Some(encoded) if !encoded.is_empty() => Some(
                        decode_authorization(encoded)
                            .map_err(|e| e.context("failed to decode purchase authorization"))?,
                    ),
                    _ => None,
                };

                let mut purchase = Purchase {
                    id: transaction_id,
                    transaction_class: transaction_class.to_string(),
                    distinguisher: distinguisher.to_string(),
                    server_time_expiry: Some(server_expiry),
                    local_time_expiry: None,
                    authorization,
                };
                user_data.update_purchase_local_expiry(&mut purchase);

                // Balance decrement and ledger append land in one write.
                let committed = purchase.clone();
                user_data.commit(move |state| {
                    if let Some(balance) = body.balance {
                        state.balance = balance;
                    }
                    state.last_transaction_id = committed.id.clone();
                    state.purchases.push(committed);
                    Ok(())
                })?;

                Ok(NewExpiringPurchaseResponse {
                    status: Status::Success,
                    purchase: Some(purchase),
                })
            }
            // These statuses also carry a body with a fresh balance.
            code @ (402 | 409 | 429) => {
                let body: TransactionBody = parse_body(&result)?;
                if let Some(balance) = body.balance {
                    user_data.set_balance(balance)?;
                }
                let status = match code {
                    402 => Status::InsufficientBalance,
                    409 => Status::TransactionAmountMismatch,
                    _ => Status::ExistingTransaction,
                };
                Ok(NewExpiringPurchaseResponse {
                    status,
                    purchase: None,
                })
            }
            404 => Ok(NewExpiringPurchaseResponse {
                status: Status::TransactionTypeNotFound,
                purchase: None,
            }),
            401 => Ok(NewExpiringPurchaseResponse {
                status: Status::InvalidTokens,
                purchase: None,
            }),
            code if is_server_error(code) => Ok(NewExpiringPurchaseResponse {
                status: Status::ServerError,
                purchase: None,
            }),
            code => Err(ScripError::internal(format!(
                "request returned unexpected result code: {code}"
            ))),
        }
    }

    // ==================== Internal helpers ====================

    /// Metadata JSON included with every request and derived artifact. Pass
    /// `attempt == 0` to omit the attempt counter.
    fn request_metadata(&self, user_data: &UserData, attempt: u32) -> Value {
        let mut metadata = serde_json::Map::new();
        for (key, value) in user_data.request_metadata() {
            metadata.insert(key.clone(), Value::String(value.clone()));
        }
        metadata.insert("v".into(), 1.into());
        metadata.insert("user_agent".into(), self.user_agent.clone().into());
        if attempt > 0 {
            metadata.insert("attempt".into(), attempt.into());
        }
        Value::Object(metadata)
    }

    fn build_request_params(
        &self,
        user_data: &UserData,
        method: Method,
        path: &str,
        include_auth_tokens: bool,
        query: &[(&str, String)],
        attempt: u32,
    ) -> Result<HttpParams> {
        let mut url = Url::parse(&format!("{}/{}{}", self.base_url, API_VERSION, path))
            .map_err(|e| ScripError::internal(format!("failed to build request URL: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = vec![("User-Agent".to_string(), self.user_agent.clone())];
        if include_auth_tokens {
            let tokens: Vec<&str> = user_data
                .auth_tokens()
                .values()
                .map(String::as_str)
                .collect();
            headers.push((AUTH_HEADER.to_string(), tokens.join(",")));
        }
        headers.push((
            METADATA_HEADER.to_string(),
            serde_json::to_string(&self.request_metadata(user_data, attempt))?,
        ));

        Ok(HttpParams {
            method,
            url: url.to_string(),
            headers,
        })
    }

    /// Make an HTTP exchange, retrying 5xx responses up to the budget. On a
    /// non-error return the result's `error` is always empty and its code is
    /// a real HTTP status (possibly still 5xx, when the budget ran out).
    fn request_with_retry(
        &self,
        user_data: &mut UserData,
        method: Method,
        path: &str,
        include_auth_tokens: bool,
        query: &[(&str, String)],
    ) -> Result<HttpResult> {
        let mut last_result = HttpResult::critical("no request attempted");

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                std::thread::sleep(StdDuration::from_secs(u64::from(attempt - 1)));
            }

            let params = self.build_request_params(
                user_data,
                method,
                path,
                include_auth_tokens,
                query,
                attempt,
            )?;
            let result = self.requester.request(&params);

            if result.code < 0 && result.error.is_empty() {
                return Err(ScripError::internal(
                    "HTTP result code is negative but no error message provided",
                ));
            }

            // A fresh server timestamp; keep the clock diff current. Not
            // worth failing the operation over if it can't be stored.
            if !result.date.is_empty() {
                if let Ok(server_now) = DateTime::parse_from_rfc2822(&result.date) {
                    if let Err(e) = user_data.set_server_time_diff(server_now.with_timezone(&Utc))
                    {
                        warn!("failed to store server time diff: {e}");
                    }
                }
            }

            if result.code < 0 {
                // The exchange itself failed; retrying immediately won't help.
                if result.code == RECOVERABLE_ERROR {
                    return Err(ScripError::recoverable(format!(
                        "request failed: {}",
                        result.error
                    )));
                }
                return Err(ScripError::internal(format!(
                    "request failed: {}",
                    result.error
                )));
            }

            if is_server_error(result.code) {
                warn!(attempt, code = result.code, "server error; retrying");
                last_result = result;
                continue;
            }

            return Ok(result);
        }

        // Retry budget exhausted; surface the last (5xx) response.
        Ok(last_result)
    }
}

impl std::fmt::Debug for Scrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scrip")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

fn is_expired(purchase: &Purchase, now: DateTime<Utc>) -> bool {
    // "Expired" is decided on the local clock.
    purchase
        .local_time_expiry
        .is_some_and(|expiry| expiry <= now)
}

fn parse_body<T: for<'de> Deserialize<'de>>(result: &HttpResult) -> Result<T> {
    if result.body.is_empty() {
        return Err(ScripError::internal(format!(
            "result has no body; code: {}",
            result.code
        )));
    }
    serde_json::from_str(&result.body)
        .map_err(|e| ScripError::internal(format!("response parse failed: {e}")))
}

// Server wire shapes. These are independent of the datastore representations
// in `types`: the server's format can change without ours changing.

#[derive(Debug, Deserialize)]
struct RefreshStateBody {
    /// Token value (not type) to validity. Required: a response without it
    /// is malformed and must not be allowed to cull the held tokens.
    #[serde(rename = "TokensValid")]
    tokens_valid: BTreeMap<String, bool>,
    #[serde(rename = "IsAccount")]
    is_account: Option<bool>,
    #[serde(rename = "Balance")]
    balance: Option<i64>,
    #[serde(rename = "PurchasePrices")]
    purchase_prices: Option<Vec<ServerPurchasePrice>>,
}

#[derive(Debug, Deserialize)]
struct ServerPurchasePrice {
    #[serde(rename = "Class")]
    class: String,
    #[serde(rename = "Distinguisher")]
    distinguisher: String,
    #[serde(rename = "Price")]
    price: i64,
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    #[serde(rename = "Balance")]
    balance: Option<i64>,
    #[serde(rename = "TransactionID")]
    transaction_id: Option<String>,
    #[serde(rename = "Authorization")]
    authorization: Option<String>,
    #[serde(rename = "TransactionResponse")]
    transaction_response: Option<TransactionResponseBody>,
}

#[derive(Debug, Deserialize)]
struct TransactionResponseBody {
    #[serde(rename = "Type")]
    transaction_type: Option<String>,
    #[serde(rename = "Values")]
    values: Option<TransactionValues>,
}

#[derive(Debug, Deserialize)]
struct TransactionValues {
    #[serde(rename = "Expires")]
    expires: Option<String>,
}
