// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Paginated fetcher
//!
//! Each call to [`Fetcher::next_device_page`] or
//! [`Fetcher::next_telemetry_page`] fetches exactly one page and carries the
//! continuation token forward for the next call. Draining every page
//! happens across scheduler passes. A failed page resets its stream's
//! cursor so the next pass starts that stream over.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::config::CollectorConfig;
use crate::error::{FleetError, Result};
use crate::org_unit::OrgUnit;
use crate::token::TokenManager;
use crate::transport::{Params, Transport};

const USERS_PATH: &str = "/admin/directory/v1/users";
const DIRECTORY_CUSTOMER_PATH: &str = "/admin/directory/v1/customer";
const NEXT_PAGE_TOKEN: &str = "nextPageToken";
const PAGE_TOKEN: &str = "pageToken";
const TELEMETRY_READ_MASK: &str = "deviceId,audioStatusReport";

/// Continuation tokens, `None` means the next page starts a fresh cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursors {
    pub devices: Option<String>,
    pub telemetry: Option<String>,
}

/// One fetched page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_page_token: Option<String>,
}

impl Page {
    fn from_response(response: &Value, items_key: &str) -> Result<Self> {
        let items = match response.get(items_key) {
            Some(Value::Array(items)) => items.clone(),
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                return Err(FleetError::Decode(format!("'{}' is not an array", items_key)));
            }
        };
        let next_page_token = response
            .get(NEXT_PAGE_TOKEN)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Ok(Self {
            items,
            next_page_token,
        })
    }

    /// Whether this page ends the cycle
    pub fn is_last(&self) -> bool {
        self.next_page_token.is_none()
    }
}

/// Token-gated access to the directory and telemetry endpoints
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    tokens: TokenManager,
    telemetry_base_url: String,
    cursors: Mutex<Cursors>,
}

impl Fetcher {
    pub fn new(config: &CollectorConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            tokens: TokenManager::new(config),
            telemetry_base_url: config.telemetry_base_url.trim_end_matches('/').to_string(),
            cursors: Mutex::new(Cursors::default()),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    fn cursors(&self) -> MutexGuard<'_, Cursors> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current continuation tokens
    pub fn cursor_state(&self) -> Cursors {
        self.cursors().clone()
    }

    /// Forget both continuation tokens
    pub fn reset(&self) {
        *self.cursors() = Cursors::default();
    }

    /// Forget the device listing token only
    pub fn reset_devices(&self) {
        self.cursors().devices = None;
    }

    /// Make sure a bearer token is available.
    ///
    /// # Errors
    ///
    /// [`FleetError::NotConfigured`] or [`FleetError::Auth`].
    pub async fn authorize(&self) -> Result<String> {
        self.tokens.valid_token(self.transport.as_ref()).await
    }

    async fn get(&self, url: &str, query: &Params) -> Result<Value> {
        let token = self.authorize().await?;
        self.transport.get(url, query, Some(&token)).await
    }

    /// Customer id of the account, taken from the first listed user.
    ///
    /// `Ok(None)` when the lookup fails or lists no user.
    pub async fn customer_id(&self) -> Result<Option<String>> {
        let query = vec![
            ("customer".to_string(), "my_customer".to_string()),
            ("maxResults".to_string(), "5".to_string()),
        ];
        match self.get(USERS_PATH, &query).await {
            Ok(response) => Ok(response
                .pointer("/users/0/customerId")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string)),
            Err(e) if e.is_fetch_error() => {
                log::error!("Failed to look up customer id: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Full organizational unit list
    pub async fn org_units(&self, customer_id: &str) -> Result<Vec<OrgUnit>> {
        let url = format!("{}/{}/orgunits", DIRECTORY_CUSTOMER_PATH, customer_id);
        let query = vec![("type".to_string(), "all".to_string())];
        let response = self.get(&url, &query).await?;
        match response.get("organizationUnits") {
            Some(units) => Ok(serde_json::from_value(units.clone())?),
            None => Ok(Vec::new()),
        }
    }

    /// Name of the unit `parent_id`, `None` when unknown or unreachable
    pub async fn parent_name(&self, customer_id: &str, parent_id: Option<&str>) -> Option<String> {
        let parent_id = parent_id.filter(|id| !id.is_empty())?;
        let url = format!("{}/{}/orgunits/{}", DIRECTORY_CUSTOMER_PATH, customer_id, parent_id);
        match self.get(&url, &Vec::new()).await {
            Ok(response) => response
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(e) => {
                log::error!("Failed to resolve parent unit {}: {}", parent_id, e);
                None
            }
        }
    }

    /// Next page of ChromeOS devices.
    ///
    /// `org_unit_path` and `serial` narrow the listing when set.
    pub async fn next_device_page(
        &self,
        customer_id: &str,
        org_unit_path: Option<&str>,
        serial: Option<&str>,
    ) -> Result<Page> {
        let url = format!("{}/{}/devices/chromeos", DIRECTORY_CUSTOMER_PATH, customer_id);
        let mut query: Params = vec![("projection".to_string(), "FULL".to_string())];
        if let Some(path) = org_unit_path {
            query.push(("orgUnitPath".to_string(), path.to_string()));
        }
        if let Some(serial) = serial {
            query.push(("query".to_string(), format!("id:{}", serial)));
        }
        let cursor = self.cursors().devices.clone();
        if let Some(token) = cursor {
            query.push((PAGE_TOKEN.to_string(), token));
        }

        let page = self
            .get(&url, &query)
            .await
            .and_then(|response| Page::from_response(&response, "chromeosdevices"));
        match page {
            Ok(page) => {
                self.cursors().devices = page.next_page_token.clone();
                Ok(page)
            }
            Err(e) => {
                self.cursors().devices = None;
                Err(e)
            }
        }
    }

    /// Next page of telemetry entries
    pub async fn next_telemetry_page(&self, customer_id: &str) -> Result<Page> {
        let url = format!(
            "{}/v1/customers/{}/telemetry/devices",
            self.telemetry_base_url, customer_id
        );
        let mut query: Params = vec![("readMask".to_string(), TELEMETRY_READ_MASK.to_string())];
        let cursor = self.cursors().telemetry.clone();
        if let Some(token) = cursor {
            query.push((PAGE_TOKEN.to_string(), token));
        }

        let page = self
            .get(&url, &query)
            .await
            .and_then(|response| Page::from_response(&response, "devices"));
        match page {
            Ok(page) => {
                self.cursors().telemetry = page.next_page_token.clone();
                Ok(page)
            }
            Err(e) => {
                self.cursors().telemetry = None;
                Err(e)
            }
        }
    }
}

/// Copy the output volume of each device's telemetry entry into the device
/// object as `audioStatusReport`.
pub fn merge_telemetry(devices: &mut [Value], telemetry: &[Value]) {
    for device in devices.iter_mut() {
        let Some(id) = device.get("deviceId").and_then(Value::as_str) else {
            continue;
        };
        let volume = telemetry
            .iter()
            .find(|t| t.get("deviceId").and_then(Value::as_str) == Some(id))
            .and_then(|t| t.pointer("/audioStatusReport/0/outputVolume"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        if let (Some(volume), Some(object)) = (volume, device.as_object_mut()) {
            object.insert("audioStatusReport".to_string(), Value::String(volume));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use serde_json::json;

    const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
    const DEVICES: &str = "/admin/directory/v1/customer/C01/devices/chromeos";
    const TELEMETRY: &str = "https://chromemanagement.googleapis.com/v1/customers/C01/telemetry/devices";

    fn fetcher(transport: &Arc<ScriptedTransport>) -> Fetcher {
        transport.respond(TOKEN_URL, json!({"access_token": "tok"}));
        let config = CollectorConfig::with_credentials("id", "secret 1//refresh");
        Fetcher::new(&config, transport.clone())
    }

    #[tokio::test]
    async fn test_customer_id_from_first_user() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(USERS_PATH, json!({"users": [{"customerId": "C01"}, {"customerId": "C02"}]}));
        let fetcher = fetcher(&transport);

        assert_eq!(fetcher.customer_id().await.unwrap().as_deref(), Some("C01"));
        let request = &transport.requests_to(USERS_PATH)[0];
        assert_eq!(request.bearer.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_customer_id_failure_is_none() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(USERS_PATH, FleetError::Network("down".into()));
        let fetcher = fetcher(&transport);
        assert_eq!(fetcher.customer_id().await.unwrap(), None);

        transport.respond(USERS_PATH, json!({"users": []}));
        assert_eq!(fetcher.customer_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_auth_failure_propagates() {
        let transport = Arc::new(ScriptedTransport::new());
        let fetcher = Fetcher::new(&CollectorConfig::default(), transport.clone());
        assert!(matches!(
            fetcher.customer_id().await,
            Err(FleetError::NotConfigured(_))
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_org_units() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            "/admin/directory/v1/customer/C01/orgunits",
            json!({"organizationUnits": [{"name": "MOTF", "orgUnitPath": "/MOTF"}]}),
        );
        let fetcher = fetcher(&transport);
        let units = fetcher.org_units("C01").await.unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].org_unit_path.as_deref(), Some("/MOTF"));
    }

    #[tokio::test]
    async fn test_device_pages_follow_cursor() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_sequence(
            DEVICES,
            vec![
                Ok(json!({"chromeosdevices": [{"deviceId": "a"}], "nextPageToken": "p2"})),
                Ok(json!({"chromeosdevices": [{"deviceId": "b"}]})),
            ],
        );
        let fetcher = fetcher(&transport);

        let first = fetcher.next_device_page("C01", Some("/MOTF"), Some("5CD")).await.unwrap();
        assert!(!first.is_last());
        assert_eq!(fetcher.cursor_state().devices.as_deref(), Some("p2"));

        let second = fetcher.next_device_page("C01", Some("/MOTF"), Some("5CD")).await.unwrap();
        assert!(second.is_last());
        assert_eq!(fetcher.cursor_state().devices, None);

        let requests = transport.requests_to(DEVICES);
        assert_eq!(requests[0].param(PAGE_TOKEN), None);
        assert_eq!(requests[1].param(PAGE_TOKEN), Some("p2"));
        assert_eq!(requests[1].param("orgUnitPath"), Some("/MOTF"));
        assert_eq!(requests[1].param("query"), Some("id:5CD"));
    }

    #[tokio::test]
    async fn test_failed_page_resets_cursor() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_sequence(
            TELEMETRY,
            vec![
                Ok(json!({"devices": [], "nextPageToken": "t2"})),
                Err(FleetError::Http { status: 500, message: "boom".into() }),
                Ok(json!({"devices": []})),
            ],
        );
        let fetcher = fetcher(&transport);

        fetcher.next_telemetry_page("C01").await.unwrap();
        assert_eq!(fetcher.cursor_state().telemetry.as_deref(), Some("t2"));
        assert!(fetcher.next_telemetry_page("C01").await.is_err());
        assert_eq!(fetcher.cursor_state().telemetry, None);

        fetcher.next_telemetry_page("C01").await.unwrap();
        let requests = transport.requests_to(TELEMETRY);
        assert_eq!(requests[2].param(PAGE_TOKEN), None);
        assert_eq!(requests[2].param("readMask"), Some(TELEMETRY_READ_MASK));
    }

    #[tokio::test]
    async fn test_malformed_page_is_decode_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(DEVICES, json!({"chromeosdevices": "nope"}));
        let fetcher = fetcher(&transport);
        assert!(matches!(
            fetcher.next_device_page("C01", None, None).await,
            Err(FleetError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_parent_name() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("/admin/directory/v1/customer/C01/orgunits/id:03ph8a2z", json!({"name": "Root"}));
        let fetcher = fetcher(&transport);

        assert_eq!(
            fetcher.parent_name("C01", Some("id:03ph8a2z")).await.as_deref(),
            Some("Root")
        );
        assert_eq!(fetcher.parent_name("C01", None).await, None);
        assert_eq!(fetcher.parent_name("C01", Some("id:missing")).await, None);
    }

    #[test]
    fn test_merge_telemetry() {
        let mut devices = vec![json!({"deviceId": "a"}), json!({"deviceId": "b"}), json!({"model": "x"})];
        let telemetry = vec![
            json!({"deviceId": "b", "audioStatusReport": [{"outputVolume": 35}]}),
            json!({"deviceId": "a"}),
        ];
        merge_telemetry(&mut devices, &telemetry);
        assert!(devices[0].get("audioStatusReport").is_none());
        assert_eq!(devices[1]["audioStatusReport"], "35");
        assert!(devices[2].get("audioStatusReport").is_none());
    }
}
