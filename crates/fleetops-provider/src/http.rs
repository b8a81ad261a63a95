//! REST client for the provider API.
//!
//! `HttpProviderClient` and `HttpUserDirectory` share one transport: a
//! `reqwest::Client` with basic-auth credentials and the provider's
//! `{service}/{id}/{method}.json` URL scheme. Every non-success response is
//! classified into a [`ProviderError`] before it leaves this module.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use fleetops_core::{DeviceId, InstanceId, PermissionKey, Uid};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::{ProviderClient, UserDirectory};
use crate::error::{ProviderError, Result};
use crate::types::{
    Billing, Instance, NewUser, PowerState, ProvisioningTemplate, TransactionStatus, User,
    UserFilter, UserStatus, ValidationResult, VpnAccess,
};

/// Default public endpoint of the provider REST API.
pub const DEFAULT_ENDPOINT: &str = "https://api.softlayer.com/rest/v3";

const GUEST_MASK: &str =
    "mask[id,hostname,domain,powerState.keyName,activeTransaction.id,datacenter.name,provisionDate]";
const TRANSACTION_MASK: &str = "mask[id,hostname,activeTransaction.id,provisionDate]";
const USER_MASK: &str = "mask[id,username,email,hardware.id,permissions.keyName]";

/// Connection settings for the REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpProviderConfig {
    /// Base URL of the REST API.
    #[serde(default = "HttpProviderConfig::default_endpoint")]
    pub endpoint: String,

    /// Whole-request timeout in seconds.
    #[serde(default = "HttpProviderConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// TCP connect timeout in seconds.
    #[serde(default = "HttpProviderConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl HttpProviderConfig {
    fn default_endpoint() -> String {
        DEFAULT_ENDPOINT.to_string()
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    const fn default_connect_timeout() -> u64 {
        5
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            request_timeout_seconds: Self::default_request_timeout(),
            connect_timeout_seconds: Self::default_connect_timeout(),
        }
    }
}

/// API username and key.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    api_key: String,
}

impl Credentials {
    /// Create credentials from an API username and key.
    pub fn new(username: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            api_key: api_key.into(),
        }
    }

    /// The API username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Error body returned by the provider.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Clone)]
struct RestTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl RestTransport {
    fn new(config: &HttpProviderConfig, credentials: Credentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ProviderError::fatal("client setup", e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let request = self.client.get(self.url(path)).query(query);
        self.send(operation, request).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        parameters: Value,
    ) -> Result<T> {
        let request = self
            .client
            .post(self.url(path))
            .json(&json!({ "parameters": parameters }));
        self.send(operation, request).await
    }

    async fn delete<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<T> {
        let request = self.client.delete(self.url(path));
        self.send(operation, request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request
            .basic_auth(&self.credentials.username, Some(&self.credentials.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::transient(operation, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| ProviderError::Decode {
                operation: operation.to_string(),
                message: e.to_string(),
            });
        }

        let body = response.json::<ErrorResponse>().await.ok();
        let code = body.as_ref().and_then(|b| b.code.clone());
        let message = body
            .map(|b| b.error)
            .unwrap_or_else(|| format!("provider returned status {status}"));

        tracing::error!(
            operation,
            status = %status,
            code = code.as_deref().unwrap_or("-"),
            error = %message,
            "Provider request failed"
        );

        Err(ProviderError::classify(
            operation,
            status.as_u16(),
            code.as_deref(),
            message,
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKeyName {
    key_name: String,
}

#[derive(Debug, Deserialize)]
struct RawName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct RawId {
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGuest {
    id: u64,
    hostname: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    power_state: Option<RawKeyName>,
    #[serde(default)]
    active_transaction: Option<Value>,
    #[serde(default)]
    datacenter: Option<RawName>,
    #[serde(default)]
    provision_date: Option<String>,
}

impl RawGuest {
    fn transaction_status(&self) -> TransactionStatus {
        if self.active_transaction.is_none() && self.provision_date.is_some() {
            TransactionStatus::Ready
        } else {
            TransactionStatus::Pending
        }
    }
}

impl From<RawGuest> for Instance {
    fn from(raw: RawGuest) -> Self {
        let power_state = if raw.active_transaction.is_some() {
            PowerState::Transitioning
        } else {
            raw.power_state
                .as_ref()
                .map_or(PowerState::Unknown, |p| PowerState::from_provider_key(&p.key_name))
        };

        Self {
            id: InstanceId::new(raw.id),
            hostname: raw.hostname,
            power_state,
            domain: raw.domain,
            datacenter: raw.datacenter.map(|d| d.name),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPrice {
    #[serde(default)]
    hourly_recurring_fee: Option<String>,
    #[serde(default)]
    item: Option<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawOrderTemplate {
    #[serde(default)]
    prices: Vec<RawPrice>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: u64,
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    hardware: Vec<RawId>,
    #[serde(default)]
    permissions: Vec<RawKeyName>,
}

impl From<RawUser> for User {
    fn from(raw: RawUser) -> Self {
        Self {
            uid: Uid::new(raw.id),
            username: raw.username,
            email: raw.email,
            hardware_access: raw.hardware.into_iter().map(|h| DeviceId::new(h.id)).collect(),
            portal_permissions: raw
                .permissions
                .into_iter()
                .filter_map(|p| PermissionKey::new(p.key_name).ok())
                .collect(),
        }
    }
}

/// Build the provider's order container for a template.
fn order_body(template: &ProvisioningTemplate) -> Value {
    // Device slot 1 is reserved for swap.
    let block_devices: Vec<Value> = template
        .disks_gb
        .iter()
        .enumerate()
        .map(|(index, capacity)| {
            let device = if index == 0 { 0 } else { index + 1 };
            json!({
                "device": device.to_string(),
                "diskImage": { "capacity": capacity },
            })
        })
        .collect();

    let ssh_keys: Vec<Value> = template
        .ssh_key_ids
        .iter()
        .map(|id| json!({ "id": id }))
        .collect();

    json!({
        "hostname": template.hostname,
        "domain": template.domain,
        "startCpus": template.cpus,
        "maxMemory": template.memory_mb,
        "hourlyBillingFlag": template.billing == Billing::Hourly,
        "localDiskFlag": template.local_disk,
        "dedicatedAccountHostOnlyFlag": template.dedicated,
        "privateNetworkOnlyFlag": template.private_network_only,
        "operatingSystemReferenceCode": template.os_code,
        "datacenter": { "name": template.datacenter },
        "blockDevices": block_devices,
        "sshKeys": ssh_keys,
    })
}

fn guest_path(id: InstanceId, method: &str) -> String {
    format!("SoftLayer_Virtual_Guest/{id}/{method}.json")
}

fn user_path(uid: Uid, method: &str) -> String {
    format!("SoftLayer_User_Customer/{uid}/{method}.json")
}

/// REST implementation of [`ProviderClient`].
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    transport: RestTransport,
}

impl HttpProviderClient {
    /// Create a new provider client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &HttpProviderConfig, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            transport: RestTransport::new(config, credentials)?,
        })
    }

    /// A user directory sharing this client's connection pool and credentials.
    #[must_use]
    pub fn user_directory(&self) -> HttpUserDirectory {
        HttpUserDirectory {
            transport: self.transport.clone(),
        }
    }

    /// Get the base URL of the provider API.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.transport.base_url
    }

    async fn guest_action(&self, id: InstanceId, method: &str) -> Result<()> {
        let operation = format!("SoftLayer_Virtual_Guest::{method}");
        self.transport
            .get::<Value>(&operation, &guest_path(id, method), &[])
            .await?;
        tracing::debug!(instance_id = %id, method, "Provider accepted guest action");
        Ok(())
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let guests: Vec<RawGuest> = self
            .transport
            .get(
                "SoftLayer_Account::getVirtualGuests",
                "SoftLayer_Account/getVirtualGuests.json",
                &[("objectMask", GUEST_MASK.to_string())],
            )
            .await?;
        Ok(guests.into_iter().map(Instance::from).collect())
    }

    async fn get_instance(&self, id: InstanceId) -> Result<Instance> {
        let guest: RawGuest = self
            .transport
            .get(
                "SoftLayer_Virtual_Guest::getObject",
                &guest_path(id, "getObject"),
                &[("objectMask", GUEST_MASK.to_string())],
            )
            .await?;
        Ok(guest.into())
    }

    async fn power_on(&self, id: InstanceId) -> Result<()> {
        self.guest_action(id, "powerOn").await
    }

    async fn power_off(&self, id: InstanceId) -> Result<()> {
        self.guest_action(id, "powerOff").await
    }

    async fn reboot(&self, id: InstanceId) -> Result<()> {
        self.guest_action(id, "rebootDefault").await
    }

    async fn reload(&self, id: InstanceId) -> Result<()> {
        self.transport
            .post::<Value>(
                "SoftLayer_Virtual_Guest::reloadOperatingSystem",
                &guest_path(id, "reloadOperatingSystem"),
                json!(["FORCE", {}]),
            )
            .await?;
        tracing::debug!(instance_id = %id, "Provider accepted OS reload");
        Ok(())
    }

    async fn cancel(&self, id: InstanceId) -> Result<()> {
        self.transport
            .delete::<Value>(
                "SoftLayer_Virtual_Guest::deleteObject",
                &format!("SoftLayer_Virtual_Guest/{id}.json"),
            )
            .await?;
        tracing::debug!(instance_id = %id, "Provider accepted cancellation");
        Ok(())
    }

    async fn create_instance(&self, template: &ProvisioningTemplate) -> Result<Instance> {
        let guest: RawGuest = self
            .transport
            .post(
                "SoftLayer_Virtual_Guest::createObject",
                "SoftLayer_Virtual_Guest/createObject.json",
                json!([order_body(template)]),
            )
            .await?;

        let mut instance = Instance::from(guest);
        instance.power_state = PowerState::Transitioning;

        if !template.tags.is_empty() {
            // The guest exists and is billed at this point, so a tagging failure
            // is reported but does not fail the order.
            if let Err(e) = self
                .transport
                .post::<Value>(
                    "SoftLayer_Virtual_Guest::setTags",
                    &guest_path(instance.id, "setTags"),
                    json!([template.tags.join(",")]),
                )
                .await
            {
                tracing::warn!(instance_id = %instance.id, error = %e, "Failed to tag new instance");
            }
        }

        Ok(instance)
    }

    async fn validate_instance(
        &self,
        template: &ProvisioningTemplate,
    ) -> Result<ValidationResult> {
        let result = self
            .transport
            .post::<RawOrderTemplate>(
                "SoftLayer_Virtual_Guest::generateOrderTemplate",
                "SoftLayer_Virtual_Guest/generateOrderTemplate.json",
                json!([order_body(template)]),
            )
            .await;

        match result {
            Ok(order) => {
                let fees: Vec<f64> = order
                    .prices
                    .iter()
                    .filter_map(|p| p.hourly_recurring_fee.as_deref())
                    .filter_map(|fee| fee.parse::<f64>().ok())
                    .collect();
                let hourly_cost = (!fees.is_empty()).then(|| fees.iter().sum());
                let price_items = order
                    .prices
                    .into_iter()
                    .filter_map(|p| p.item.map(|i| i.description))
                    .collect();

                Ok(ValidationResult {
                    hostname: template.hostname.clone(),
                    accepted: true,
                    rejection: None,
                    hourly_cost,
                    price_items,
                })
            }
            Err(ProviderError::OrderRejected { message, .. }) => Ok(ValidationResult {
                hostname: template.hostname.clone(),
                accepted: false,
                rejection: Some(message),
                hourly_cost: None,
                price_items: Vec::new(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn get_transaction_status(&self, id: InstanceId) -> Result<TransactionStatus> {
        let guest: RawGuest = self
            .transport
            .get(
                "SoftLayer_Virtual_Guest::getObject",
                &guest_path(id, "getObject"),
                &[("objectMask", TRANSACTION_MASK.to_string())],
            )
            .await?;
        Ok(guest.transaction_status())
    }
}

/// REST implementation of [`UserDirectory`].
#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    transport: RestTransport,
}

impl HttpUserDirectory {
    /// Create a new user directory client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &HttpProviderConfig, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            transport: RestTransport::new(config, credentials)?,
        })
    }

    async fn edit_user(&self, uid: Uid, fields: Value) -> Result<()> {
        self.transport
            .post::<Value>(
                "SoftLayer_User_Customer::editObject",
                &user_path(uid, "editObject"),
                json!([fields]),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn list_users(&self) -> Result<Vec<Uid>> {
        let users: Vec<RawId> = self
            .transport
            .get(
                "SoftLayer_Account::getUsers",
                "SoftLayer_Account/getUsers.json",
                &[("objectMask", "mask[id]".to_string())],
            )
            .await?;
        Ok(users.into_iter().map(|u| Uid::new(u.id)).collect())
    }

    async fn get_user(&self, uid: Uid) -> Result<User> {
        let user: RawUser = self
            .transport
            .get(
                "SoftLayer_User_Customer::getObject",
                &user_path(uid, "getObject"),
                &[("objectMask", USER_MASK.to_string())],
            )
            .await?;
        Ok(user.into())
    }

    async fn get_user_status(&self, uid: Uid) -> Result<UserStatus> {
        let operation = "SoftLayer_User_Customer::getUserStatus";
        let status: RawStatus = self
            .transport
            .get(operation, &user_path(uid, "getUserStatus"), &[])
            .await?;
        UserStatus::from_code(status.id).ok_or_else(|| ProviderError::Decode {
            operation: operation.to_string(),
            message: format!("unknown user status id {}", status.id),
        })
    }

    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let template = json!({
            "username": user.username,
            "email": user.email,
            "firstName": user.first_name,
            "lastName": user.last_name,
            "permissionSystemVersion": "1",
            "userStatusId": UserStatus::Active.code(),
        });
        let created: RawUser = self
            .transport
            .post(
                "SoftLayer_User_Customer::createObject",
                "SoftLayer_User_Customer/createObject.json",
                json!([template, user.password, user.password]),
            )
            .await?;
        let created = User::from(created);
        tracing::info!(uid = %created.uid, username = %created.username, "Created user");
        Ok(created)
    }

    async fn set_hardware_access(&self, uid: Uid, devices: &BTreeSet<DeviceId>) -> Result<()> {
        let current = self.get_user(uid).await?.hardware_access;
        let remove: Vec<u64> = current.difference(devices).map(|d| d.get()).collect();
        let add: Vec<u64> = devices.difference(&current).map(|d| d.get()).collect();

        if !remove.is_empty() {
            self.transport
                .post::<Value>(
                    "SoftLayer_User_Customer::removeBulkHardwareAccess",
                    &user_path(uid, "removeBulkHardwareAccess"),
                    json!([remove]),
                )
                .await?;
        }
        if !add.is_empty() {
            self.transport
                .post::<Value>(
                    "SoftLayer_User_Customer::addBulkHardwareAccess",
                    &user_path(uid, "addBulkHardwareAccess"),
                    json!([add]),
                )
                .await?;
        }

        tracing::debug!(uid = %uid, removed = remove.len(), added = add.len(), "Set hardware access");
        Ok(())
    }

    async fn set_portal_permissions(
        &self,
        uid: Uid,
        permissions: &BTreeSet<PermissionKey>,
    ) -> Result<()> {
        let all: Vec<Value> = self
            .list_all_permissions()
            .await?
            .iter()
            .map(|key| json!({ "keyName": key.as_str() }))
            .collect();

        self.transport
            .post::<Value>(
                "SoftLayer_User_Customer::removeBulkPortalPermission",
                &user_path(uid, "removeBulkPortalPermission"),
                json!([all]),
            )
            .await?;

        if !permissions.is_empty() {
            let grant: Vec<Value> = permissions
                .iter()
                .map(|key| json!({ "keyName": key.as_str() }))
                .collect();
            self.transport
                .post::<Value>(
                    "SoftLayer_User_Customer::addBulkPortalPermission",
                    &user_path(uid, "addBulkPortalPermission"),
                    json!([grant]),
                )
                .await?;
        }

        tracing::debug!(uid = %uid, granted = permissions.len(), "Set portal permissions");
        Ok(())
    }

    async fn list_all_device_ids(&self) -> Result<BTreeSet<DeviceId>> {
        let hardware: Vec<RawId> = self
            .transport
            .get(
                "SoftLayer_Account::getHardware",
                "SoftLayer_Account/getHardware.json",
                &[("objectMask", "mask[id]".to_string())],
            )
            .await?;
        Ok(hardware.into_iter().map(|h| DeviceId::new(h.id)).collect())
    }

    async fn list_all_permissions(&self) -> Result<BTreeSet<PermissionKey>> {
        let permissions: Vec<RawKeyName> = self
            .transport
            .get(
                "SoftLayer_User_Customer_CustomerPermission_Permission::getAllObjects",
                "SoftLayer_User_Customer_CustomerPermission_Permission/getAllObjects.json",
                &[],
            )
            .await?;
        Ok(permissions
            .into_iter()
            .filter_map(|p| PermissionKey::new(p.key_name).ok())
            .collect())
    }

    async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        let (field, value) = match filter {
            UserFilter::Email(email) => ("email", email),
            UserFilter::Username(username) => ("username", username),
        };
        let object_filter = json!({ "users": { field: { "operation": value } } }).to_string();

        let users: Vec<RawUser> = self
            .transport
            .get(
                "SoftLayer_Account::getUsers",
                "SoftLayer_Account/getUsers.json",
                &[
                    ("objectMask", USER_MASK.to_string()),
                    ("objectFilter", object_filter),
                ],
            )
            .await?;
        Ok(users.into_iter().map(User::from).collect())
    }

    async fn set_user_status(&self, uid: Uid, status: UserStatus) -> Result<()> {
        self.edit_user(uid, json!({ "userStatusId": status.code() }))
            .await?;
        tracing::info!(uid = %uid, status = ?status, "Updated user status");
        Ok(())
    }

    async fn set_vpn_access(&self, uid: Uid, access: VpnAccess) -> Result<()> {
        self.edit_user(
            uid,
            json!({
                "sslVpnAllowedFlag": access.ssl,
                "pptpVpnAllowedFlag": access.pptp,
            }),
        )
        .await?;
        tracing::info!(uid = %uid, ssl = access.ssl, pptp = access.pptp, "Updated VPN access");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, HttpProviderClient) {
        let server = MockServer::start().await;
        let config = HttpProviderConfig {
            endpoint: server.uri(),
            ..Default::default()
        };
        let client = HttpProviderClient::new(&config, Credentials::new("ops", "secret")).unwrap();
        (server, client)
    }

    #[test]
    fn default_config() {
        let config = HttpProviderConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn credentials_debug_redacts_key() {
        let creds = Credentials::new("ops", "super-secret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("ops"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn order_body_skips_swap_slot() {
        let template = ProvisioningTemplate {
            hostname: "vm-demo".into(),
            domain: "example.com".into(),
            datacenter: "dal10".into(),
            cpus: 1,
            memory_mb: 4096,
            os_code: "CentOS_6_64".into(),
            disks_gb: vec![100, 25],
            tags: vec![],
            billing: Billing::Hourly,
            dedicated: false,
            private_network_only: true,
            local_disk: true,
            ssh_key_ids: vec![1234],
        };
        let body = order_body(&template);
        assert_eq!(body["blockDevices"][0]["device"], "0");
        assert_eq!(body["blockDevices"][1]["device"], "2");
        assert_eq!(body["maxMemory"], 4096);
        assert_eq!(body["hourlyBillingFlag"], true);
        assert_eq!(body["sshKeys"][0]["id"], 1234);
    }

    #[tokio::test]
    async fn list_instances_maps_power_state() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/SoftLayer_Account/getVirtualGuests.json"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 555, "hostname": "vm-demo", "powerState": { "keyName": "HALTED" } },
                { "id": 556, "hostname": "web-1", "powerState": { "keyName": "RUNNING" },
                  "activeTransaction": { "id": 9 } },
                { "id": 557, "hostname": "db-1", "datacenter": { "name": "dal10" } },
            ])))
            .mount(&server)
            .await;

        let instances = client.list_instances().await.unwrap();
        assert_eq!(instances.len(), 3);
        assert_eq!(instances[0].id, InstanceId::new(555));
        assert_eq!(instances[0].power_state, PowerState::Stopped);
        assert_eq!(instances[1].power_state, PowerState::Transitioning);
        assert_eq!(instances[2].power_state, PowerState::Unknown);
        assert_eq!(instances[2].datacenter.as_deref(), Some("dal10"));
    }

    #[tokio::test]
    async fn power_on_hits_guest_endpoint() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/555/powerOn.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        client.power_on(InstanceId::new(555)).await.unwrap();
    }

    #[tokio::test]
    async fn reboot_and_reload_use_distinct_endpoints() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/555/rebootDefault.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_Virtual_Guest/555/reloadOperatingSystem.json"))
            .and(body_json(json!({ "parameters": ["FORCE", {}] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("1")))
            .expect(1)
            .mount(&server)
            .await;

        client.reboot(InstanceId::new(555)).await.unwrap();
        client.reload(InstanceId::new(555)).await.unwrap();
    }

    #[tokio::test]
    async fn error_classification() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/1/powerOn.json"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": "Service unavailable", "code": "SoftLayer_Exception_Public"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/2/powerOn.json"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "Unable to find object with id of '2'.",
                "code": "SoftLayer_Exception_ObjectNotFound"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/3/powerOn.json"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "Access Denied.", "code": "SoftLayer_Exception_NotAuthorized"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/4/powerOn.json"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "Cannot power on guest: guest has an active transaction",
                "code": "SoftLayer_Exception_Public"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/5/powerOn.json"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/6/powerOn.json"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let transient = client.power_on(InstanceId::new(1)).await.unwrap_err();
        assert!(transient.is_retriable());

        let invalid_state = client.power_on(InstanceId::new(4)).await.unwrap_err();
        assert!(matches!(invalid_state, ProviderError::Fatal { ref message, .. } if message.contains("active transaction")));
        assert!(!invalid_state.is_retriable());

        let bare_500 = client.power_on(InstanceId::new(5)).await.unwrap_err();
        assert!(bare_500.is_retriable());

        let throttled = client.power_on(InstanceId::new(6)).await.unwrap_err();
        assert!(throttled.is_retriable());

        let missing = client.power_on(InstanceId::new(2)).await.unwrap_err();
        assert!(matches!(missing, ProviderError::NotFound { .. }));

        let fatal = client.power_on(InstanceId::new(3)).await.unwrap_err();
        assert!(matches!(fatal, ProviderError::Fatal { ref message, .. } if message.contains("Access Denied")));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let server = MockServer::start().await;
        let config = HttpProviderConfig {
            endpoint: server.uri(),
            connect_timeout_seconds: 1,
            request_timeout_seconds: 2,
        };
        drop(server);
        let client = HttpProviderClient::new(&config, Credentials::new("ops", "secret")).unwrap();

        let err = client.power_on(InstanceId::new(1)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transient { .. }));
    }

    #[tokio::test]
    async fn transaction_status_reads_active_transaction() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/555/getObject.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 555, "hostname": "vm-demo",
                "activeTransaction": { "id": 77 },
                "provisionDate": "2016-05-01T00:00:00-06:00"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/555/getObject.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 555, "hostname": "vm-demo",
                "provisionDate": "2016-05-01T00:00:00-06:00"
            })))
            .mount(&server)
            .await;

        let id = InstanceId::new(555);
        assert_eq!(
            client.get_transaction_status(id).await.unwrap(),
            TransactionStatus::Pending
        );
        assert_eq!(
            client.get_transaction_status(id).await.unwrap(),
            TransactionStatus::Ready
        );
    }

    fn order_template(datacenter: &str) -> ProvisioningTemplate {
        ProvisioningTemplate {
            hostname: "vm-demo".into(),
            domain: "example.com".into(),
            datacenter: datacenter.into(),
            cpus: 1,
            memory_mb: 1024,
            os_code: "CentOS_6_64".into(),
            disks_gb: vec![100],
            tags: vec![],
            billing: Billing::Hourly,
            dedicated: false,
            private_network_only: true,
            local_disk: true,
            ssh_key_ids: vec![],
        }
    }

    async fn mount_order_response(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/SoftLayer_Virtual_Guest/generateOrderTemplate.json"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn validate_reports_order_exception_as_rejection() {
        let (server, client) = setup().await;
        mount_order_response(
            &server,
            ResponseTemplate::new(500).set_body_json(json!({
                "error": "Invalid datacenter location",
                "code": "SoftLayer_Exception_Order_InvalidLocation"
            })),
        )
        .await;

        let result = client
            .validate_instance(&order_template("nowhere"))
            .await
            .unwrap();
        assert!(!result.accepted);
        assert!(result.rejection.unwrap().contains("Invalid datacenter location"));
    }

    #[tokio::test]
    async fn validate_passes_auth_failure_through() {
        let (server, client) = setup().await;
        mount_order_response(
            &server,
            ResponseTemplate::new(401).set_body_json(json!({
                "error": "Access Denied.", "code": "SoftLayer_Exception_NotAuthorized"
            })),
        )
        .await;

        let err = client
            .validate_instance(&order_template("dal10"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Fatal { .. }));
    }

    #[tokio::test]
    async fn validate_passes_non_order_exception_through() {
        let (server, client) = setup().await;
        mount_order_response(
            &server,
            ResponseTemplate::new(500).set_body_json(json!({
                "error": "Permission denied", "code": "SoftLayer_Exception_Public"
            })),
        )
        .await;

        let err = client
            .validate_instance(&order_template("dal10"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Fatal { .. }));
    }

    #[tokio::test]
    async fn validate_keeps_outage_retriable() {
        let (server, client) = setup().await;
        mount_order_response(&server, ResponseTemplate::new(503)).await;

        let err = client
            .validate_instance(&order_template("dal10"))
            .await
            .unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn validate_sums_hourly_fees() {
        let (server, client) = setup().await;
        mount_order_response(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "prices": [
                    { "hourlyRecurringFee": ".03", "item": { "description": "1 x 2.0 GHz Core" } },
                    { "hourlyRecurringFee": ".02", "item": { "description": "1 GB" } },
                ]
            })),
        )
        .await;

        let result = client
            .validate_instance(&order_template("dal10"))
            .await
            .unwrap();
        assert!(result.accepted);
        assert!((result.hourly_cost.unwrap() - 0.05).abs() < 1e-9);
        assert_eq!(result.price_items.len(), 2);
    }

    #[tokio::test]
    async fn find_users_sends_object_filter() {
        let (server, client) = setup().await;
        let directory = client.user_directory();

        Mock::given(method("GET"))
            .and(path("/SoftLayer_Account/getUsers.json"))
            .and(query_param(
                "objectFilter",
                r#"{"users":{"email":{"operation":"alice@example.com"}}}"#,
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": 101, "username": "alice", "email": "alice@example.com",
                "hardware": [{ "id": 7 }],
                "permissions": [{ "keyName": "SSL_VPN_ENABLED" }]
            }])))
            .mount(&server)
            .await;

        let users = directory
            .find_users(&UserFilter::Email("alice@example.com".into()))
            .await
            .unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].uid, Uid::new(101));
        assert!(users[0].hardware_access.contains(&DeviceId::new(7)));
        assert!(users[0]
            .portal_permissions
            .contains(&PermissionKey::new("SSL_VPN_ENABLED").unwrap()));
    }

    #[tokio::test]
    async fn set_hardware_access_sends_only_the_difference() {
        let (server, client) = setup().await;
        let directory = client.user_directory();

        Mock::given(method("GET"))
            .and(path("/SoftLayer_User_Customer/101/getObject.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 101, "username": "alice", "email": "alice@example.com",
                "hardware": [{ "id": 1 }, { "id": 2 }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_User_Customer/101/removeBulkHardwareAccess.json"))
            .and(body_json(json!({ "parameters": [[1]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_User_Customer/101/addBulkHardwareAccess.json"))
            .and(body_json(json!({ "parameters": [[3]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let target: BTreeSet<DeviceId> = [DeviceId::new(2), DeviceId::new(3)].into();
        directory
            .set_hardware_access(Uid::new(101), &target)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn set_user_status_posts_status_code() {
        let (server, client) = setup().await;
        let directory = client.user_directory();

        Mock::given(method("POST"))
            .and(path("/SoftLayer_User_Customer/101/editObject.json"))
            .and(body_json(json!({ "parameters": [{ "userStatusId": 1002 }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        directory
            .set_user_status(Uid::new(101), UserStatus::Disabled)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn set_portal_permissions_clears_catalogue_before_granting() {
        let (server, client) = setup().await;
        let directory = client.user_directory();

        Mock::given(method("GET"))
            .and(path(
                "/SoftLayer_User_Customer_CustomerPermission_Permission/getAllObjects.json",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "keyName": "TICKET_VIEW" },
                { "keyName": "SSL_VPN_ENABLED" },
                { "keyName": "HARDWARE_VIEW" },
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_User_Customer/101/removeBulkPortalPermission.json"))
            .and(body_json(json!({ "parameters": [[
                { "keyName": "HARDWARE_VIEW" },
                { "keyName": "SSL_VPN_ENABLED" },
                { "keyName": "TICKET_VIEW" },
            ]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_User_Customer/101/addBulkPortalPermission.json"))
            .and(body_json(json!({ "parameters": [[{ "keyName": "SSL_VPN_ENABLED" }]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let baseline: BTreeSet<PermissionKey> = [PermissionKey::ssl_vpn_enabled()].into();
        directory
            .set_portal_permissions(Uid::new(101), &baseline)
            .await
            .unwrap();

        let paths: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/SoftLayer_User_Customer_CustomerPermission_Permission/getAllObjects.json",
                "/SoftLayer_User_Customer/101/removeBulkPortalPermission.json",
                "/SoftLayer_User_Customer/101/addBulkPortalPermission.json",
            ]
        );
    }

    #[tokio::test]
    async fn empty_permission_baseline_only_clears() {
        let (server, client) = setup().await;
        let directory = client.user_directory();

        Mock::given(method("GET"))
            .and(path(
                "/SoftLayer_User_Customer_CustomerPermission_Permission/getAllObjects.json",
            ))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "keyName": "TICKET_VIEW" }])),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_User_Customer/101/removeBulkPortalPermission.json"))
            .and(body_json(json!({ "parameters": [[{ "keyName": "TICKET_VIEW" }]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_User_Customer/101/addBulkPortalPermission.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(0)
            .mount(&server)
            .await;

        directory
            .set_portal_permissions(Uid::new(101), &BTreeSet::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_user_status_maps_status_id() {
        let (server, client) = setup().await;
        let directory = client.user_directory();

        Mock::given(method("GET"))
            .and(path("/SoftLayer_User_Customer/101/getUserStatus.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1022, "keyName": "VPN_ONLY", "name": "VPN Only"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_User_Customer/102/getUserStatus.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 9999 })))
            .mount(&server)
            .await;

        assert_eq!(
            directory.get_user_status(Uid::new(101)).await.unwrap(),
            UserStatus::VpnOnly
        );
        assert!(matches!(
            directory.get_user_status(Uid::new(102)).await,
            Err(ProviderError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn create_user_sends_password_as_parameters() {
        let (server, client) = setup().await;
        let directory = client.user_directory();

        Mock::given(method("POST"))
            .and(path("/SoftLayer_User_Customer/createObject.json"))
            .and(body_json(json!({ "parameters": [
                {
                    "username": "carol",
                    "email": "carol@example.com",
                    "firstName": "Carol",
                    "lastName": "Jones",
                    "permissionSystemVersion": "1",
                    "userStatusId": 1001,
                },
                "from-env-Secret1",
                "from-env-Secret1",
            ] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 205, "username": "carol", "email": "carol@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let new_user = NewUser {
            username: "carol".into(),
            email: "carol@example.com".into(),
            first_name: "Carol".into(),
            last_name: "Jones".into(),
            password: "from-env-Secret1".into(),
        };
        assert!(!format!("{new_user:?}").contains("from-env-Secret1"));

        let user = directory.create_user(&new_user).await.unwrap();
        assert_eq!(user.uid, Uid::new(205));
        assert!(user.hardware_access.is_empty());
    }
}
