/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Backend Communications.
//!
//! The backend's notification registry: register a device (or update its token), and forget it
//! again. The registry keys devices by `deviceId`, so registering a known id with a new token
//! updates that device in place instead of adding a second one.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{info, Error, Result};
use crate::internal::config::AgentConfiguration;

mod rate_limiter;
pub use rate_limiter::PersistedRateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Platform::Ios => "ios",
                Platform::Android => "android",
                Platform::Web => "web",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistrationRequest {
    pub token: String,
    pub device_id: String,
    pub device_name: String,
    pub platform: Platform,
    pub metadata: Map<String, Value>,
}

/// The registry's view of a device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    pub token: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// A link to the backend notification registry
#[cfg_attr(test, mockall::automock)]
pub trait Connection {
    /// Register a device, or update the token of one the registry already knows.
    fn register_device(&self, request: &DeviceRegistrationRequest) -> Result<DeviceRecord>;

    fn unregister_device(&self, device_id: &str) -> Result<()>;
}

impl<T: Connection + ?Sized> Connection for Box<T> {
    fn register_device(&self, request: &DeviceRegistrationRequest) -> Result<DeviceRecord> {
        (**self).register_device(request)
    }

    fn unregister_device(&self, device_id: &str) -> Result<()> {
        (**self).unregister_device(device_id)
    }
}

impl<T: Connection + ?Sized> Connection for &T {
    fn register_device(&self, request: &DeviceRegistrationRequest) -> Result<DeviceRecord> {
        (**self).register_device(request)
    }

    fn unregister_device(&self, device_id: &str) -> Result<()> {
        (**self).unregister_device(device_id)
    }
}

/// Connect to the registry over HTTP
pub struct ConnectHttp {
    options: AgentConfiguration,
    auth_token: Option<String>,
    client: reqwest::blocking::Client,
}

impl ConnectHttp {
    pub fn new(options: AgentConfiguration) -> Result<Self> {
        Ok(Self {
            options,
            auth_token: None,
            client: reqwest::blocking::Client::builder().build()?,
        })
    }

    /// Send `Authorization: Bearer <token>` with every call.
    pub fn with_auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    fn authorize(
        &self,
        builder: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn send(
        &self,
        builder: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response> {
        self.authorize(builder)
            .send()
            .map_err(|e| Error::NetworkError(e.to_string()))
    }

    fn check_response_error(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response> {
        #[derive(Deserialize)]
        struct ResponseError {
            #[serde(alias = "error")]
            message: String,
        }
        let status = response.status();
        if !(status.is_client_error() || status.is_server_error()) {
            return Ok(response);
        }
        let text = response.text().unwrap_or_default();
        let message = serde_json::from_str::<ResponseError>(&text)
            .map(|e| e.message)
            .unwrap_or(text);
        if status.is_server_error() {
            return Err(Error::CommunicationServerError {
                status: status.as_u16(),
                message,
            });
        }
        Err(Error::CommunicationError(format!(
            "Unhandled client error {}: {}",
            status.as_u16(),
            message
        )))
    }
}

impl Connection for ConnectHttp {
    fn register_device(&self, request: &DeviceRegistrationRequest) -> Result<DeviceRecord> {
        let url = self.options.api_url("notifications/devices")?;
        let response = self.send(self.client.post(url.clone()).json(request))?;
        info!(
            "registered device '{}' via {} - {}",
            request.device_id,
            url,
            response.status()
        );
        let response = Self::check_response_error(response)?;
        Ok(response.json()?)
    }

    fn unregister_device(&self, device_id: &str) -> Result<()> {
        let mut url = self.options.api_url("notifications/devices")?;
        url.path_segments_mut()
            .map_err(|_| Error::GeneralError("registry URL cannot be a base".into()))?
            .push(device_id);
        let response = self.send(self.client.delete(url.clone()))?;
        info!("unregistered device via {}: {}", url, response.status());
        Self::check_response_error(response)?;
        Ok(())
    }
}
