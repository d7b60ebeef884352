//! Remote API of the cafeteria system.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::trace;
use url::Url;

use super::dto::{ApiContact, ApiDish, ApiHash, ApiOpeningHours, ApiSubsystem, ApiWeekDish};
use super::types::{Language, SubsystemParams};
use crate::sync::SyncError;

/// Typed access to the upstream endpoints.
#[async_trait]
pub trait MenzaApi: Send + Sync {
  async fn subsystems(&self, language: Language) -> Result<Vec<ApiSubsystem>, SyncError>;

  /// Lightweight content hash of today's dishes.
  async fn today_hash(&self, params: SubsystemParams) -> Result<String, SyncError>;

  async fn today_dishes(&self, params: SubsystemParams) -> Result<Vec<ApiDish>, SyncError>;

  /// Fails with [`SyncError::WeekNotAvailable`] when the cafeteria publishes
  /// no week menu.
  async fn week_dishes(&self, params: SubsystemParams) -> Result<Vec<ApiWeekDish>, SyncError>;

  async fn contacts(&self, params: SubsystemParams) -> Result<Vec<ApiContact>, SyncError>;

  async fn opening_hours(&self, params: SubsystemParams)
    -> Result<Vec<ApiOpeningHours>, SyncError>;
}

/// [`MenzaApi`] over HTTP + JSON.
#[derive(Clone)]
pub struct HttpMenzaApi {
  client: reqwest::Client,
  base: Url,
}

impl HttpMenzaApi {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let mut base =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API URL {}: {}", base_url, e))?;
    // Url::join drops the last segment unless the path ends with a slash
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("menza-sync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  fn subsystem_path(params: SubsystemParams, resource: &str) -> String {
    format!(
      "{}/subsystems/{}/{}",
      params.language.code(),
      params.subsystem,
      resource
    )
  }

  /// GET `path` and decode the JSON body.
  ///
  /// `not_found` replaces the generic HTTP error for a 404 response.
  async fn get<T: DeserializeOwned>(
    &self,
    path: &str,
    not_found: Option<SyncError>,
  ) -> Result<T, SyncError> {
    let url = self
      .base
      .join(path)
      .map_err(|e| SyncError::Internal(format!("Invalid endpoint {}: {}", path, e)))?;
    trace!(%url, "GET");

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(map_transport_error)?;

    let status = response.status();
    if status == StatusCode::GONE {
      return Err(SyncError::Unavailable(format!("{} is no longer served", path)));
    }
    if status == StatusCode::NOT_FOUND {
      if let Some(error) = not_found {
        return Err(error);
      }
    }
    if !status.is_success() {
      return Err(SyncError::Http(status.as_u16()));
    }

    let body = response.bytes().await.map_err(map_transport_error)?;
    serde_json::from_slice(&body).map_err(|e| SyncError::Serialization(format!("{}: {}", path, e)))
  }
}

fn map_transport_error(e: reqwest::Error) -> SyncError {
  if e.is_timeout() {
    SyncError::Timeout
  } else if e.is_connect() {
    SyncError::NoConnection
  } else if e.is_decode() {
    SyncError::Serialization(e.to_string())
  } else if let Some(status) = e.status() {
    SyncError::Http(status.as_u16())
  } else if e.is_body() || e.is_request() {
    SyncError::ConnectionClosed
  } else {
    SyncError::Internal(e.to_string())
  }
}

#[async_trait]
impl MenzaApi for HttpMenzaApi {
  async fn subsystems(&self, language: Language) -> Result<Vec<ApiSubsystem>, SyncError> {
    self
      .get(&format!("{}/subsystems", language.code()), None)
      .await
  }

  async fn today_hash(&self, params: SubsystemParams) -> Result<String, SyncError> {
    let hash: ApiHash = self
      .get(&Self::subsystem_path(params, "dishes/today/hash"), None)
      .await?;
    Ok(hash.hash)
  }

  async fn today_dishes(&self, params: SubsystemParams) -> Result<Vec<ApiDish>, SyncError> {
    self
      .get(&Self::subsystem_path(params, "dishes/today"), None)
      .await
  }

  async fn week_dishes(&self, params: SubsystemParams) -> Result<Vec<ApiWeekDish>, SyncError> {
    self
      .get(
        &Self::subsystem_path(params, "dishes/week"),
        Some(SyncError::WeekNotAvailable),
      )
      .await
  }

  async fn contacts(&self, params: SubsystemParams) -> Result<Vec<ApiContact>, SyncError> {
    self
      .get(&Self::subsystem_path(params, "contacts"), None)
      .await
  }

  async fn opening_hours(
    &self,
    params: SubsystemParams,
  ) -> Result<Vec<ApiOpeningHours>, SyncError> {
    self
      .get(&Self::subsystem_path(params, "opening-hours"), None)
      .await
  }
}
