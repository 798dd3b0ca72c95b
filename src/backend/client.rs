use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use reqwest::{header, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use super::api_types::{endpoint, error_from_response, transport_error};
use super::cache::ListQuery;
use super::types::{Account, Entity};
use crate::session::AuthProvider;

/// Asks the REST layer to return a single object instead of an array.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Client for the hosted store's REST surface (`/rest/v1/{table}`).
#[derive(Clone)]
pub struct RestClient {
  http: reqwest::Client,
  base_url: Url,
  anon_key: String,
  auth: Arc<dyn AuthProvider>,
}

impl RestClient {
  pub fn new(
    http: reqwest::Client,
    base_url: Url,
    anon_key: String,
    auth: Arc<dyn AuthProvider>,
  ) -> Self {
    Self {
      http,
      base_url,
      anon_key,
      auth,
    }
  }

  /// List rows of `T` matching `query`.
  pub async fn select<T: Entity>(&self, query: &ListQuery) -> Result<Vec<T>> {
    let url = self.select_url::<T>(query)?;
    let request = self.request(Method::GET, url).await;

    self
      .send(request)
      .await
      .wrap_err_with(|| format!("Failed to list {}", T::table()))
  }

  /// Get one row by primary key.
  pub async fn get<T: Entity>(&self, id: &str) -> Result<T> {
    let mut url = self.table_url::<T>()?;
    url
      .query_pairs_mut()
      .append_pair("select", "*")
      .append_pair("id", &format!("eq.{}", id));
    let request = self
      .request(Method::GET, url)
      .await
      .header(header::ACCEPT, SINGLE_OBJECT);

    self
      .send(request)
      .await
      .wrap_err_with(|| format!("Failed to read {} row {}", T::table(), id))
  }

  /// Insert a row and return it as stored.
  pub async fn insert<T: Entity>(&self, row: &Value) -> Result<T> {
    let url = self.table_url::<T>()?;
    let request = self
      .request(Method::POST, url)
      .await
      .header(header::ACCEPT, SINGLE_OBJECT)
      .header("Prefer", "return=representation")
      .json(row);

    self
      .send(request)
      .await
      .wrap_err_with(|| format!("Failed to insert into {}", T::table()))
  }

  /// Patch a row and return it as stored.
  pub async fn update<T: Entity>(&self, id: &str, patch: &Value) -> Result<T> {
    let mut url = self.table_url::<T>()?;
    url
      .query_pairs_mut()
      .append_pair("id", &format!("eq.{}", id));
    let request = self
      .request(Method::PATCH, url)
      .await
      .header(header::ACCEPT, SINGLE_OBJECT)
      .header("Prefer", "return=representation")
      .json(patch);

    self
      .send(request)
      .await
      .wrap_err_with(|| format!("Failed to update {} row {}", T::table(), id))
  }

  /// Delete a row by primary key.
  pub async fn delete<T: Entity>(&self, id: &str) -> Result<()> {
    let mut url = self.table_url::<T>()?;
    url
      .query_pairs_mut()
      .append_pair("id", &format!("eq.{}", id));
    let request = self.request(Method::DELETE, url).await;

    let response = request.send().await.map_err(transport_error)?;
    if !response.status().is_success() {
      return Err(error_from_response(response).await)
        .wrap_err_with(|| format!("Failed to delete {} row {}", T::table(), id));
    }
    Ok(())
  }

  /// Cheapest possible read, used to check the backend is reachable.
  pub async fn ping(&self) -> Result<()> {
    let mut url = self.table_url::<Account>()?;
    url
      .query_pairs_mut()
      .append_pair("select", "id")
      .append_pair("limit", "1");
    let request = self.request(Method::GET, url).await;

    let _: Vec<Value> = self.send(request).await.wrap_err("Backend ping failed")?;
    Ok(())
  }

  fn table_url<T: Entity>(&self) -> Result<Url> {
    endpoint(&self.base_url, &format!("rest/v1/{}", T::table()))
  }

  fn select_url<T: Entity>(&self, query: &ListQuery) -> Result<Url> {
    let mut url = self.table_url::<T>()?;
    {
      let mut pairs = url.query_pairs_mut();
      pairs.append_pair("select", "*");
      for (column, value) in &query.filters {
        pairs.append_pair(column, &format!("eq.{}", value));
      }
      if let Some(order) = &query.order {
        pairs.append_pair("order", order);
      }
      pairs
        .append_pair("limit", &query.page_size.to_string())
        .append_pair("offset", &query.offset().to_string());
    }
    Ok(url)
  }

  /// Start a request carrying the API key and the best available bearer token.
  async fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let token = match self.auth.session().await {
      Some(session) => session.access_token,
      None => self.anon_key.clone(),
    };

    self
      .http
      .request(method, url)
      .header("apikey", &self.anon_key)
      .bearer_auth(token)
  }

  async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R> {
    let response = request.send().await.map_err(transport_error)?;
    if !response.status().is_success() {
      return Err(error_from_response(response).await.into());
    }

    response
      .json::<R>()
      .await
      .map_err(|e| eyre!("Failed to parse response: {}", e))
  }
}
