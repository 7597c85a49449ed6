//! reqwest clients for the collaborator services.
//!
//! Every request carries the caller's bearer token and is bounded by the
//! client timeout. A request that gets no response maps to
//! [`CollaboratorError::Unavailable`]; any non-2xx status maps to
//! [`CollaboratorError::Status`].

use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::Order;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{Cart, CartClient, IdentityClient, OrderClient, UserProfile};
use crate::caller::Caller;
use crate::error::CollaboratorError;

#[derive(Debug, Clone)]
struct ServiceClient {
    service: &'static str,
    base_url: String,
    http: reqwest::Client,
}

impl ServiceClient {
    fn new(service: &'static str, base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Unavailable {
                service,
                reason: e.to_string(),
            })?;
        Ok(Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, CollaboratorError> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!(service = self.service, error = %e, "collaborator request failed");
            CollaboratorError::Unavailable {
                service: self.service,
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(service = self.service, status = status.as_u16(), "collaborator returned error status");
            return Err(CollaboratorError::Status {
                service: self.service,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<T, CollaboratorError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.send(self.http.get(url).bearer_auth(token)).await?;
        response.json::<T>().await.map_err(|e| CollaboratorError::Decode {
            service: self.service,
            reason: e.to_string(),
        })
    }

    async fn delete(&self, path: &str, token: &str) -> Result<(), CollaboratorError> {
        let url = format!("{}{}", self.base_url, path);
        self.send(self.http.delete(url).bearer_auth(token)).await.map(|_| ())
    }
}

#[derive(Deserialize)]
struct CartResponse {
    cart: Cart,
}

#[derive(Deserialize)]
struct UserResponse {
    #[serde(rename = "userInfo")]
    user_info: UserProfile,
}

#[derive(Deserialize)]
struct OrderResponse {
    order: Order,
}

/// Cart service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCartClient {
    client: ServiceClient,
}

impl HttpCartClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: ServiceClient::new("cart", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl CartClient for HttpCartClient {
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    async fn get_cart(&self, caller: &Caller) -> Result<Cart, CollaboratorError> {
        let response: CartResponse = self.client.get_json("/api/cart/get", &caller.token).await?;
        Ok(response.cart)
    }

    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    async fn clear_cart(&self, caller: &Caller) -> Result<(), CollaboratorError> {
        self.client.delete("/api/cart/clear", &caller.token).await
    }
}

/// Identity service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIdentityClient {
    client: ServiceClient,
}

impl HttpIdentityClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: ServiceClient::new("identity", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    async fn get_user(&self, caller: &Caller) -> Result<UserProfile, CollaboratorError> {
        let response: UserResponse = self.client.get_json("/api/auth/user", &caller.token).await?;
        Ok(response.user_info)
    }
}

/// Order service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpOrderClient {
    client: ServiceClient,
}

impl HttpOrderClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: ServiceClient::new("order", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl OrderClient for HttpOrderClient {
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    async fn get_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order, CollaboratorError> {
        let path = format!("/api/order/get/{order_id}");
        let response: OrderResponse = self.client.get_json(&path, &caller.token).await?;
        Ok(response.order)
    }
}
