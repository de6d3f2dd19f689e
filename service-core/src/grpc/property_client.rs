//! Property service client.

use serde::Serialize;
use tonic::Request;
use tonic::transport::Channel;

use super::adapter::{RpcAdapter, RpcAdapterConfig};
use super::directory::{ClientDirectory, LogicalService};
use super::interceptors::inject_trace_context;
use super::proto::property::property_service_client::PropertyServiceClient;
use super::proto::property::{
    GetPropertyRequest, GetPropertyResponse, Property, SearchPropertiesRequest,
};
use crate::error::AppError;

/// Client-side view of a property.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySummary {
    pub id: String,
    pub title: String,
    pub owner_id: String,
    pub city: String,
    pub price: f64,
    pub status: String,
}

impl From<Property> for PropertySummary {
    fn from(p: Property) -> Self {
        Self {
            id: p.id,
            title: p.title,
            owner_id: p.owner_id,
            city: p.city,
            price: p.price,
            status: p.status,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PropertySearch {
    pub city: Option<String>,
    pub owner_id: Option<String>,
    pub page: i32,
    pub limit: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyPage {
    pub properties: Vec<PropertySummary>,
    pub total_count: i64,
}

#[derive(Clone, Debug)]
pub struct PropertyClient {
    adapter: RpcAdapter,
    client: PropertyServiceClient<Channel>,
}

impl PropertyClient {
    pub fn new(directory: &ClientDirectory, config: &RpcAdapterConfig) -> Result<Self, AppError> {
        let endpoint = directory.resolve(LogicalService::Property)?;
        Ok(Self::from_adapter(RpcAdapter::new(endpoint, config)?))
    }

    pub fn from_adapter(adapter: RpcAdapter) -> Self {
        let client = PropertyServiceClient::new(adapter.channel());
        Self { adapter, client }
    }

    pub async fn get_property(&self, id: &str) -> Result<PropertySummary, AppError> {
        let response = self
            .adapter
            .call("GetProperty", || {
                let mut client = self.client.clone();
                let mut request = Request::new(GetPropertyRequest { id: id.to_string() });
                inject_trace_context(&mut request);
                async move { client.get_property(request).await }
            })
            .await?;

        response
            .property
            .map(PropertySummary::from)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Property {} not found", id)))
    }

    /// `None` when the property is missing or the service cannot answer.
    pub async fn get_property_or_none(&self, id: &str) -> Option<PropertySummary> {
        if id.is_empty() {
            return None;
        }

        self.adapter
            .call_or_default("GetProperty", GetPropertyResponse { property: None }, || {
                let mut client = self.client.clone();
                let mut request = Request::new(GetPropertyRequest { id: id.to_string() });
                inject_trace_context(&mut request);
                async move { client.get_property(request).await }
            })
            .await
            .property
            .map(PropertySummary::from)
    }

    pub async fn search_properties(&self, search: &PropertySearch) -> Result<PropertyPage, AppError> {
        let message = SearchPropertiesRequest {
            city: search.city.clone().unwrap_or_default(),
            owner_id: search.owner_id.clone().unwrap_or_default(),
            page: search.page.max(1),
            limit: if search.limit <= 0 { 10 } else { search.limit },
        };

        let response = self
            .adapter
            .call("SearchProperties", || {
                let mut client = self.client.clone();
                let mut request = Request::new(message.clone());
                inject_trace_context(&mut request);
                async move { client.search_properties(request).await }
            })
            .await?;

        Ok(PropertyPage {
            properties: response
                .properties
                .into_iter()
                .map(PropertySummary::from)
                .collect(),
            total_count: response.total_count,
        })
    }
}
