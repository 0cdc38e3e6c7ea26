pub mod lookup;
pub mod otc;
pub mod signer;

use crate::credentials::Credentials;
use async_trait::async_trait;
use futures::{
    Stream,
    TryStreamExt as _,
};
use rand::seq::SliceRandom as _;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt::Debug,
    future::Future,
    sync::Arc,
};

pub const TXT_RECORD_SET_TYPE: &str = "TXT";

pub const PRIMARY_NAMESERVER: &str = "100.125.4.25";
pub const SECONDARY_NAMESERVER: &str = "100.125.129.199";

/// Authoritative Open Telekom Cloud nameservers, for verifying published records out of band.
pub const NAMESERVERS: [&str; 2] = [PRIMARY_NAMESERVER, SECONDARY_NAMESERVER];

/// Picks one of [`NAMESERVERS`] uniformly at random.
pub fn random_nameserver() -> &'static str {
    let nameserver = NAMESERVERS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(PRIMARY_NAMESERVER);
    debug!("opentelekomcloud nameserver {nameserver} will be used");
    nameserver
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("opentelekomcloud api error: status={status}, body={body:?}")]
    Status { status: u16, body: String },

    #[error("failed to parse api response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(String),

    #[error("no project found for region {0}")]
    MissingProject(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// A hosted DNS zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_type: Option<String>,
}

/// A named, typed set of records inside a zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub records: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListZonesOpts {
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListRecordSetsOpts {
    pub name: Option<String>,
    pub record_type: Option<String>,
    /// Matches record sets containing this (quoted) value.
    pub records: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreateRecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub records: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpdateRecordSet {
    pub records: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

/// One page of a listing. `next` is the marker to pass for the following page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// An authenticated handle to a DNS service.
#[async_trait]
pub trait DnsApi: Send + Sync + Debug {
    async fn list_zones(&self, opts: &ListZonesOpts, marker: Option<&str>) -> ApiResult<Page<Zone>>;

    async fn list_record_sets(
        &self,
        zone_id: &str,
        opts: &ListRecordSetsOpts,
        marker: Option<&str>,
    ) -> ApiResult<Page<RecordSet>>;

    async fn create_record_set(&self, zone_id: &str, opts: &CreateRecordSet) -> ApiResult<RecordSet>;

    async fn update_record_set(&self, zone_id: &str, id: &str, opts: &UpdateRecordSet) -> ApiResult<RecordSet>;

    async fn delete_record_set(&self, zone_id: &str, id: &str) -> ApiResult<()>;
}

/// Builds authenticated [`DnsApi`] handles from a key pair and a region.
#[async_trait]
pub trait ClientFactory: Send + Sync + Debug {
    async fn connect(&self, credentials: &Credentials, region: &str) -> ApiResult<Arc<dyn DnsApi>>;
}

/// Walks a marker-paginated listing, yielding items until a page comes back without a next marker.
pub fn paginate<'a, T, F, Fut>(mut fetch: F) -> impl Stream<Item = ApiResult<T>> + Send + 'a
where
    T: Send + 'a,
    F: FnMut(Option<String>) -> Fut + Send + 'a,
    Fut: Future<Output = ApiResult<Page<T>>> + Send + 'a,
{
    async_stream::try_stream! {
        let mut marker = None;
        loop {
            let page = fetch(marker.take()).await?;
            for item in page.items {
                yield item;
            }
            match page.next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
    }
}

pub async fn all_zones(api: &dyn DnsApi, opts: &ListZonesOpts) -> ApiResult<Vec<Zone>> {
    paginate(|marker| async move { api.list_zones(opts, marker.as_deref()).await })
        .try_collect()
        .await
}

pub async fn all_record_sets(api: &dyn DnsApi, zone_id: &str, opts: &ListRecordSetsOpts) -> ApiResult<Vec<RecordSet>> {
    paginate(|marker| async move { api.list_record_sets(zone_id, opts, marker.as_deref()).await })
        .try_collect()
        .await
}

/// Compares DNS names ignoring case and the trailing root dot.
pub fn same_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.').eq_ignore_ascii_case(b.trim_end_matches('.'))
}
