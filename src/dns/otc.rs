//! Open Telekom Cloud DNS v2 API.
//!
//! See https://docs.otc.t-systems.com/domain-name-service/api-ref/

use super::{
    signer::Signer,
    ApiError,
    ApiResult,
    ClientFactory,
    CreateRecordSet,
    DnsApi,
    ListRecordSetsOpts,
    ListZonesOpts,
    Page,
    RecordSet,
    UpdateRecordSet,
    Zone,
};
use crate::credentials::Credentials;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    Method,
    Url,
};
use serde::{
    de::DeserializeOwned,
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    sync::Arc,
    time::Duration,
};

/// Identity (IAM) endpoint, `{region}` is substituted.
pub const IDENTITY_ENDPOINT: &str = "https://iam.{region}.otc.t-systems.com:443/v3";
/// DNS endpoint, `{region}` is substituted.
pub const DNS_ENDPOINT: &str = "https://dns.{region}.otc.t-systems.com";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_LIMIT: &str = "500";

#[derive(Debug, Deserialize)]
struct Links {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZoneList {
    #[serde(default)]
    zones: Vec<Zone>,
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct RecordSetList {
    #[serde(default)]
    recordsets: Vec<RecordSet>,
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    #[serde(default)]
    projects: Vec<Project>,
}

#[derive(Debug, Deserialize)]
struct Project {
    id: String,
    name: String,
}

/// Extracts the `marker` query parameter of a `links.next` url.
fn next_marker(links: Option<Links>) -> Option<String> {
    let next = links?.next?;
    let url = Url::parse(&next).ok()?;
    let marker = url.query_pairs().find(|(key, _)| key == "marker")?.1.into_owned();
    Some(marker)
}

fn endpoint(template: &str, region: &str) -> String {
    template.replace("{region}", region).trim_end_matches('/').to_string()
}

/// Signed JSON requests against one Open Telekom Cloud service.
#[derive(Clone)]
struct OtcHttp {
    http: reqwest::Client,
    signer: Signer,
}

impl OtcHttp {
    async fn request<R, B>(&self, method: Method, url: Url, body: Option<&B>, project_id: Option<&str>) -> ApiResult<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let bytes = self.send(method, url, body, project_id).await?;

        serde_json::from_slice(&bytes).map_err(|err| {
            trace!(body = %String::from_utf8_lossy(&bytes), "failed to parse api response");
            err.into()
        })
    }

    async fn send<B>(&self, method: Method, url: Url, body: Option<&B>, project_id: Option<&str>) -> ApiResult<Vec<u8>>
    where
        B: Serialize,
    {
        let body = body.map(serde_json::to_vec).transpose()?.unwrap_or_default();

        let mut headers = vec![("content-type", "application/json")];
        if let Some(project_id) = project_id {
            headers.push(("x-project-id", project_id));
        }
        let signed = self.signer.sign(&method, &url, &headers, &body, Utc::now());

        trace!(%method, %url, "opentelekomcloud api request");

        let mut req = self.http.request(method, url);
        for (name, value) in &signed {
            // reqwest derives the host header from the url
            if name != "host" {
                req = req.header(name, value);
            }
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }

        Ok(res.bytes().await?.to_vec())
    }
}

/// Authenticated DNS v2 client for one project.
#[derive(Clone)]
pub struct OtcDnsClient {
    http: OtcHttp,
    endpoint: String,
    project_id: String,
}

impl fmt::Debug for OtcDnsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtcDnsClient")
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl OtcDnsClient {
    pub fn new(
        http: reqwest::Client,
        credentials: &Credentials,
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            http: OtcHttp {
                http,
                signer: Signer::new(credentials.access_key(), credentials.secret_key()),
            },
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
        }
    }

    fn url(&self, path: &str, query: &[(&str, Option<&str>)]) -> ApiResult<Url> {
        let mut url = Url::parse(&format!("{}{path}", self.endpoint)).map_err(|err| ApiError::Url(err.to_string()))?;
        let present: Vec<_> = query
            .iter()
            .filter_map(|(key, value)| value.map(|value| (*key, value)))
            .collect();
        if !present.is_empty() {
            url.query_pairs_mut().extend_pairs(present);
        }
        Ok(url)
    }

    async fn get<R: DeserializeOwned>(&self, url: Url) -> ApiResult<R> {
        self.http
            .request::<R, ()>(Method::GET, url, None, Some(self.project_id.as_str()))
            .await
    }
}

#[async_trait]
impl DnsApi for OtcDnsClient {
    async fn list_zones(&self, opts: &ListZonesOpts, marker: Option<&str>) -> ApiResult<Page<Zone>> {
        let url = self.url(
            "/v2/zones",
            &[
                ("type", Some("public")),
                ("name", opts.name.as_deref()),
                ("limit", Some(PAGE_LIMIT)),
                ("marker", marker),
            ],
        )?;
        debug!(name = ?opts.name, ?marker, "listing zones");

        let list: ZoneList = self.get(url).await?;
        Ok(Page {
            items: list.zones,
            next: next_marker(list.links),
        })
    }

    async fn list_record_sets(
        &self,
        zone_id: &str,
        opts: &ListRecordSetsOpts,
        marker: Option<&str>,
    ) -> ApiResult<Page<RecordSet>> {
        let url = self.url(
            &format!("/v2/zones/{zone_id}/recordsets"),
            &[
                ("name", opts.name.as_deref()),
                ("type", opts.record_type.as_deref()),
                ("records", opts.records.as_deref()),
                ("limit", Some(PAGE_LIMIT)),
                ("marker", marker),
            ],
        )?;
        debug!(%zone_id, name = ?opts.name, r#type = ?opts.record_type, ?marker, "listing record sets");

        let list: RecordSetList = self.get(url).await?;
        Ok(Page {
            items: list.recordsets,
            next: next_marker(list.links),
        })
    }

    async fn create_record_set(&self, zone_id: &str, opts: &CreateRecordSet) -> ApiResult<RecordSet> {
        let url = self.url(&format!("/v2/zones/{zone_id}/recordsets"), &[])?;
        info!(%zone_id, name = %opts.name, r#type = %opts.record_type, "creating record set");
        self.http
            .request(Method::POST, url, Some(opts), Some(self.project_id.as_str()))
            .await
    }

    async fn update_record_set(&self, zone_id: &str, id: &str, opts: &UpdateRecordSet) -> ApiResult<RecordSet> {
        let url = self.url(&format!("/v2/zones/{zone_id}/recordsets/{id}"), &[])?;
        info!(%zone_id, %id, "updating record set");
        self.http
            .request(Method::PUT, url, Some(opts), Some(self.project_id.as_str()))
            .await
    }

    async fn delete_record_set(&self, zone_id: &str, id: &str) -> ApiResult<()> {
        let url = self.url(&format!("/v2/zones/{zone_id}/recordsets/{id}"), &[])?;
        info!(%zone_id, %id, "deleting record set");
        self.http
            .send::<()>(Method::DELETE, url, None, Some(self.project_id.as_str()))
            .await?;
        Ok(())
    }
}

/// Builds [`OtcDnsClient`]s: resolves the project of the region through the identity endpoint, then targets the
/// region's DNS endpoint.
#[derive(Clone, Debug)]
pub struct OtcClientFactory {
    http: reqwest::Client,
    identity_endpoint: String,
    dns_endpoint: String,
}

impl OtcClientFactory {
    pub fn new(timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            identity_endpoint: IDENTITY_ENDPOINT.to_string(),
            dns_endpoint: DNS_ENDPOINT.to_string(),
        })
    }

    /// Overrides the endpoint templates. Both may contain `{region}`.
    pub fn with_endpoints(mut self, identity_endpoint: impl Into<String>, dns_endpoint: impl Into<String>) -> Self {
        self.identity_endpoint = identity_endpoint.into();
        self.dns_endpoint = dns_endpoint.into();
        self
    }

    pub fn identity_endpoint(&self, region: &str) -> String {
        endpoint(&self.identity_endpoint, region)
    }

    pub fn dns_endpoint(&self, region: &str) -> String {
        endpoint(&self.dns_endpoint, region)
    }

    async fn project_id(&self, credentials: &Credentials, region: &str) -> ApiResult<String> {
        let mut url = Url::parse(&format!("{}/projects", self.identity_endpoint(region)))
            .map_err(|err| ApiError::Url(err.to_string()))?;
        url.query_pairs_mut().append_pair("name", region);

        let http = OtcHttp {
            http: self.http.clone(),
            signer: Signer::new(credentials.access_key(), credentials.secret_key()),
        };
        let list: ProjectList = http.request::<_, ()>(Method::GET, url, None, None).await?;

        list.projects
            .into_iter()
            .find(|project| project.name == region)
            .map(|project| project.id)
            .ok_or_else(|| ApiError::MissingProject(region.to_string()))
    }
}

#[async_trait]
impl ClientFactory for OtcClientFactory {
    async fn connect(&self, credentials: &Credentials, region: &str) -> ApiResult<Arc<dyn DnsApi>> {
        let project_id = self.project_id(credentials, region).await?;
        debug!(%region, %project_id, "resolved opentelekomcloud project");

        let client = OtcDnsClient::new(self.http.clone(), credentials, self.dns_endpoint(region), project_id);
        debug!("created an opentelekomcloud dns service client");
        Ok(Arc::new(client))
    }
}
