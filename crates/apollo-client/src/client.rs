use std::fmt;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument as _, debug, info_span, warn};
use url::Url;

use crate::domain::{normalize_domain, split_csv};
use crate::types::{
    AddToProspectsResponse, EmployeesOfCompanyQuery, OrganizationSearchPage,
    OrganizationSearchQuery, OrganizationSummary, PeopleEnrichmentQuery, PeopleSearchPage,
    PeopleSearchQuery,
};

pub const DEFAULT_BASE_URL: &str = "https://api.apollo.io/api/v1";
pub const DEFAULT_APP_BASE_URL: &str = "https://app.apollo.io/api/v1";

/// Page size used by the compound employees lookup for both of its searches.
const EMPLOYEES_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum ApolloError {
    /// A required input was missing or malformed; no request was sent.
    #[error("{message}")]
    Validation {
        message: String,
        required: Vec<String>,
    },
    /// Apollo answered with a non-success status.
    #[error("Apollo API error {status}: {body}")]
    Api { status: u16, body: String },
    /// The request never completed.
    #[error("Apollo network error: {0}")]
    Transport(String),
    #[error("{0}")]
    NotFound(String),
    #[error("unexpected Apollo response: {0}")]
    Decode(String),
    #[error("client configuration error: {0}")]
    Config(String),
}

impl ApolloError {
    fn required(message: impl Into<String>, fields: &[&str]) -> Self {
        Self::Validation {
            message: message.into(),
            required: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApolloClientOptions {
    pub base_url: Url,
    /// Base for the app-side endpoints (email reveal).
    pub app_base_url: Url,
    /// `None` leaves the HTTP transport's own default in place.
    pub timeout: Option<Duration>,
}

impl ApolloClientOptions {
    pub fn new(base_url: &str, app_base_url: &str) -> Result<Self, ApolloError> {
        let parse = |raw: &str| {
            Url::parse(raw).map_err(|e| ApolloError::Config(format!("invalid url {raw}: {e}")))
        };
        Ok(Self {
            base_url: parse(base_url)?,
            app_base_url: parse(app_base_url)?,
            timeout: None,
        })
    }
}

/// Shared HTTP plumbing (connection pool, base URLs) that hands out
/// per-credential [`ApolloClient`]s.
#[derive(Debug, Clone)]
pub struct ApolloConnector {
    http: reqwest::Client,
    base_url: Url,
    app_base_url: Url,
}

impl ApolloConnector {
    pub fn new(opts: ApolloClientOptions) -> Result<Self, ApolloError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = opts.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ApolloError::Config(format!("build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: opts.base_url,
            app_base_url: opts.app_base_url,
        })
    }

    pub fn client(&self, api_key: impl Into<String>) -> Result<ApolloClient, ApolloError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ApolloError::Config("an Apollo API key is required".to_string()));
        }
        Ok(ApolloClient {
            conn: self.clone(),
            api_key,
        })
    }
}

/// Apollo.io REST client bound to one API key.
///
/// Cheap to clone; clones share the connection pool. Otherwise stateless.
#[derive(Clone)]
pub struct ApolloClient {
    conn: ApolloConnector,
    api_key: String,
}

impl fmt::Debug for ApolloClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApolloClient")
            .field("base_url", &self.conn.base_url.as_str())
            .field("app_base_url", &self.conn.app_base_url.as_str())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ApolloClient {
    pub fn new(api_key: impl Into<String>, opts: ApolloClientOptions) -> Result<Self, ApolloError> {
        ApolloConnector::new(opts)?.client(api_key)
    }

    /// Enrich one person. At least one identifying field must be set.
    pub async fn people_enrichment(&self, query: &PeopleEnrichmentQuery) -> Result<Value, ApolloError> {
        if !query.has_identifying_field() {
            return Err(ApolloError::required(
                format!(
                    "people enrichment requires at least one of: {}",
                    PeopleEnrichmentQuery::IDENTIFYING_FIELDS.join(", ")
                ),
                PeopleEnrichmentQuery::IDENTIFYING_FIELDS,
            ));
        }
        let url = endpoint(&self.conn.base_url, &["people", "match"])?;
        self.post_json(url, query)
            .instrument(info_span!("apollo.people_enrichment"))
            .await
    }

    /// Enrich one organization by domain. URLs are normalized to their bare domain first.
    pub async fn organization_enrichment(&self, domain: &str) -> Result<Value, ApolloError> {
        if domain.trim().is_empty() {
            return Err(ApolloError::required("domain is required", &["domain"]));
        }
        let Some(normalized) = normalize_domain(domain) else {
            return Err(ApolloError::required(
                format!("could not derive a domain from '{domain}'"),
                &["domain"],
            ));
        };

        let mut url = endpoint(&self.conn.base_url, &["organizations", "enrich"])?;
        url.query_pairs_mut().append_pair("domain", &normalized);
        self.get_json(url)
            .instrument(info_span!("apollo.organization_enrichment", domain = %normalized))
            .await
    }

    pub async fn people_search(&self, query: &PeopleSearchQuery) -> Result<Value, ApolloError> {
        let url = endpoint(&self.conn.base_url, &["mixed_people", "search"])?;
        self.post_json(url, query)
            .instrument(info_span!("apollo.people_search"))
            .await
    }

    pub async fn organization_search(
        &self,
        query: &OrganizationSearchQuery,
    ) -> Result<Value, ApolloError> {
        let url = endpoint(&self.conn.base_url, &["mixed_companies", "search"])?;
        self.post_json(url, query)
            .instrument(info_span!("apollo.organization_search"))
            .await
    }

    pub async fn organization_job_postings(&self, organization_id: &str) -> Result<Value, ApolloError> {
        let organization_id = organization_id.trim();
        if organization_id.is_empty() {
            return Err(ApolloError::required(
                "organization_id is required",
                &["organization_id"],
            ));
        }
        let url = endpoint(
            &self.conn.base_url,
            &["organizations", organization_id, "job_postings"],
        )?;
        self.get_json(url)
            .instrument(info_span!("apollo.organization_job_postings", organization_id))
            .await
    }

    /// Reveal the email addresses of one person. Zero contacts yields an empty list.
    pub async fn get_person_email(&self, apollo_id: &str) -> Result<Vec<String>, ApolloError> {
        let apollo_id = apollo_id.trim();
        if apollo_id.is_empty() {
            return Err(ApolloError::required("apollo_id is required", &["apollo_id"]));
        }
        let url = endpoint(
            &self.conn.app_base_url,
            &["mixed_people", "add_to_my_prospects"],
        )?;
        let payload = serde_json::json!({
            "entity_ids": [apollo_id],
            "analytics_context": "Searcher: Individual Add Button",
            "skip_fetching_people": true,
            "cta_name": "Access email",
            "cacheKey": Utc::now().timestamp_millis(),
        });

        async {
            let raw = self.post_json(url, &payload).await?;
            let resp: AddToProspectsResponse = decode(raw)?;
            Ok::<_, ApolloError>(resp
                .contacts
                .into_iter()
                .filter_map(|c| c.email)
                .collect())
        }
        .instrument(info_span!("apollo.get_person_email", apollo_id))
        .await
    }

    /// Resolve a company by name (optionally disambiguated by website or LinkedIn
    /// URL), then list its people.
    ///
    /// The people search only runs once an organization id is resolved.
    pub async fn employees_of_company(
        &self,
        query: &EmployeesOfCompanyQuery,
    ) -> Result<Vec<Value>, ApolloError> {
        let company = query.company.trim();
        if company.is_empty() {
            return Err(ApolloError::required("company is required", &["company"]));
        }

        async {
            let url = endpoint(&self.conn.base_url, &["mixed_companies", "search"])?;
            let raw = self
                .post_json(
                    url,
                    &serde_json::json!({
                        "q_organization_name": company,
                        "page": 1,
                        "per_page": EMPLOYEES_PAGE_SIZE,
                    }),
                )
                .await?;
            let page: OrganizationSearchPage = decode(raw)?;

            let Some(org) = select_organization(
                &page.organizations,
                query.website_url.as_deref(),
                query.linkedin_url.as_deref(),
            ) else {
                return Err(ApolloError::NotFound(format!(
                    "No organizations found for company '{company}'"
                )));
            };
            let Some(org_id) = org.id.as_deref().filter(|id| !id.is_empty()) else {
                return Err(ApolloError::NotFound(format!(
                    "Could not determine company ID for '{company}'"
                )));
            };
            debug!(org_id, org_name = ?org.name, "resolved organization");

            let mut payload = serde_json::json!({
                "organization_ids": [org_id],
                "page": 1,
                "per_page": EMPLOYEES_PAGE_SIZE,
            });
            if let Some(seniorities) = query.person_seniorities.as_deref() {
                payload["person_seniorities"] = serde_json::json!(split_csv(seniorities));
            }
            if let Some(statuses) = query.contact_email_status.as_deref() {
                payload["contact_email_status_v2"] = serde_json::json!(split_csv(statuses));
            }

            let url = endpoint(&self.conn.base_url, &["mixed_people", "search"])?;
            let raw = self.post_json(url, &payload).await?;
            let people: PeopleSearchPage = decode(raw)?;
            Ok(people.people)
        }
        .instrument(info_span!("apollo.employees_of_company", company))
        .await
    }

    async fn get_json(&self, url: Url) -> Result<Value, ApolloError> {
        self.send(self.conn.http.get(url)).await
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<Value, ApolloError> {
        self.send(self.conn.http.post(url).json(body)).await
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ApolloError> {
        let resp = req
            .header("x-api-key", &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "apollo request failed");
                ApolloError::Transport(e.to_string())
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ApolloError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "apollo returned an error status");
            return Err(ApolloError::Api {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Err(ApolloError::Decode("no data received from Apollo API".to_string()));
        }
        serde_json::from_str(&body).map_err(|e| ApolloError::Decode(e.to_string()))
    }
}

/// Pick the organization whose website or LinkedIn URL matches after normalization,
/// falling back to the first search result. `None` only when `orgs` is empty.
pub fn select_organization<'a>(
    orgs: &'a [OrganizationSummary],
    website_url: Option<&str>,
    linkedin_url: Option<&str>,
) -> Option<&'a OrganizationSummary> {
    let wanted_website = website_url.and_then(normalize_domain);
    let wanted_linkedin = linkedin_url.and_then(normalize_domain);

    let same = |wanted: &Option<String>, candidate: Option<&str>| match (wanted, candidate) {
        (Some(w), Some(c)) => normalize_domain(c).as_deref() == Some(w.as_str()),
        _ => false,
    };

    orgs.iter()
        .find(|o| {
            same(&wanted_linkedin, o.linkedin_url.as_deref())
                || same(&wanted_website, o.website_url.as_deref())
        })
        .or_else(|| orgs.first())
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ApolloError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ApolloError::Config(format!("base url cannot carry a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn decode<T: DeserializeOwned>(raw: Value) -> Result<T, ApolloError> {
    serde_json::from_value(raw).map_err(|e| ApolloError::Decode(e.to_string()))
}
