use std::collections::HashMap;
use std::sync::Arc;

use apollo_client::{
    ApolloClient, EmployeesOfCompanyQuery, OrganizationSearchQuery, PeopleEnrichmentQuery,
    PeopleSearchQuery,
};
use apollo_mcp::{
    CallToolParams, CallToolResult, HandlerError, ListToolsParams, ListToolsResult, McpHandler,
    Tool,
};
use async_trait::async_trait;
use jsonschema::Validator;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{Instrument as _, info_span};

use crate::credentials::strip_credential_fields;
use crate::error::GatewayError;

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// The fixed operation table, built once at startup and read-only afterwards.
pub struct ToolRegistry {
    tools: Vec<Arc<ToolRuntime>>,
    by_name: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new() -> anyhow::Result<Self> {
        let table = [
            (people_enrichment_spec(), ToolImpl::PeopleEnrichment),
            (organization_enrichment_spec(), ToolImpl::OrganizationEnrichment),
            (people_search_spec(), ToolImpl::PeopleSearch),
            (organization_search_spec(), ToolImpl::OrganizationSearch),
            (organization_job_postings_spec(), ToolImpl::OrganizationJobPostings),
            (get_person_email_spec(), ToolImpl::GetPersonEmail),
            (employees_of_company_spec(), ToolImpl::EmployeesOfCompany),
        ];

        let mut tools = Vec::with_capacity(table.len());
        let mut by_name = HashMap::with_capacity(table.len());
        for (spec, imp) in table {
            anyhow::ensure!(
                !by_name.contains_key(spec.name),
                "duplicate operation name {}",
                spec.name
            );
            by_name.insert(spec.name, tools.len());
            tools.push(Arc::new(ToolRuntime::new(spec, imp)?));
        }
        Ok(Self { tools, by_name })
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolRuntime>> {
        self.by_name.get(name).map(|&i| self.tools[i].clone())
    }

    /// Specs in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec.clone()).collect()
    }

    pub fn mcp_tools(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .map(|t| Tool {
                name: t.spec.name.to_string(),
                description: Some(t.spec.description.to_string()),
                input_schema: t.spec.input_schema.clone(),
            })
            .collect()
    }
}

pub struct ToolRuntime {
    pub spec: ToolSpec,
    validator: Validator,
    imp: ToolImpl,
}

#[derive(Debug, Clone, Copy)]
enum ToolImpl {
    PeopleEnrichment,
    OrganizationEnrichment,
    PeopleSearch,
    OrganizationSearch,
    OrganizationJobPostings,
    GetPersonEmail,
    EmployeesOfCompany,
}

impl ToolRuntime {
    fn new(spec: ToolSpec, imp: ToolImpl) -> anyhow::Result<Self> {
        let validator = jsonschema::validator_for(&spec.input_schema)
            .map_err(|e| anyhow::anyhow!("schema for {}: {e}", spec.name))?;
        Ok(Self {
            spec,
            validator,
            imp,
        })
    }

    /// Check `args` against the declared input schema.
    pub fn validate_args(&self, args: &Value) -> Result<(), GatewayError> {
        if self.validator.is_valid(args) {
            return Ok(());
        }

        let msg = self
            .validator
            .iter_errors(args)
            .take(5)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        let required = self
            .spec
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| {
                r.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Err(GatewayError::Validation {
            message: format!("invalid arguments for {}: {msg}", self.spec.name),
            required,
        })
    }

    /// Run against the backend. Arguments are expected to have passed [`Self::validate_args`].
    pub async fn execute(&self, client: &ApolloClient, mut args: Value) -> Result<Value, GatewayError> {
        strip_credential_fields(&mut args);
        self.dispatch(client, args)
            .instrument(info_span!("tool.execute", tool = self.spec.name))
            .await
    }

    async fn dispatch(&self, client: &ApolloClient, args: Value) -> Result<Value, GatewayError> {
        let name = self.spec.name;
        match self.imp {
            ToolImpl::PeopleEnrichment => {
                let q: PeopleEnrichmentQuery = typed_args(name, args)?;
                Ok(client.people_enrichment(&q).await?)
            }
            ToolImpl::OrganizationEnrichment => {
                let domain = string_arg(&args, "domain");
                Ok(client.organization_enrichment(&domain).await?)
            }
            ToolImpl::PeopleSearch => {
                let q: PeopleSearchQuery = typed_args(name, args)?;
                Ok(client.people_search(&q).await?)
            }
            ToolImpl::OrganizationSearch => {
                let q: OrganizationSearchQuery = typed_args(name, args)?;
                Ok(client.organization_search(&q).await?)
            }
            ToolImpl::OrganizationJobPostings => {
                let id = string_arg(&args, "organization_id");
                Ok(client.organization_job_postings(&id).await?)
            }
            ToolImpl::GetPersonEmail => {
                let id = string_arg(&args, "apollo_id");
                let emails = client.get_person_email(&id).await?;
                Ok(serde_json::json!(emails))
            }
            ToolImpl::EmployeesOfCompany => {
                let q: EmployeesOfCompanyQuery = typed_args(name, args)?;
                let people = client.employees_of_company(&q).await?;
                Ok(Value::Array(people))
            }
        }
    }
}

fn typed_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, GatewayError> {
    serde_json::from_value(args).map_err(|e| GatewayError::Validation {
        message: format!("invalid arguments for {tool}: {e}"),
        required: Vec::new(),
    })
}

fn string_arg(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// [`McpHandler`] backed by the operation table and one backend client.
///
/// Without a client, discovery still works and every call fails with a
/// credential error.
pub struct ApolloToolHandler {
    tools: Arc<ToolRegistry>,
    client: Option<ApolloClient>,
}

impl ApolloToolHandler {
    pub fn new(tools: Arc<ToolRegistry>, client: Option<ApolloClient>) -> Self {
        Self { tools, client }
    }
}

#[async_trait]
impl McpHandler for ApolloToolHandler {
    async fn list_tools(&self, _params: ListToolsParams) -> Result<ListToolsResult, HandlerError> {
        Ok(ListToolsResult {
            tools: self.tools.mcp_tools(),
            next_cursor: None,
        })
    }

    async fn call_tool(&self, params: CallToolParams) -> Result<CallToolResult, HandlerError> {
        let Some(tool) = self.tools.get(&params.name) else {
            return Err(HandlerError::UnknownTool(params.name));
        };
        let args = params.arguments.unwrap_or_else(|| serde_json::json!({}));

        let outcome: Result<Value, GatewayError> = async {
            tool.validate_args(&args)?;
            let client = self
                .client
                .as_ref()
                .ok_or_else(GatewayError::missing_credential)?;
            tool.execute(client, args).await
        }
        .await;

        match outcome {
            Ok(payload) => Ok(CallToolResult::json(payload)),
            Err(e) => e.into_tool_outcome(),
        }
    }
}

fn people_enrichment_spec() -> ToolSpec {
    ToolSpec {
        name: "people_enrichment",
        description: "Use the People Enrichment endpoint to enrich data for 1 person. \
            At least one identifying field is required.",
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "first_name": { "type": "string", "description": "Person's first name" },
                "last_name": { "type": "string", "description": "Person's last name" },
                "name": { "type": "string", "description": "Person's full name" },
                "email": { "type": "string", "description": "Person's email address" },
                "domain": { "type": "string", "description": "Company domain" },
                "organization_name": { "type": "string", "description": "Organization name" },
                "linkedin_url": { "type": "string", "description": "Person's LinkedIn profile URL" }
            }
        }),
    }
}

fn organization_enrichment_spec() -> ToolSpec {
    ToolSpec {
        name: "organization_enrichment",
        description: "Use the Organization Enrichment endpoint to enrich data for 1 company. \
            Accepts a bare domain or a website URL.",
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "domain": { "type": "string", "minLength": 1, "description": "Company domain or website URL" }
            },
            "required": ["domain"]
        }),
    }
}

fn people_search_spec() -> ToolSpec {
    ToolSpec {
        name: "people_search",
        description: "Use the People Search endpoint to find people. Unknown filters are passed through.",
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "person_titles": string_list("Job titles held by the people you want to find"),
                "include_similar_titles": { "type": "boolean" },
                "q_keywords": { "type": "string", "description": "Keywords to filter results" },
                "person_locations": string_list("Locations where people live"),
                "person_seniorities": string_list("Job seniority levels"),
                "organization_locations": string_list("Headquarters locations of the person's employer"),
                "q_organization_domains_list": string_list("Domains of the person's employer"),
                "contact_email_status": string_list("Email statuses"),
                "organization_ids": string_list("Apollo IDs of companies"),
                "organization_num_employees_ranges": string_list("Employee count ranges, e.g. \"1,10\""),
                "revenue_range": int_range(),
                "currently_using_all_of_technology_uids": string_list("Technologies all of which are in use"),
                "currently_using_any_of_technology_uids": string_list("Technologies any of which is in use"),
                "currently_not_using_any_of_technology_uids": string_list("Technologies not in use"),
                "q_organization_job_titles": string_list("Job titles in active postings"),
                "organization_job_locations": string_list("Locations of active job postings"),
                "organization_num_jobs_range": int_range(),
                "organization_job_posted_at_range": date_range(),
                "page": { "type": "integer", "minimum": 1 },
                "per_page": { "type": "integer", "minimum": 1 }
            }
        }),
    }
}

fn organization_search_spec() -> ToolSpec {
    ToolSpec {
        name: "organization_search",
        description: "Use the Organization Search endpoint to find organizations. Unknown filters are passed through.",
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "q_organization_domains_list": string_list("Company domains"),
                "organization_locations": string_list("Headquarters locations"),
                "organization_not_locations": string_list("Headquarters locations to exclude"),
                "organization_num_employees_ranges": string_list("Employee count ranges, e.g. \"1,10\""),
                "revenue_range": int_range(),
                "currently_using_any_of_technology_uids": string_list("Technologies in use"),
                "q_organization_keyword_tags": string_list("Industry or keyword tags"),
                "q_organization_name": { "type": "string", "description": "Company name (partial match)" },
                "organization_ids": string_list("Apollo IDs of companies"),
                "latest_funding_amount_range": int_range(),
                "total_funding_range": int_range(),
                "latest_funding_date_range": date_range(),
                "q_organization_job_titles": string_list("Job titles in active postings"),
                "organization_job_locations": string_list("Locations of active job postings"),
                "organization_num_jobs_range": int_range(),
                "organization_job_posted_at_range": date_range(),
                "page": { "type": "integer", "minimum": 1 },
                "per_page": { "type": "integer", "minimum": 1 }
            }
        }),
    }
}

fn organization_job_postings_spec() -> ToolSpec {
    ToolSpec {
        name: "organization_job_postings",
        description: "Use the Organization Job Postings endpoint to find job postings for a specific organization.",
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "organization_id": { "type": "string", "minLength": 1, "description": "Apollo organization ID" }
            },
            "required": ["organization_id"]
        }),
    }
}

fn get_person_email_spec() -> ToolSpec {
    ToolSpec {
        name: "get_person_email",
        description: "Get the email addresses of a person by Apollo ID.",
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "apollo_id": { "type": "string", "minLength": 1, "description": "Apollo person ID" }
            },
            "required": ["apollo_id"]
        }),
    }
}

fn employees_of_company_spec() -> ToolSpec {
    ToolSpec {
        name: "employees_of_company",
        description: "Find employees of a company by name, optionally narrowed by website or LinkedIn URL.",
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "company": { "type": "string", "minLength": 1, "description": "Company name" },
                "website_url": { "type": "string", "description": "Company website URL" },
                "linkedin_url": { "type": "string", "description": "Company LinkedIn URL" },
                "person_seniorities": {
                    "type": "string",
                    "description": "Comma-separated seniorities, e.g. \"vp,director\""
                },
                "contact_email_status": {
                    "type": "string",
                    "description": "Comma-separated email statuses, e.g. \"verified,likely to engage\""
                }
            },
            "required": ["company"]
        }),
    }
}

fn string_list(description: &str) -> Value {
    serde_json::json!({
        "type": "array",
        "items": { "type": "string" },
        "description": description,
    })
}

fn int_range() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "min": { "type": "integer" },
            "max": { "type": "integer" }
        }
    })
}

fn date_range() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "min": { "type": "string", "description": "YYYY-MM-DD" },
            "max": { "type": "string", "description": "YYYY-MM-DD" }
        }
    })
}
