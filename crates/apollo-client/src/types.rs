use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inclusive numeric range filter (`{ "min": .., "max": .. }`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

/// Inclusive date range filter, dates as `YYYY-MM-DD`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeopleEnrichmentQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    /// Extra match parameters forwarded verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PeopleEnrichmentQuery {
    /// Fields of which at least one must be non-empty.
    pub const IDENTIFYING_FIELDS: &'static [&'static str] = &[
        "first_name",
        "last_name",
        "name",
        "email",
        "domain",
        "organization_name",
        "linkedin_url",
    ];

    pub fn has_identifying_field(&self) -> bool {
        [
            &self.first_name,
            &self.last_name,
            &self.name,
            &self.email,
            &self.domain,
            &self.organization_name,
            &self.linkedin_url,
        ]
        .into_iter()
        .any(|f| f.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeopleSearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_titles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_similar_titles: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_seniorities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_organization_domains_list: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email_status: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_num_employees_ranges: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_range: Option<IntRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currently_using_all_of_technology_uids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currently_using_any_of_technology_uids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currently_not_using_any_of_technology_uids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_organization_job_titles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_job_locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_num_jobs_range: Option<IntRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_job_posted_at_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationSearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_organization_domains_list: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_not_locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_num_employees_ranges: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_range: Option<IntRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currently_using_any_of_technology_uids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_organization_keyword_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_funding_amount_range: Option<IntRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_funding_range: Option<IntRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_funding_date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_organization_job_titles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_job_locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_num_jobs_range: Option<IntRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_job_posted_at_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmployeesOfCompanyQuery {
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    /// Comma-separated seniorities, e.g. `"vp,director"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_seniorities: Option<String>,
    /// Comma-separated email statuses, e.g. `"verified,likely to engage"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email_status: Option<String>,
}

/// Organization as returned by `mixed_companies/search`; only the fields used
/// for resolution are typed.
#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OrganizationSearchPage {
    #[serde(default)]
    pub organizations: Vec<OrganizationSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PeopleSearchPage {
    #[serde(default)]
    pub people: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ContactEmail {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AddToProspectsResponse {
    #[serde(default)]
    pub contacts: Vec<ContactEmail>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_query_passes_unknown_filters_through() {
        let q: PeopleSearchQuery = serde_json::from_value(serde_json::json!({
            "person_titles": ["cto"],
            "revenue_range": { "min": 10 },
            "organization_industry_tag_ids": ["x"]
        }))
        .expect("deserialize");
        let v = serde_json::to_value(&q).expect("serialize");
        assert_eq!(v["person_titles"], serde_json::json!(["cto"]));
        assert_eq!(v["revenue_range"], serde_json::json!({ "min": 10 }));
        assert_eq!(v["organization_industry_tag_ids"], serde_json::json!(["x"]));
        assert!(v.get("page").is_none());
    }

    #[test]
    fn blank_identifying_fields_do_not_count() {
        let q = PeopleEnrichmentQuery {
            first_name: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(!q.has_identifying_field());

        let q = PeopleEnrichmentQuery {
            email: Some("tim@apollo.io".to_string()),
            ..Default::default()
        };
        assert!(q.has_identifying_field());
    }
}
