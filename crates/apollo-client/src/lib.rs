//! Typed client for the subset of the Apollo.io REST API the gateway exposes.

mod client;
mod domain;
mod types;

pub use client::{
    ApolloClient, ApolloClientOptions, ApolloConnector, ApolloError, DEFAULT_APP_BASE_URL,
    DEFAULT_BASE_URL, select_organization,
};
pub use domain::{normalize_domain, split_csv};
pub use types::{
    DateRange, EmployeesOfCompanyQuery, IntRange, OrganizationSearchQuery, OrganizationSummary,
    PeopleEnrichmentQuery, PeopleSearchQuery,
};
