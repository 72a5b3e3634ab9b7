//! Library surface for `relay-daemon`, split out from the binary so
//! integration tests (`tests/`) can drive `AuthClient`, `CatalogFetcher`,
//! and the HTTP router against a local `wiremock` server instead of the
//! real upstream.

pub mod adapter;
pub mod auth;
pub mod catalog;
pub mod endpoints;
pub mod http;
pub mod scheduler;
pub mod stream;
