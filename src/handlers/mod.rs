//! HTTP handlers, grouped by concern. All of them are thin: parse the
//! request, delegate to a service, shape the JSON response.

pub mod chunk_handlers;
pub mod health_handlers;
pub mod maintenance_handlers;
pub mod resumable_handlers;
pub mod upload_handlers;
