//! HTTP API: webhook ingress for connected stores.

pub mod app;
