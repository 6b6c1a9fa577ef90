pub use crate::{
    auth::{Auth, AuthOptions},
    eth1_api::{EngineTimeouts, Eth1Api, Eth1ApiConfig},
};

mod auth;
mod eth1_api;
