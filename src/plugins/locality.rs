//! # Locality Plugin
//!
//! Where the actor runs (`REGION`, `COLO` bindings) and where the caller says
//! it comes from (`x-client-region` header). Latency estimation is left to
//! the host.

use crate::framework::{
    ContextExtension, Environment, InitContext, Member, Plugin, RequestInfo, Result,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

pub const FIELD: &str = "locality";
pub const CLIENT_REGION_HEADER: &str = "x-client-region";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Locality {
    pub region: Option<String>,
    pub colo: Option<String>,
}

impl Locality {
    pub fn from_env(env: &Environment) -> Self {
        Self {
            region: env.get("REGION").map(str::to_string),
            colo: env.get("COLO").map(str::to_string),
        }
    }

    pub fn client_region<'a>(&self, request: Option<&'a RequestInfo>) -> Option<&'a str> {
        request.and_then(|r| r.header(CLIENT_REGION_HEADER))
    }

    /// `true` only when both sides report the same region.
    pub fn is_local(&self, request: Option<&RequestInfo>) -> bool {
        match (self.region.as_deref(), self.client_region(request)) {
            (Some(ours), Some(theirs)) => ours.eq_ignore_ascii_case(theirs),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct LocalityPlugin;

#[async_trait]
impl Plugin for LocalityPlugin {
    fn name(&self) -> &str {
        "locality"
    }

    fn init(&self, ctx: &InitContext) -> Result<ContextExtension> {
        Ok(ContextExtension::new().with(FIELD, Locality::from_env(&ctx.env)))
    }

    fn members(&self) -> Vec<Member> {
        vec![Member::namespace("locality", (), |ns| {
            ns.method("info", 0, |_, ctx, _args| async move {
                let locality = ctx.require::<Locality>(FIELD)?;
                let request = ctx.request.as_ref();
                Ok(json!({
                    "region": locality.region,
                    "colo": locality.colo,
                    "clientRegion": locality.client_region(request),
                    "local": locality.is_local(request),
                }))
            })
        })]
    }
}
