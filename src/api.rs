use crate::{
    router_client::RouterClient,
    services::{connectivity::ConnectivityProbe, reboot::RebootOrchestrator},
    types::RebootStatus,
};
use actix_web::{
    HttpResponse, Responder,
    http::{StatusCode, header::ContentType},
    web,
};
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RebootRequest {
    pub debug: bool,
    pub confirmed: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: RebootStatus,
    pub estimated_remaining_seconds: Option<u64>,
}

impl From<RebootStatus> for StatusResponse {
    fn from(status: RebootStatus) -> Self {
        Self {
            estimated_remaining_seconds: status.estimated_remaining_seconds(Utc::now()),
            status,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckInfo {
    pub version: &'static str,
    pub operation: &'static str,
    pub internet_status: &'static str,
}

pub struct Api<Router, Wan> {
    pub orchestrator: RebootOrchestrator<Router, Wan>,
}

impl<Router, Wan> Clone for Api<Router, Wan> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
        }
    }
}

impl<Router, Wan> Api<Router, Wan>
where
    Router: RouterClient + Send + Sync + 'static,
    Wan: ConnectivityProbe + Send + Sync + 'static,
{
    pub fn new(orchestrator: RebootOrchestrator<Router, Wan>) -> Self {
        Api { orchestrator }
    }

    pub async fn status(api: web::Data<Self>) -> impl Responder {
        debug!("status() called");

        HttpResponse::Ok().json(StatusResponse::from(api.orchestrator.status()))
    }

    pub async fn diagnostics(api: web::Data<Self>) -> impl Responder {
        debug!("diagnostics() called");

        HttpResponse::Ok()
            .content_type(ContentType::plaintext())
            .body(api.orchestrator.diagnostics())
    }

    pub async fn reboot(
        body: Option<web::Json<RebootRequest>>,
        api: web::Data<Self>,
    ) -> impl Responder {
        let request = body.map(web::Json::into_inner).unwrap_or_default();
        debug!("reboot() called: {request:?}");

        if api.orchestrator.settings().ask_confirm_before_reboot && !request.confirmed {
            return HttpResponse::build(StatusCode::PRECONDITION_REQUIRED)
                .body("reboot requires confirmation");
        }

        if !api.orchestrator.request_reboot(request.debug) {
            return HttpResponse::Conflict().body("reboot already in progress");
        }

        HttpResponse::Accepted().json(StatusResponse::from(api.orchestrator.status()))
    }

    pub async fn cancel(api: web::Data<Self>) -> impl Responder {
        debug!("cancel() called");

        if !api.orchestrator.cancel() {
            return HttpResponse::Conflict().body("no reboot to cancel");
        }

        HttpResponse::Ok().json(StatusResponse::from(api.orchestrator.status()))
    }

    pub async fn healthcheck(api: web::Data<Self>) -> impl Responder {
        debug!("healthcheck() called");

        let status = api.orchestrator.status();

        HttpResponse::Ok().json(HealthcheckInfo {
            version: env!("CARGO_PKG_VERSION"),
            operation: status.operation.label(),
            internet_status: status.internet_status.label(),
        })
    }
}
