//! HTTP surface for availability checks.
//!
//! ```no_run
//! # use actix_web::{web, App, HttpServer};
//! # use username_availability::backend::memory::InMemoryBackend;
//! # use username_availability::identity::InMemoryIdentityStore;
//! # use username_availability::{service, AvailabilityChecker};
//! # async fn example() -> std::io::Result<()> {
//! let identities = InMemoryIdentityStore::new();
//! // Shared by every worker, so that each caller has a single window
//! let backend = InMemoryBackend::builder().build();
//! HttpServer::new(move || {
//!     let checker = AvailabilityChecker::builder(backend.clone(), identities.clone()).build();
//!     App::new()
//!         .app_data(web::Data::new(checker))
//!         .configure(service::configure::<InMemoryBackend, InMemoryIdentityStore>)
//! })
//! .bind(("127.0.0.1", 8080))?
//! .run()
//! .await
//! # }
//! ```


use crate::backend::{Caller, WindowBackend};
use crate::checker::{AvailabilityChecker, Error};
use crate::identity::IdentityStore;
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

pub const AVAILABILITY_PATH: &str = "/username/availability";

/// A rate limit status that can be reported in response headers.
pub trait HeaderCompatibleOutput {
    /// Value for the `x-ratelimit-limit` header.
    fn limit(&self) -> u64;

    /// Value for the `x-ratelimit-remaining` header.
    fn remaining(&self) -> u64;

    /// Value for the `x-ratelimit-reset` and `retry-after` headers.
    ///
    /// This should be the number of seconds from now until the limit resets.\
    /// If the limit has already reset this should return 0.
    fn seconds_until_reset(&self) -> u64;
}

/// Identifies an authenticated caller.
///
/// Authentication is not handled here; an upstream middleware inserts this into the request
/// extensions once it has established who the caller is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub available: bool,
}

/// Registers `POST /username/availability`.
///
/// The app must hold a `web::Data<AvailabilityChecker<B, S>>`.
pub fn configure<B, S>(cfg: &mut web::ServiceConfig)
where
    B: WindowBackend + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    S: IdentityStore + 'static,
{
    cfg.route(AVAILABILITY_PATH, web::post().to(check_username::<B, S>));
}

async fn check_username<B, S>(
    req: HttpRequest,
    checker: web::Data<AvailabilityChecker<B, S>>,
    body: web::Json<AvailabilityRequest>,
) -> Result<HttpResponse, Error>
where
    B: WindowBackend + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    S: IdentityStore + 'static,
{
    let caller = caller(&req);
    let availability = match checker.check_detailed(&body.username, &caller).await {
        Ok(availability) => availability,
        Err(e) => {
            match &e {
                Error::RateLimited(_) => {}
                e => log::error!("Username availability check failed: {e}"),
            }
            return Err(e);
        }
    };
    let mut response = HttpResponse::Ok().json(AvailabilityResponse {
        available: availability.available,
    });
    if let Some(window) = &availability.window {
        insert_headers(response.headers_mut(), window);
    }
    Ok(response)
}

fn caller(req: &HttpRequest) -> Caller {
    let user_id = req
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.0.clone());
    Caller {
        user_id,
        peer_addr: req.peer_addr().map(|addr| addr.ip()),
    }
}

fn insert_headers<O: HeaderCompatibleOutput>(map: &mut HeaderMap, status: &O) {
    map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(status.limit()));
    map.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(status.remaining()),
    );
    map.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(status.seconds_until_reset()),
    );
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Backend(_) | Error::Lookup(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code()).finish();
        if let Error::RateLimited(window) = self {
            let map = response.headers_mut();
            insert_headers(map, window);
            map.insert(
                RETRY_AFTER,
                HeaderValue::from(window.seconds_until_reset()),
            );
        }
        response
    }
}
