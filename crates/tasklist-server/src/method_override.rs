//! HTML forms can only submit GET and POST. A POST whose query string carries
//! `_method=PUT`, `_method=PATCH` or `_method=DELETE` is rewritten to that
//! method before the router sees it.

use axum::extract::{Query, Request};
use axum::http::{Method, Uri};
use serde::Deserialize;
use tracing::debug;

pub const OVERRIDE_PARAM: &str = "_method";

/// Rewrite the request method if it is an overridable POST.
pub fn rewrite(mut req: Request) -> Request {
    if req.method() != Method::POST {
        return req;
    }

    let Some(method) = requested_method(req.uri()) else {
        return req;
    };

    debug!(from = %req.method(), to = %method, path = %req.uri().path(), "method override");
    *req.method_mut() = method;
    req
}

#[derive(Deserialize)]
struct OverrideQuery {
    #[serde(rename = "_method")]
    method: Option<String>,
}

fn requested_method(uri: &Uri) -> Option<Method> {
    let Query(query) = Query::<OverrideQuery>::try_from_uri(uri).ok()?;
    match query.method?.trim().to_ascii_uppercase().as_str() {
        "PUT" => Some(Method::PUT),
        "PATCH" => Some(Method::PATCH),
        "DELETE" => Some(Method::DELETE),
        _ => None,
    }
}
