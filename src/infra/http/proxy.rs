use axum::{
    extract::State,
    http::{
        HeaderMap, HeaderValue, Method, StatusCode, Uri,
        header::{ACCEPT, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use url::Url;

use crate::application::{error::HttpError, network::NetworkRequest, strategy::Served};

use super::{CLASS_HEADER, RouterState, SOURCE_HEADER};

const SOURCE: &str = "infra::http::proxy";

/// Catch-all handler: every request outside the control prefix ends up here.
pub(super) async fn intercept(
    State(state): State<RouterState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let url = match resolve(state.strategy.origin(), &uri) {
        Ok(url) => url,
        Err(err) => return err.into_response(),
    };

    let request = NetworkRequest {
        method: method.clone(),
        url,
        accept: header_text(&headers, ACCEPT.as_str()),
        content_type: header_text(&headers, CONTENT_TYPE.as_str()),
        body,
    };

    let served = if method == Method::GET {
        state.strategy.handle(request).await
    } else {
        state.strategy.pass_through(request).await
    };
    served_response(served)
}

/// Map the incoming path and query onto the upstream origin.
fn resolve(origin: &Url, uri: &Uri) -> Result<Url, HttpError> {
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = origin.join(target).map_err(|err| {
        HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "Invalid request path", &err)
    })?;
    // `//host/path` would otherwise escape to another host.
    if url.origin() != origin.origin() {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid request path",
            format!("`{target}` resolves outside the upstream origin"),
        ));
    }
    Ok(url)
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn served_response(served: Served) -> Response {
    let content_type = HeaderValue::from_str(&served.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut response = (served.status, served.body).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(SOURCE_HEADER, HeaderValue::from_static(served.source.as_str()));
    headers.insert(CLASS_HEADER, HeaderValue::from_static(served.class.as_str()));
    response
}
