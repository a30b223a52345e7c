use std::{convert::Infallible, path::PathBuf};

use bytes::Bytes;
use warp::{Filter, http::StatusCode};

use crate::{
    ShortenRequest,
    render::{Renderer, json_error},
};

const BODY_LIMIT: u64 = 1024 * 16;

#[derive(Debug)]
pub struct InvalidBody(pub String);

impl warp::reject::Reject for InvalidBody {}

fn with_renderer(renderer: Renderer) -> impl Filter<Extract = (Renderer,), Error = Infallible> + Clone {
    warp::any().map(move || renderer.clone())
}

/// Decodes a shorten body as form fields when the content type says so, JSON otherwise.
/// An empty body decodes to an empty request.
pub fn decode_body(content_type: Option<&str>, body: &[u8]) -> Result<ShortenRequest, InvalidBody> {
    let is_form = content_type.is_some_and(|ct| ct.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"));
    if is_form {
        let mut request = ShortenRequest::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "url" => request.url = Some(value.into_owned()),
                "customCode" => request.custom_code = Some(value.into_owned()),
                _ => {}
            }
        }
        return Ok(request);
    }
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(ShortenRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| InvalidBody(e.to_string()))
}

fn shorten_body() -> impl Filter<Extract = (ShortenRequest,), Error = warp::Rejection> + Clone {
    warp::body::content_length_limit(BODY_LIMIT)
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::bytes())
        .and_then(|content_type: Option<String>, body: Bytes| async move {
            decode_body(content_type.as_deref(), &body).map_err(warp::reject::custom)
        })
}

fn path_code(raw: &str) -> String {
    url_escape::decode(raw).into_owned()
}

fn list(renderer: Renderer) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "urls")
        .and(warp::get())
        .and(with_renderer(renderer))
        .and_then(|renderer: Renderer| async move { renderer.list().await })
}

fn shorten(renderer: Renderer) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "shorten")
        .and(warp::post())
        .and(shorten_body())
        .and(warp::header::optional::<String>("host"))
        .and(warp::header::optional::<String>("x-forwarded-proto"))
        .and(with_renderer(renderer))
        .and_then(
            |request: ShortenRequest, host: Option<String>, proto: Option<String>, renderer: Renderer| async move {
                renderer.shorten(request, host, proto).await
            },
        )
}

fn delete(renderer: Renderer) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "urls" / String)
        .and(warp::delete())
        .and(with_renderer(renderer))
        .and_then(|code: String, renderer: Renderer| async move { renderer.delete(&path_code(&code)).await })
}

fn assets(assets_dir: PathBuf) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get().and(warp::fs::dir(assets_dir))
}

// Path filters go before method filters so a path miss rejects as not-found.
// Must stay last: it matches any single path segment.
fn resolve(renderer: Renderer) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!(String)
        .and(warp::get())
        .and(with_renderer(renderer))
        .and_then(|code: String, renderer: Renderer| async move { renderer.resolve(&path_code(&code)).await })
}

/// Maps unmatched requests to the not-found page and body errors to JSON.
pub async fn handle_rejection(
    rejection: warp::Rejection,
    renderer: Renderer,
) -> Result<Box<dyn warp::Reply>, Infallible> {
    if rejection.is_not_found() {
        return renderer.not_found(None);
    }
    if let Some(InvalidBody(reason)) = rejection.find::<InvalidBody>() {
        tracing::debug!("rejected shorten body: {reason}");
        return json_error("Invalid request body", StatusCode::BAD_REQUEST);
    }
    if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        return json_error("Request body too large", StatusCode::PAYLOAD_TOO_LARGE);
    }
    if rejection.find::<warp::reject::LengthRequired>().is_some() {
        return json_error("Content-Length required", StatusCode::LENGTH_REQUIRED);
    }
    if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        return json_error("Method not allowed", StatusCode::METHOD_NOT_ALLOWED);
    }

    tracing::error!("unhandled rejection: {:?}", rejection);
    json_error("Internal server error", StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn get_routes(
    renderer: Renderer,
    assets_dir: impl Into<PathBuf>,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
    let fallback = renderer.clone();
    list(renderer.clone())
        .or(shorten(renderer.clone()))
        .or(delete(renderer.clone()))
        .or(assets(assets_dir.into()))
        .or(resolve(renderer))
        .recover(move |rejection: warp::Rejection| {
            let renderer = fallback.clone();
            async move { handle_rejection(rejection, renderer).await }
        })
}

#[cfg(test)]
mod tests {
    use warp::Reply;

    use super::*;

    #[test]
    fn test_decode_json() {
        let request = decode_body(
            Some("application/json"),
            br#"{"url": "https://example.com", "customCode": "abc"}"#,
        )
        .unwrap();
        assert_eq!(request.url.as_deref(), Some("https://example.com"));
        assert_eq!(request.custom_code.as_deref(), Some("abc"));
    }

    // No content type at all is read as JSON.
    #[test]
    fn test_decode_json_without_content_type() {
        let request = decode_body(None, br#"{"url": "http://x"}"#).unwrap();
        assert_eq!(request.url.as_deref(), Some("http://x"));
        assert!(request.custom_code.is_none());
    }

    #[test]
    fn test_decode_form() {
        let request = decode_body(
            Some("application/x-www-form-urlencoded; charset=UTF-8"),
            b"url=https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc&customCode=my+code&other=1",
        )
        .unwrap();
        assert_eq!(request.url.as_deref(), Some("https://example.com/a?b=c"));
        assert_eq!(request.custom_code.as_deref(), Some("my code"));
    }

    #[test]
    fn test_decode_empty() {
        let request = decode_body(Some("application/json"), b"  \n").unwrap();
        assert!(request.url.is_none());
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode_body(Some("application/json"), b"{url:").is_err());
        assert!(decode_body(None, b"[1,2]").is_err());
    }

    #[test]
    fn test_path_code() {
        assert_eq!(path_code("abc123"), "abc123");
        assert_eq!(path_code("my%20link"), "my link");
    }

    #[tokio::test]
    async fn test_rejection_not_found() {
        let reply = handle_rejection(warp::reject::not_found(), Renderer::empty())
            .await
            .unwrap();
        let response = reply.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(
            response
                .headers()
                .get("content-type")
                .is_some_and(|ct| ct.to_str().unwrap().starts_with("text/html"))
        );
    }

    #[tokio::test]
    async fn test_rejection_invalid_body() {
        let rejection = warp::reject::custom(InvalidBody("eof".to_string()));
        let reply = handle_rejection(rejection, Renderer::empty()).await.unwrap();
        assert_eq!(reply.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
