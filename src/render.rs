use std::{convert::Infallible, sync::Arc};

use handlebars::Handlebars;
use warp::http::{HeaderValue, StatusCode};

use crate::{
    ErrorResponse, ShortenRequest, SuccessResponse,
    db::Db,
    shortener::{Origin, ShortenError, Shortener},
};

const NOT_FOUND_TEMPLATE: &str = "not_found";

pub(crate) fn json_error(message: &str, status: StatusCode) -> Result<Box<dyn warp::Reply>, Infallible> {
    let body = ErrorResponse {
        error: message.to_string(),
    };
    Ok(Box::new(warp::reply::with_status(warp::reply::json(&body), status)))
}

fn error_reply(e: ShortenError) -> Result<Box<dyn warp::Reply>, Infallible> {
    match e {
        ShortenError::InvalidUrl => json_error(&e.to_string(), StatusCode::BAD_REQUEST),
        ShortenError::CodeAlreadyExists => json_error(&e.to_string(), StatusCode::CONFLICT),
        ShortenError::NotFound => json_error(&e.to_string(), StatusCode::NOT_FOUND),
        ShortenError::CodeSpaceExhausted(_) | ShortenError::Persistence(_) => {
            tracing::error!("{e}");
            json_error("Internal server error", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// Stored URLs are only checked for their scheme, so anything that is not a
// legal header value is re-serialized through the url parser first.
fn location_header(target: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(target).ok().or_else(|| {
        url::Url::parse(target)
            .ok()
            .and_then(|parsed| HeaderValue::from_str(parsed.as_str()).ok())
    })
}

fn redirect(location: HeaderValue) -> Result<Box<dyn warp::Reply>, Infallible> {
    Ok(Box::new(warp::reply::with_header(
        warp::reply::with_header(
            warp::reply::with_status(warp::reply(), StatusCode::FOUND),
            "Location",
            location,
        ),
        "Cache-Control",
        "no-cache",
    )))
}

/// Turns shortener results into HTTP replies.
#[derive(Clone, Debug)]
pub struct Renderer {
    shortener: Shortener,
    public_host: String,
    handlebars: Arc<Handlebars<'static>>,
}

impl Renderer {
    /// A renderer over an empty in-memory store, answering as `localhost:3000`.
    pub fn empty() -> Self {
        Self::new(Shortener::new(Db::in_memory()), "localhost:3000").expect("embedded templates")
    }

    /// `public_host` is used for short URLs when a request carries no Host header.
    pub fn new(shortener: Shortener, public_host: &str) -> Result<Self, handlebars::TemplateError> {
        let mut bars = Handlebars::new();
        bars.register_template_string(NOT_FOUND_TEMPLATE, include_str!("../templates/not_found.hbs"))?;
        Ok(Self {
            shortener,
            public_host: public_host.to_string(),
            handlebars: Arc::new(bars),
        })
    }

    pub fn shortener(&self) -> &Shortener {
        &self.shortener
    }

    pub async fn list(&self) -> Result<Box<dyn warp::Reply>, Infallible> {
        match self.shortener.list_all().await {
            Ok(urls) => Ok(Box::new(warp::reply::json(&urls))),
            Err(e) => error_reply(e),
        }
    }

    pub async fn shorten(
        &self,
        request: ShortenRequest,
        host: Option<String>,
        forwarded_proto: Option<String>,
    ) -> Result<Box<dyn warp::Reply>, Infallible> {
        let origin = self.origin(host, forwarded_proto);
        match self.shortener.shorten(&request, &origin).await {
            Ok(created) => Ok(Box::new(warp::reply::json(&created))),
            Err(e) => error_reply(e),
        }
    }

    pub async fn delete(&self, code: &str) -> Result<Box<dyn warp::Reply>, Infallible> {
        match self.shortener.delete_code(code).await {
            Ok(()) => Ok(Box::new(warp::reply::json(&SuccessResponse { success: true }))),
            Err(e) => error_reply(e),
        }
    }

    pub async fn resolve(&self, code: &str) -> Result<Box<dyn warp::Reply>, Infallible> {
        match self.shortener.resolve(code).await {
            Ok(target) => match location_header(&target) {
                Some(location) => redirect(location),
                None => {
                    tracing::error!("stored url for {code} cannot be sent as a Location header: {target}");
                    json_error("Internal server error", StatusCode::INTERNAL_SERVER_ERROR)
                }
            },
            Err(ShortenError::NotFound) => self.not_found(Some(code)),
            Err(e) => error_reply(e),
        }
    }

    /// The HTML page shown for unknown short links and unmatched paths.
    pub fn not_found(&self, code: Option<&str>) -> Result<Box<dyn warp::Reply>, Infallible> {
        match self
            .handlebars
            .render(NOT_FOUND_TEMPLATE, &serde_json::json!({ "code": code }))
        {
            Ok(page) => Ok(Box::new(warp::reply::with_status(
                warp::reply::html(page),
                StatusCode::NOT_FOUND,
            ))),
            Err(e) => {
                tracing::error!("{e}");
                Ok(Box::new(StatusCode::NOT_FOUND))
            }
        }
    }

    fn origin(&self, host: Option<String>, forwarded_proto: Option<String>) -> Origin {
        let scheme = forwarded_proto
            .as_deref()
            .and_then(|p| p.split(',').next())
            .map(str::trim)
            .filter(|p| *p == "http" || *p == "https")
            .unwrap_or("http");
        let host = host.filter(|h| !h.is_empty()).unwrap_or_else(|| self.public_host.clone());
        Origin::new(scheme, &host)
    }
}
