//! HTTP front end: the form page, the generate endpoint and static files.

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{
        header::{ACCEPT_LANGUAGE, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir, trace::TraceLayer};

use crate::encoder::Encoder;
use crate::error::Error;
use crate::i18n::{cookie_value, Catalog, LANG_COOKIE};
use crate::store::{Artifact, ArtifactStore, STATIC_URL_PREFIX};

// One year, in seconds.
const LANG_COOKIE_MAX_AGE: u64 = 365 * 24 * 60 * 60;

/// Everything a request handler needs, shared read-only across requests.
pub struct AppState {
    pub encoder: Encoder,
    pub store: ArtifactStore,
    pub catalog: Catalog,
}

impl AppState {
    pub fn new(encoder: Encoder, store: ArtifactStore, catalog: Catalog) -> Self {
        Self {
            encoder,
            store,
            catalog,
        }
    }
}

/// Builds the application router.
///
/// `static_root` is served verbatim under `/static`, which includes the
/// generated images.
pub fn router(state: Arc<AppState>, static_root: impl AsRef<Path>, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/generate", post(generate))
        .nest_service(STATIC_URL_PREFIX, ServeDir::new(static_root.as_ref()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
}

#[derive(Debug, Deserialize)]
struct LangQuery {
    lang: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateForm {
    #[serde(default)]
    data: String,
}

#[derive(Default)]
struct Page<'a> {
    input: &'a str,
    artifact: Option<&'a Artifact>,
    error_key: Option<&'static str>,
}

async fn home(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> Response {
    let (lang, cookie) = select_language(&state.catalog, &headers, query.lang.as_deref());
    let body = render_page(&state.catalog, lang, &Page::default());
    respond(StatusCode::OK, body, cookie)
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
    Form(form): Form<GenerateForm>,
) -> Response {
    let (lang, cookie) = select_language(&state.catalog, &headers, query.lang.as_deref());

    let worker = Arc::clone(&state);
    let text = form.data.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let bitmap = worker.encoder.encode(&text)?;
        worker.store.store(&bitmap)
    })
    .await;

    let (status, page) = match &outcome {
        Ok(Ok(artifact)) => {
            tracing::info!(file = %artifact.file_name, bytes = form.data.len(), "generated qr code");
            (
                StatusCode::OK,
                Page {
                    input: &form.data,
                    artifact: Some(artifact),
                    error_key: None,
                },
            )
        }
        Ok(Err(err)) => {
            let (status, key) = failure(err);
            (
                status,
                Page {
                    input: &form.data,
                    artifact: None,
                    error_key: Some(key),
                },
            )
        }
        Err(err) => {
            tracing::error!(error = %err, "qr generation task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Page {
                    input: &form.data,
                    artifact: None,
                    error_key: Some("errorInternal"),
                },
            )
        }
    };

    let body = render_page(&state.catalog, lang, &page);
    respond(status, body, cookie)
}

// Status code and message key for a failed generate request.
fn failure(err: &Error) -> (StatusCode, &'static str) {
    match err {
        Error::EmptyInput => (StatusCode::BAD_REQUEST, "errorEmpty"),
        Error::EncodingCapacityExceeded { len } => {
            tracing::debug!(len, "input too long for a qr code");
            (StatusCode::PAYLOAD_TOO_LARGE, "errorTooLong")
        }
        other => {
            tracing::error!(error = %other, "failed to generate qr code");
            (StatusCode::INTERNAL_SERVER_ERROR, "errorInternal")
        }
    }
}

/// Resolves the request language, plus a cookie to persist an explicit choice.
fn select_language<'a>(
    catalog: &'a Catalog,
    headers: &HeaderMap,
    explicit: Option<&str>,
) -> (&'a str, Option<HeaderValue>) {
    let cookie = headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| cookie_value(v, LANG_COOKIE));
    let accept = headers.get(ACCEPT_LANGUAGE).and_then(|v| v.to_str().ok());

    let lang = catalog.resolve(explicit, cookie, accept);
    let persist = explicit.is_some_and(|e| e.trim().eq_ignore_ascii_case(lang)) && cookie != Some(lang);
    let set_cookie = persist
        .then(|| {
            HeaderValue::from_str(&format!(
                "{LANG_COOKIE}={lang}; Path=/; Max-Age={LANG_COOKIE_MAX_AGE}; SameSite=Lax"
            ))
            .ok()
        })
        .flatten();
    (lang, set_cookie)
}

fn respond(status: StatusCode, body: String, set_cookie: Option<HeaderValue>) -> Response {
    let mut response = (status, Html(body)).into_response();
    if let Some(cookie) = set_cookie {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

fn render_page(catalog: &Catalog, lang: &str, page: &Page<'_>) -> String {
    let t = |key| html_escape(catalog.text(lang, key));

    let languages: String = catalog
        .languages()
        .map(|code| {
            let label = html_escape(&code.to_uppercase());
            if code == lang {
                format!("<strong>{label}</strong>")
            } else {
                format!("<a href=\"/?lang={}\">{label}</a>", html_escape(code))
            }
        })
        .collect::<Vec<_>>()
        .join(" | ");

    let error = page
        .error_key
        .map(|key| format!("<p class=\"error\" role=\"alert\">{}</p>\n", t(key)))
        .unwrap_or_default();

    let result = page
        .artifact
        .map(|artifact| {
            let url = html_escape(&artifact.url);
            format!(
                "<section class=\"result\">\n\
                 <img id=\"imgQr\" src=\"{url}\" alt=\"QR code\" width=\"256\" height=\"256\">\n\
                 <p>\n\
                 <a id=\"download\" href=\"{url}\" download=\"qrcode.png\">{download}</a>\n\
                 <button id=\"copy-to-clipboard\" type=\"button\" hidden>{copy}</button>\n\
                 </p>\n\
                 </section>\n\
                 <script src=\"{STATIC_URL_PREFIX}/js/main.js\" defer></script>\n",
                download = t("downloadButtonLabel"),
                copy = t("copyToClipboardButtonLabel"),
            )
        })
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"{lang}\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n\
         </head>\n\
         <body>\n\
         <nav>{language_label}: {languages}</nav>\n\
         <h1>{title}</h1>\n\
         {error}\
         <form method=\"post\" action=\"/generate?lang={lang}\">\n\
         <label for=\"data\">{input_label}</label>\n\
         <textarea id=\"data\" name=\"data\" rows=\"4\" required>{input}</textarea>\n\
         <button type=\"submit\">{generate}</button>\n\
         </form>\n\
         {result}\
         </body>\n\
         </html>\n",
        lang = html_escape(lang),
        title = t("Title"),
        language_label = t("languageLabel"),
        input_label = t("inputLabel"),
        input = html_escape(page.input),
        generate = t("generateButtonLabel"),
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
