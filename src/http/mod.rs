//! The intercepting HTTP(S) front end.
//!
//! Browsers following a spoofed DNS answer land here. Requests are either
//! control URLs (paths starting with `$@_`) or ordinary requests for a
//! blocked host, which get a surrogate script or the block notice. Nothing
//! served here may ever be cached by the client.

pub mod server;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Host, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::Response;
use axum::Router;
use hickory_proto::rr::RecordType;
use tracing::{info, warn};

use crate::cache::AnswerKey;
use crate::config::{parse_duration, Config};
use crate::store::{canonical, Store};

/// `Cache-Control` value attached to every response.
const NO_CACHE: &str = "private, max-age=0, no-cache, must-revalidate";

/// Shared state of the HTTP handlers.
pub struct HttpState {
    pub store: Arc<Store>,
    pub config: Arc<Config>,
}

/// Build the router serving both the plain and the TLS listener.
#[must_use]
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new().fallback(handle).with_state(state)
}

async fn handle(State(state): State<Arc<HttpState>>, Host(host): Host, uri: Uri) -> Response {
    let host = html_escape(strip_port(&host));
    let path = html_escape(uri.path().trim_start_matches('/'));

    if path.starts_with("$@_") {
        special(&state, &host, &path)
    } else {
        blocked(&state, &host, &path)
    }
}

/// Handle `$@_` control URLs.
fn special(state: &HttpState, host: &str, path: &str) -> Response {
    if let Some(rest) = path.strip_prefix("$@_allow/") {
        let (duration, redirect) = rest.split_once('/').unwrap_or((rest, ""));

        let secs = match parse_duration(duration) {
            Ok(secs) => secs,
            Err(err) => {
                warn!(error = %err, "bad duration in allow request");
                return respond(StatusCode::BAD_REQUEST, "text/plain", err.to_string());
            }
        };
        let Some(name) = canonical(host) else {
            return respond(StatusCode::BAD_REQUEST, "text/plain", "bad host".into());
        };

        info!(host = %name, secs, "whitelisting host");
        state.store.overrides.allow(&name, secs);
        // The client must not keep resolving to us off a stale answer.
        state.store.answers.remove([
            AnswerKey::new(RecordType::A, name.clone()),
            AnswerKey::new(RecordType::AAAA, name),
        ]);

        return Response::builder()
            .status(StatusCode::SEE_OTHER)
            .header(header::CACHE_CONTROL, NO_CACHE)
            .header(header::LOCATION, format!("/{redirect}"))
            .body(Body::empty())
            .expect("static response parts are valid");
    }

    if let Some(what) = path.strip_prefix("$@_list/") {
        if !state.config.list_pages {
            return respond(StatusCode::NOT_FOUND, "text/plain", "listing disabled".into());
        }
        return match what {
            "config" => respond(StatusCode::OK, "text/plain", state.config.serialize()),
            "hosts" => {
                let names = state.store.hosts.snapshot();
                let mut body = format!("# Blocking {} hosts\n", names.len());
                body.push_str(&names.join("\n"));
                respond(StatusCode::OK, "text/plain", body)
            }
            "regexps" => respond(
                StatusCode::OK,
                "text/plain",
                state.store.regexps.snapshot().join("\n"),
            ),
            "override" => {
                let body = state
                    .store
                    .overrides
                    .snapshot()
                    .into_iter()
                    .map(|(host, left)| format!("{host} {}s\n", left.as_secs()))
                    .collect();
                respond(StatusCode::OK, "text/plain", body)
            }
            "cache" => respond(
                StatusCode::OK,
                "text/plain",
                state.store.answers.snapshot().join("\n"),
            ),
            other => respond(
                StatusCode::OK,
                "text/plain",
                format!("unknown list: {other}"),
            ),
        };
    }

    respond(
        StatusCode::OK,
        "text/plain",
        format!("unknown command: {path}"),
    )
}

/// Handle a request for a blocked host.
fn blocked(state: &HttpState, host: &str, path: &str) -> Response {
    if let Some(script) = state.store.find_surrogate(host) {
        return respond(StatusCode::OK, "application/javascript", script);
    }

    let notice = block_notice(host, path);
    if path.ends_with(".js") {
        // Wrapped in a comment so the script does not throw parse errors.
        respond(
            StatusCode::OK,
            "application/javascript",
            format!("/*{notice}*/"),
        )
    } else {
        respond(StatusCode::OK, "text/html", notice)
    }
}

/// The small HTML notice with the timed unblock links.
fn block_notice(host: &str, path: &str) -> String {
    format!(
        "<html><head><title>trackwall {host}</title></head><body>\n\
         <p>trackwall blocked access to <code>{host}</code>. Unblock this domain for:</p>\n\
         <ul><li><a href=\"/$@_allow/10s/{path}\">ten seconds</a></li>\n\
         <li><a href=\"/$@_allow/1h/{path}\">an hour</a></li>\n\
         <li><a href=\"/$@_allow/1d/{path}\">a day</a></li>\n\
         <li><a href=\"/$@_allow/10y/{path}\">ten years</a></li></ul></body></html>"
    )
}

fn respond(status: StatusCode, content_type: &'static str, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CACHE_CONTROL, NO_CACHE)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .expect("static response parts are valid")
}

fn strip_port(host: &str) -> &str {
    if let Some(stripped) = host.strip_prefix('[') {
        stripped.split(']').next().unwrap_or(host)
    } else {
        host.rsplit_once(':').map_or(host, |(name, _)| name)
    }
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> Arc<HttpState> {
        Arc::new(HttpState {
            store: Arc::new(Store::new(Duration::from_secs(300))),
            config: Arc::new(Config::default()),
        })
    }

    async fn get(state: Arc<HttpState>, host: &str, path: &str) -> Response {
        router(state)
            .oneshot(
                Request::builder()
                    .uri(path)
                    .header("host", host)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn should_serve_block_notice_as_html() {
        let response = get(state(), "tracker.example", "/some/page").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html"
        );
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), NO_CACHE);

        let body = body_string(response).await;
        assert!(body.contains("tracker.example"));
        assert!(body.contains("/$@_allow/10s/some/page"));
        assert!(body.contains("/$@_allow/1h/some/page"));
        assert!(body.contains("/$@_allow/1d/some/page"));
        assert!(body.contains("/$@_allow/10y/some/page"));
    }

    #[tokio::test]
    async fn should_wrap_notice_in_comment_for_scripts() {
        let response = get(state(), "tracker.example", "/metrics.js").await;

        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/javascript"
        );
        let body = body_string(response).await;
        assert!(body.starts_with("/*"));
        assert!(body.ends_with("*/"));
    }

    #[tokio::test]
    async fn should_serve_surrogate_script_verbatim() {
        let state = state();
        state.store.hosts.add("ads.site");
        state.store.hosts.set_surrogate_matching(
            &regex::Regex::new("^ads\\.").unwrap(),
            "window.ads={push:function(){}};",
        );

        let response = get(state, "ads.site", "/x.js").await;

        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/javascript"
        );
        assert_eq!(body_string(response).await, "window.ads={push:function(){}};");
    }

    #[tokio::test]
    async fn should_whitelist_host_and_redirect_on_allow() {
        let state = state();
        state.store.hosts.add("tracker.example");
        state.store.answers.put(
            AnswerKey::new(RecordType::A, "tracker.example"),
            hickory_proto::op::ResponseCode::NoError,
            vec![],
            Duration::from_secs(60),
        );

        let response = get(
            Arc::clone(&state),
            "tracker.example",
            "/$@_allow/10s/foo/bar",
        )
        .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/foo/bar");
        assert!(state.store.overrides.is_allowed("tracker.example"));
        assert!(state
            .store
            .answers
            .get(&AnswerKey::new(RecordType::A, "tracker.example"))
            .is_none());
    }

    #[tokio::test]
    async fn should_strip_port_from_host_header() {
        let state = state();

        let response = get(Arc::clone(&state), "tracker.example:8080", "/$@_allow/1h/").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(state.store.overrides.is_allowed("tracker.example"));
    }

    #[tokio::test]
    async fn should_reject_bad_allow_duration() {
        let response = get(state(), "tracker.example", "/$@_allow/never/foo").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn should_answer_unknown_control_urls() {
        let response = get(state(), "tracker.example", "/$@_frobnicate").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.starts_with("unknown command: "));
    }

    #[tokio::test]
    async fn should_disable_list_pages_by_default() {
        let response = get(state(), "tracker.example", "/$@_list/hosts").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn should_dump_hosts_when_list_pages_enabled() {
        let mut config = Config::default();
        config.list_pages = true;
        let state = Arc::new(HttpState {
            store: Arc::new(Store::new(Duration::from_secs(300))),
            config: Arc::new(config),
        });
        state.store.hosts.add("tracker.example");

        let response = get(state, "tracker.example", "/$@_list/hosts").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("# Blocking 1 hosts"));
        assert!(body.contains("tracker.example"));
    }

    #[tokio::test]
    async fn should_escape_html_in_notice() {
        let response = get(state(), "tracker.example", "/ad&track='x'").await;

        let body = body_string(response).await;
        assert!(body.contains("ad&amp;track=&#39;x&#39;"));
        assert!(!body.contains("ad&track='x'"));
    }
}
