use std::collections::BTreeMap;

use axum::http::StatusCode;
use bytes::Bytes;
use serde::Serialize;

use crate::router::{Router, RpcResponse};

/// One path table entry in the JSON API description.
#[derive(Serialize)]
struct MethodDocs<'a> {
    service: &'a str,
    method: &'a str,
    request: &'static str,
    response: &'static str,
    server_streaming: bool,
}

#[derive(Serialize)]
struct ApiDocs<'a> {
    paths: BTreeMap<String, MethodDocs<'a>>,
}

impl Router {
    /// Describe the installed API without executing it.
    ///
    /// Negotiates exactly `application/json` and `text/html`; any other
    /// Accept value is refused with 406, no fallback.
    pub fn docs(&self, accept: &str) -> RpcResponse {
        let essence = accept.split(';').next().unwrap_or(accept).trim();
        match essence {
            "application/json" => self.docs_json(),
            "text/html" => self.docs_html(),
            other => RpcResponse::plain(
                StatusCode::NOT_ACCEPTABLE,
                format!("Not Acceptable: cannot produce '{other}'"),
            ),
        }
    }

    fn docs_json(&self) -> RpcResponse {
        let docs = ApiDocs {
            paths: self
                .routes()
                .map(|(path, descriptor)| {
                    (
                        path.to_owned(),
                        MethodDocs {
                            service: descriptor.service_name(),
                            method: descriptor.method_name(),
                            request: descriptor.request_schema(),
                            response: descriptor.response_schema(),
                            server_streaming: descriptor.is_server_streaming(),
                        },
                    )
                })
                .collect(),
        };

        // ApiDocs has no unserializable members; this cannot fail.
        let body = serde_json::to_vec(&docs).unwrap_or_default();
        RpcResponse {
            status: StatusCode::OK,
            content_type: "application/json",
            body: Bytes::from(body),
        }
    }

    fn docs_html(&self) -> RpcResponse {
        let mut paths: Vec<_> = self.routes().collect();
        paths.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut page = String::from(
            "<!DOCTYPE html>\n<html>\n<head><title>RPC API</title></head>\n<body>\n<h1>RPC API</h1>\n<ul>\n",
        );
        for (path, descriptor) in paths {
            page.push_str(&format!(
                "<li><code>{path}</code> &mdash; {} &rarr; {}</li>\n",
                descriptor.request_schema(),
                descriptor.response_schema()
            ));
        }
        page.push_str("</ul>\n</body>\n</html>\n");

        RpcResponse {
            status: StatusCode::OK,
            content_type: "text/html; charset=utf-8",
            body: Bytes::from(page),
        }
    }

    fn routes(&self) -> impl Iterator<Item = (&str, &crate::descriptor::MethodDescriptor)> {
        self.iter_routes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceBuilder;
    use tokio_util::sync::CancellationToken;

    #[derive(Clone, PartialEq, prost::Message)]
    struct PingRequest {
        #[prost(string, tag = "1")]
        text: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    struct PingResponse {
        #[prost(string, tag = "1")]
        text: String,
    }

    fn sample_router() -> Router {
        Router::new(CancellationToken::new())
            .install(
                ServiceBuilder::new("test.v1.Echo")
                    .unary::<PingRequest, PingResponse>("Ping")
                    .unary::<PingRequest, PingResponse>("Pong")
                    .chain(
                        ServiceBuilder::new("test.v1.Other")
                            .server_streaming::<PingRequest, PingResponse>("Watch"),
                    ),
            )
            .unwrap()
    }

    #[test]
    fn test_json_docs_entry_count_matches_path_count() {
        let router = sample_router();
        let response = router.docs("application/json");
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, "application/json");

        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        let paths = json["paths"].as_object().unwrap();
        assert_eq!(paths.len(), router.path_count());

        let entry = &paths["/test.v1.Echo/Ping"];
        assert_eq!(entry["service"], "test.v1.Echo");
        assert_eq!(entry["method"], "Ping");
        assert_eq!(entry["request"], "PingRequest");
        assert_eq!(entry["response"], "PingResponse");
        assert_eq!(entry["server_streaming"], false);
        assert_eq!(paths["/test.v1.Other/Watch"]["server_streaming"], true);
    }

    #[test]
    fn test_html_docs_has_marker() {
        let response = sample_router().docs("text/html");
        assert_eq!(response.status, StatusCode::OK);
        let page = std::str::from_utf8(&response.body).unwrap();
        assert!(page.contains("<title>RPC API</title>"));
        assert!(page.contains("/test.v1.Echo/Ping"));
    }

    #[test]
    fn test_html_with_parameters_still_negotiates() {
        let response = sample_router().docs("text/html; q=0.9");
        assert_eq!(response.status, StatusCode::OK);
    }

    #[test]
    fn test_other_accept_is_406_plain_text() {
        let response = sample_router().docs("application/xml");
        assert_eq!(response.status, StatusCode::NOT_ACCEPTABLE);
        assert!(response.content_type.starts_with("text/plain"));
        assert!(
            std::str::from_utf8(&response.body)
                .unwrap()
                .contains("Not Acceptable")
        );
    }

    #[test]
    fn test_empty_router_docs_is_empty_map() {
        let router = Router::new(CancellationToken::new());
        let response = router.docs("application/json");
        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(json["paths"].as_object().unwrap().len(), 0);
    }
}
