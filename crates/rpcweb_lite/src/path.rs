use std::fmt;

use crate::error::PathError;

/// A parsed RPC method path: `/{package}.{service}/{method}`
///
/// Example: `/runtime.v1.ImageService/ListImages`
/// - `service`: `runtime.v1.ImageService`
/// - `method`: `ListImages`
///
/// This is the single routing key used end-to-end: it keys the router's
/// path table and appears verbatim in client request URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodPath {
    service: String,
    method: String,
}

impl MethodPath {
    /// Build a path from its parts without parsing.
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    /// Parse a method path string.
    ///
    /// Expected format: `/{package}.{service}/{method}`; the leading slash
    /// is optional on input but always present in canonical form.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let path = path.strip_prefix('/').unwrap_or(path);

        let (service, method) = path.rsplit_once('/').ok_or_else(|| {
            PathError::Invalid(format!("method path must contain '/': '{path}'"))
        })?;

        if !service.contains('.') {
            return Err(PathError::Invalid(format!(
                "service part must contain package.Service: '{service}'"
            )));
        }

        if service.starts_with('.') || service.ends_with('.') || method.is_empty() {
            return Err(PathError::Invalid(format!(
                "package, service, and method must all be non-empty: '{path}'"
            )));
        }

        Ok(MethodPath {
            service: service.to_owned(),
            method: method.to_owned(),
        })
    }

    /// Returns the full service name: `{package}.{service}`
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the canonical path string: `/{package}.{service}/{method}`
    pub fn canonical(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.service, self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let path = MethodPath::parse("/runtime.v1.ImageService/ListImages").unwrap();
        assert_eq!(path.service(), "runtime.v1.ImageService");
        assert_eq!(path.method(), "ListImages");
        assert_eq!(path.canonical(), "/runtime.v1.ImageService/ListImages");
    }

    #[test]
    fn test_parse_without_leading_slash() {
        let path = MethodPath::parse("runtime.v1.RuntimeService/Version").unwrap();
        assert_eq!(path.service(), "runtime.v1.RuntimeService");
        assert_eq!(path.method(), "Version");
    }

    #[test]
    fn test_nested_package() {
        let path = MethodPath::parse("/com.example.fn.AliasService/Route").unwrap();
        assert_eq!(path.service(), "com.example.fn.AliasService");
        assert_eq!(path.method(), "Route");
    }

    #[test]
    fn test_missing_method() {
        assert!(MethodPath::parse("/runtime.v1.ImageService").is_err());
    }

    #[test]
    fn test_missing_package() {
        assert!(MethodPath::parse("/ImageService/ListImages").is_err());
    }

    #[test]
    fn test_empty_method() {
        assert!(MethodPath::parse("/runtime.v1.ImageService/").is_err());
    }

    #[test]
    fn test_display_matches_canonical() {
        let path = MethodPath::new("runtime.v1.ImageService", "PullImage");
        assert_eq!(path.to_string(), path.canonical());
    }
}
