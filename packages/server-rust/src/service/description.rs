//! Service descriptions: what a service is called, where it lives, and how
//! it talks.

use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;

use arkalix_core::Fault;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Name of a message payload encoding, normalised to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Encoding(Cow<'static, str>);

impl Encoding {
    pub const ASN1: Self = Self(Cow::Borrowed("ASN1"));
    pub const CBOR: Self = Self(Cow::Borrowed("CBOR"));
    pub const JSON: Self = Self(Cow::Borrowed("JSON"));
    pub const XML: Self = Self(Cow::Borrowed("XML"));
    pub const XSI: Self = Self(Cow::Borrowed("XSI"));

    /// Returns the encoding with the given name, ignoring case.
    #[must_use]
    pub fn named(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        [Self::ASN1, Self::CBOR, Self::JSON, Self::XML, Self::XSI]
            .into_iter()
            .find(|known| known.0 == upper.as_str())
            .unwrap_or(Self(Cow::Owned(upper)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// AccessPolicy
// ---------------------------------------------------------------------------

/// Declared access policy of a service.
///
/// Only the declaration is carried here; deciding whether a particular
/// consumer may invoke the service is left to the policy's evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessPolicy {
    /// Any consumer may invoke the service.
    Unrestricted,
    /// Consumers must present a certificate trusted by the provider.
    Certificate,
    /// Consumers must present an authorization token.
    Token,
}

impl AccessPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unrestricted => "NOT_SECURE",
            Self::Certificate => "CERTIFICATE",
            Self::Token => "TOKEN",
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceError
// ---------------------------------------------------------------------------

/// Reasons a service cannot be described or provided.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("service name must not be empty")]
    EmptyName,
    #[error(
        "base path \"{0}\" must start with a forward slash (/) and then contain only \
         the following characters: A-Z a-z 0-9 -._~!$%&'()*+,;/=:@"
    )]
    InvalidBasePath(String),
    #[error("base path \"{0}\" may not end with a forward slash (/) unless it is the root path")]
    TrailingSlash(String),
    #[error("service \"{0}\" must support at least one encoding")]
    NoEncodings(String),
    #[error("base path \"{0}\" is already provided by another service")]
    BasePathInUse(String),
}

impl From<ServiceError> for Fault {
    fn from(error: ServiceError) -> Self {
        Fault::custom("service", error)
    }
}

// ---------------------------------------------------------------------------
// ServiceDescription
// ---------------------------------------------------------------------------

/// Validated description of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    name: String,
    base_path: String,
    encodings: Vec<Encoding>,
    access_policy: AccessPolicy,
    provider: Option<Provider>,
}

/// The system providing a service, filled in once the service is provided.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Provider {
    pub system_name: String,
    pub addr: SocketAddr,
}

impl ServiceDescription {
    /// Creates a description, validating the base path and encodings.
    ///
    /// The first encoding is the service's default.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] if the name is empty, the base path is not
    /// a valid absolute path, or no encodings are given.
    pub fn new(
        name: impl Into<String>,
        base_path: impl Into<String>,
        encodings: Vec<Encoding>,
        access_policy: AccessPolicy,
    ) -> Result<Self, ServiceError> {
        let name = name.into();
        let base_path = base_path.into();
        if name.is_empty() {
            return Err(ServiceError::EmptyName);
        }
        validate_base_path(&base_path)?;
        if encodings.is_empty() {
            return Err(ServiceError::NoEncodings(name));
        }
        Ok(Self {
            name,
            base_path,
            encodings,
            access_policy,
            provider: None,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    #[must_use]
    pub fn encodings(&self) -> &[Encoding] {
        &self.encodings
    }

    /// The encoding used when a consumer expresses no preference.
    #[must_use]
    pub fn default_encoding(&self) -> &Encoding {
        // Non-empty by construction.
        &self.encodings[0]
    }

    #[must_use]
    pub fn access_policy(&self) -> AccessPolicy {
        self.access_policy
    }

    #[must_use]
    pub fn provider(&self) -> Option<&Provider> {
        self.provider.as_ref()
    }

    /// Returns a copy describing this service as provided by `system_name`
    /// at `addr`.
    #[must_use]
    pub fn provided_by(&self, system_name: &str, addr: SocketAddr) -> Self {
        Self {
            provider: Some(Provider {
                system_name: system_name.to_string(),
                addr,
            }),
            ..self.clone()
        }
    }

    /// Returns `true` if `path` addresses this service.
    #[must_use]
    pub fn matches_path(&self, path: &str) -> bool {
        if self.base_path == "/" {
            return path.starts_with('/');
        }
        path.strip_prefix(self.base_path.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

fn validate_base_path(path: &str) -> Result<(), ServiceError> {
    let valid = path.starts_with('/')
        && path.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"-._~!$%&'()*+,;/=:@".contains(&b)
        });
    if !valid {
        return Err(ServiceError::InvalidBasePath(path.to_string()));
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(ServiceError::TrailingSlash(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn describe(base_path: &str) -> Result<ServiceDescription, ServiceError> {
        ServiceDescription::new(
            "temperature",
            base_path,
            vec![Encoding::JSON],
            AccessPolicy::Unrestricted,
        )
    }

    #[test]
    fn valid_base_paths() {
        for path in ["/", "/temperature", "/a/b-c/d_e~f", "/x:y@z"] {
            assert!(describe(path).is_ok(), "{path} should be valid");
        }
    }

    #[test]
    fn base_path_must_be_absolute() {
        assert_eq!(
            describe("temperature"),
            Err(ServiceError::InvalidBasePath("temperature".to_string()))
        );
        assert!(matches!(describe(""), Err(ServiceError::InvalidBasePath(_))));
    }

    #[test]
    fn base_path_rejects_invalid_characters() {
        assert!(matches!(describe("/with space"), Err(ServiceError::InvalidBasePath(_))));
        assert!(matches!(describe("/q?x=1"), Err(ServiceError::InvalidBasePath(_))));
        assert!(matches!(describe("/frag#x"), Err(ServiceError::InvalidBasePath(_))));
    }

    #[test]
    fn base_path_rejects_trailing_slash_unless_root() {
        assert_eq!(
            describe("/temperature/"),
            Err(ServiceError::TrailingSlash("/temperature/".to_string()))
        );
        assert!(describe("/").is_ok());
    }

    #[test]
    fn encodings_and_name_required() {
        let none = ServiceDescription::new("x", "/x", vec![], AccessPolicy::Unrestricted);
        assert_eq!(none, Err(ServiceError::NoEncodings("x".to_string())));

        let unnamed =
            ServiceDescription::new("", "/x", vec![Encoding::JSON], AccessPolicy::Unrestricted);
        assert_eq!(unnamed, Err(ServiceError::EmptyName));
    }

    #[test]
    fn first_encoding_is_default() {
        let description = ServiceDescription::new(
            "s",
            "/s",
            vec![Encoding::CBOR, Encoding::JSON],
            AccessPolicy::Token,
        )
        .unwrap();
        assert_eq!(description.default_encoding(), &Encoding::CBOR);
        assert_eq!(description.access_policy().as_str(), "TOKEN");
    }

    #[test]
    fn encoding_names_normalised() {
        assert_eq!(Encoding::named("json"), Encoding::JSON);
        assert_eq!(Encoding::named("Xml").as_str(), "XML");
        assert_eq!(Encoding::named("proto").to_string(), "PROTO");
    }

    #[test]
    fn path_matching_respects_segments() {
        let description = describe("/temperature").unwrap();
        assert!(description.matches_path("/temperature"));
        assert!(description.matches_path("/temperature/celsius"));
        assert!(!description.matches_path("/temperatures"));
        assert!(!description.matches_path("/other"));

        let root = describe("/").unwrap();
        assert!(root.matches_path("/anything"));
    }

    #[test]
    fn provided_by_sets_provider() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let provided = describe("/t").unwrap().provided_by("sensor", addr);
        let provider = provided.provider().unwrap();
        assert_eq!(provider.system_name, "sensor");
        assert_eq!(provider.addr, addr);
    }
}
