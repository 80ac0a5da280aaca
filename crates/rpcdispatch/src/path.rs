use std::fmt;

use crate::error::RpcPathError;

/// A parsed full method path: `/{package}.{service}/{method}`
///
/// Example: `/pkg.EchoService/Echo`
/// - `package`: `pkg`
/// - `service`: `EchoService`
/// - `method`: `Echo`
///
/// Services declared without a package have an empty `package` and the
/// path `/{service}/{method}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodPath {
    pub package: String,
    pub service: String,
    pub method: String,
}

impl MethodPath {
    /// Parse a full method path.
    ///
    /// The leading slash is optional. The package may itself contain dots,
    /// so the service name is split off at the last one; a service path
    /// with no dot has no package.
    pub fn parse(path: &str) -> Result<Self, RpcPathError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);

        let (service_path, method) = trimmed.rsplit_once('/').ok_or_else(|| {
            RpcPathError::Invalid(format!("method path must contain '/': '{path}'"))
        })?;

        if service_path.contains('/') {
            return Err(RpcPathError::Invalid(format!(
                "method path has too many segments: '{path}'"
            )));
        }

        let (package, service) = match service_path.rsplit_once('.') {
            Some((package, _)) if package.is_empty() => {
                return Err(RpcPathError::Invalid(format!(
                    "package must be non-empty when present: '{path}'"
                )));
            }
            Some((package, service)) => (package, service),
            None => ("", service_path),
        };

        if service.is_empty() || method.is_empty() {
            return Err(RpcPathError::Invalid(format!(
                "service and method must both be non-empty: '{path}'"
            )));
        }

        Ok(MethodPath {
            package: package.to_owned(),
            service: service.to_owned(),
            method: method.to_owned(),
        })
    }

    /// Returns the full service name: `{package}.{service}`, or just
    /// `{service}` without a package.
    pub fn full_service(&self) -> String {
        if self.package.is_empty() {
            self.service.clone()
        } else {
            format!("{}.{}", self.package, self.service)
        }
    }

    /// Returns the canonical method path: `/{package}.{service}/{method}`
    pub fn full_path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.full_service(), self.method)
    }
}
