use crate::error::TelemetryError;

/// Immutable identity of one logical service.
///
/// Attached to every span, metric snapshot, and log record that service
/// emits. Constructed once per registered service name and never mutated
/// afterwards; handed around by cheap clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    service_name: String,
    service_version: String,
    environment: String,
    attributes: Vec<(String, String)>,
}

impl Resource {
    /// Builds a resource descriptor. The service name must be non-empty.
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Result<Self, TelemetryError> {
        let service_name = service_name.into();
        if service_name.trim().is_empty() {
            return Err(TelemetryError::InvalidConfiguration(
                "service name must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            service_name,
            service_version: service_version.into(),
            environment: environment.into(),
            attributes: Vec::new(),
        })
    }

    /// Attaches an extra identity attribute, consuming and returning the
    /// resource so calls can be chained during construction.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Instrumentation scope identifier, `"{name}-{version}"`.
    pub fn scope(&self) -> String {
        format!("{}-{}", self.service_name, self.service_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_construction() {
        let resource = Resource::new("cart", "1.2.0", "demo")
            .unwrap()
            .with_attribute("region", "eu-west-1");

        assert_eq!(resource.service_name(), "cart");
        assert_eq!(resource.service_version(), "1.2.0");
        assert_eq!(resource.environment(), "demo");
        assert_eq!(resource.scope(), "cart-1.2.0");
        assert_eq!(
            resource.attributes(),
            &[("region".to_string(), "eu-west-1".to_string())]
        );
    }

    #[test]
    fn test_empty_service_name_rejected() {
        let err = Resource::new("  ", "1.0.0", "demo").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidConfiguration(_)));
    }
}
