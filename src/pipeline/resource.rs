//! Resource descriptor identifying the reporting service

use crate::config::DistroConfig;
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_NAMESPACE: &str = "service.namespace";
pub const SERVICE_INSTANCE_ID: &str = "service.instance.id";

/// Used when no service name is configured, as the OpenTelemetry SDKs do
pub const UNKNOWN_SERVICE: &str = "unknown_service";

/// Service identity attached to every signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub service_name: String,
    pub service_namespace: Option<String>,
    pub service_instance_id: Option<String>,
}

impl ResourceDescriptor {
    pub fn from_config(config: &DistroConfig) -> Self {
        Self {
            service_name: config
                .service_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_SERVICE.to_string()),
            service_namespace: config.service_namespace.clone(),
            service_instance_id: config.service_instance_id.clone(),
        }
    }

    /// Semantic-convention attributes, in a stable order
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attributes = vec![(SERVICE_NAME, self.service_name.clone())];
        if let Some(ref namespace) = self.service_namespace {
            attributes.push((SERVICE_NAMESPACE, namespace.clone()));
        }
        if let Some(ref instance_id) = self.service_instance_id {
            attributes.push((SERVICE_INSTANCE_ID, instance_id.clone()));
        }
        attributes
    }

    /// SDK resource: detected defaults overridden by the service identity
    pub fn to_resource(&self) -> Resource {
        let service = Resource::new(
            self.attributes()
                .into_iter()
                .map(|(key, value)| KeyValue::new(key, value)),
        );
        Resource::default().merge(&service)
    }
}
