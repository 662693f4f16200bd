//! Attribute path resolution.

use crate::poller::{AttributePath, PollError};
use crate::protocol::{ProtocolError, ResourceName, Session, Value};

/// Walks attribute paths against one resource of one session.
pub struct PathResolver<'a> {
    session: &'a dyn Session,
    resource: &'a ResourceName,
    url: &'a str,
}

impl<'a> PathResolver<'a> {
    pub fn new(session: &'a dyn Session, resource: &'a ResourceName, url: &'a str) -> Self {
        Self {
            session,
            resource,
            url,
        }
    }

    /// Resolve every path, in order.
    pub async fn resolve_all(&self, paths: &[AttributePath]) -> Result<Vec<Value>, PollError> {
        let mut values = Vec::with_capacity(paths.len());
        for path in paths {
            values.push(self.resolve(path).await?);
        }
        Ok(values)
    }

    /// Resolve one path to a value, possibly `Null`.
    ///
    /// The first segment is read as an attribute, falling back to a
    /// zero-argument operation of the same name. Later segments select a
    /// field of the current value. A `Null` met before the last segment
    /// resolves the whole path to `Null`.
    ///
    /// # Errors
    /// Session failures other than a missing attribute, open types
    /// ([`PollError::Unimplemented`]) and fields missing from plain objects
    /// or primitives ([`PollError::NoSuchField`]).
    pub async fn resolve(&self, path: &AttributePath) -> Result<Value, PollError> {
        let mut value = self.read_root(path.root()).await?;

        for segment in &path.segments()[1..] {
            value = match value {
                Value::Composite(composite) => {
                    composite.get(segment).cloned().unwrap_or(Value::Null)
                }
                Value::OpenType(descriptor) => return Err(PollError::Unimplemented(descriptor)),
                Value::Null => Value::Null,
                Value::Object(object) => {
                    object
                        .field(segment)
                        .cloned()
                        .ok_or_else(|| PollError::NoSuchField {
                            field: segment.clone(),
                            type_name: object.class_name.clone(),
                        })?
                }
                other => {
                    return Err(PollError::NoSuchField {
                        field: segment.clone(),
                        type_name: other.type_name().to_string(),
                    });
                }
            };
        }

        if value.is_null() {
            tracing::debug!(
                path = %path,
                resource = %self.resource,
                url = %self.url,
                "NULL read"
            );
        }
        Ok(value)
    }

    async fn read_root(&self, name: &str) -> Result<Value, PollError> {
        match self.session.get_attribute(self.resource, name).await {
            Err(ProtocolError::AttributeNotFound { .. }) => {
                Ok(self.session.invoke(self.resource, name).await?)
            }
            other => Ok(other?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::protocol::memory::{MemoryResource, MemoryServer, MemoryTransportFactory};
    use crate::protocol::{
        CompositeValue, ConnectEnvironment, ObjectValue, ServiceUrl, TransportFactory,
    };

    const URL: &str = "memory://app01";

    fn resource() -> ResourceName {
        ResourceName::parse("app:type=Stats").unwrap()
    }

    async fn session_with(resource: MemoryResource) -> (Arc<MemoryServer>, Arc<dyn Session>) {
        let server = MemoryServer::new("app01");
        server.register(self::resource(), resource);
        let factory = MemoryTransportFactory::new();
        factory.add_server(Arc::clone(&server));
        let transport = factory
            .new_transport(
                &ServiceUrl::parse(URL).unwrap(),
                &ConnectEnvironment {
                    credentials: None,
                    provider_hint: "test".into(),
                },
            )
            .unwrap();
        transport.connect().await.unwrap();
        let session = transport.session().await.unwrap();
        (server, session)
    }

    fn path(s: &str) -> AttributePath {
        s.parse().unwrap()
    }

    // ===== Attribute reads =====

    #[tokio::test]
    async fn test_single_segment_reads_attribute() {
        let (_server, session) = session_with(MemoryResource::new().with_attribute("Count", 5i64)).await;
        let name = resource();
        let resolver = PathResolver::new(session.as_ref(), &name, URL);
        assert_eq!(resolver.resolve(&path("Count")).await.unwrap(), Value::Long(5));
    }

    #[tokio::test]
    async fn test_missing_attribute_falls_back_to_operation() {
        let (_server, session) =
            session_with(MemoryResource::new().with_operation("uptime", 99i64)).await;
        let name = resource();
        let resolver = PathResolver::new(session.as_ref(), &name, URL);
        assert_eq!(resolver.resolve(&path("uptime")).await.unwrap(), Value::Long(99));

        let err = resolver.resolve(&path("nothing")).await.unwrap_err();
        assert!(matches!(
            err,
            PollError::Protocol(ProtocolError::OperationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_io_failure_propagates() {
        let (server, session) = session_with(MemoryResource::new().with_attribute("Count", 5i64)).await;
        server.set_reachable(false);
        let name = resource();
        let resolver = PathResolver::new(session.as_ref(), &name, URL);
        let err = resolver.resolve(&path("Count")).await.unwrap_err();
        assert!(matches!(err, PollError::Protocol(ProtocolError::Io(_))));
    }

    // ===== Structured traversal =====

    #[tokio::test]
    async fn test_composite_field() {
        let composite = CompositeValue::new("T").with_field("b", 7i64);
        let (_server, session) =
            session_with(MemoryResource::new().with_attribute("a", composite)).await;
        let name = resource();
        let resolver = PathResolver::new(session.as_ref(), &name, URL);

        assert_eq!(resolver.resolve(&path("a.b")).await.unwrap(), Value::Long(7));
        // Absent field resolves to null rather than failing.
        assert_eq!(resolver.resolve(&path("a.c")).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_nested_composite() {
        let inner = CompositeValue::new("Inner").with_field("duration", 12i64);
        let outer = CompositeValue::new("GcInfo").with_field("last", inner);
        let (_server, session) =
            session_with(MemoryResource::new().with_attribute("LastGcInfo", outer)).await;
        let name = resource();
        let resolver = PathResolver::new(session.as_ref(), &name, URL);
        assert_eq!(
            resolver.resolve(&path("LastGcInfo.last.duration")).await.unwrap(),
            Value::Long(12)
        );
    }

    #[tokio::test]
    async fn test_null_mid_path_propagates() {
        let (_server, session) =
            session_with(MemoryResource::new().with_attribute("LastGcInfo", Value::Null)).await;
        let name = resource();
        let resolver = PathResolver::new(session.as_ref(), &name, URL);
        assert_eq!(
            resolver.resolve(&path("LastGcInfo.last.duration")).await.unwrap(),
            Value::Null
        );
    }

    #[tokio::test]
    async fn test_open_type_is_unimplemented() {
        let (_server, session) = session_with(
            MemoryResource::new().with_attribute("Kind", Value::OpenType("TabularType".into())),
        )
        .await;
        let name = resource();
        let resolver = PathResolver::new(session.as_ref(), &name, URL);
        let err = resolver.resolve(&path("Kind.rows")).await.unwrap_err();
        assert!(matches!(err, PollError::Unimplemented(t) if t == "TabularType"));
    }

    #[tokio::test]
    async fn test_object_field_access() {
        let object = ObjectValue::new("com.example.Stats").with_field("hits", 3i64);
        let (_server, session) = session_with(
            MemoryResource::new().with_attribute("Stats", Value::Object(object)),
        )
        .await;
        let name = resource();
        let resolver = PathResolver::new(session.as_ref(), &name, URL);

        assert_eq!(resolver.resolve(&path("Stats.hits")).await.unwrap(), Value::Long(3));
        let err = resolver.resolve(&path("Stats.misses")).await.unwrap_err();
        assert!(matches!(err, PollError::NoSuchField { ref field, .. } if field == "misses"));
    }

    #[tokio::test]
    async fn test_primitive_has_no_fields() {
        let (_server, session) = session_with(MemoryResource::new().with_attribute("Count", 5i64)).await;
        let name = resource();
        let resolver = PathResolver::new(session.as_ref(), &name, URL);
        let err = resolver.resolve(&path("Count.value")).await.unwrap_err();
        assert_eq!(err.to_string(), "no field 'value' on Long value");
    }

    #[tokio::test]
    async fn test_resolve_all_keeps_order() {
        let (_server, session) = session_with(
            MemoryResource::new()
                .with_attribute("A", 1i64)
                .with_attribute("B", 2i64),
        )
        .await;
        let name = resource();
        let resolver = PathResolver::new(session.as_ref(), &name, URL);
        let values = resolver
            .resolve_all(&[path("B"), path("A")])
            .await
            .unwrap();
        assert_eq!(values, vec![Value::Long(2), Value::Long(1)]);
    }
}
