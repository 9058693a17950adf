use {
    super::{ConflictError, DecommissionAttribute, DecommissionStatus},
    crate::cluster::{metadata::Custom, ProtocolVersion},
    serde::{
        de::{self, MapAccess, Visitor},
        ser::SerializeMap,
        Deserialize,
        Deserializer,
        Serialize,
        Serializer,
    },
    std::fmt,
};

/// Decommission record persisted in the cluster state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecommissionMetadata {
    attribute: DecommissionAttribute,
    status: DecommissionStatus,
}

impl Custom for DecommissionMetadata {
    const TYPE: &'static str = "decommissionedAttribute";
    const MIN_SUPPORTED_VERSION: ProtocolVersion = ProtocolVersion::new(2, 3, 0);
}

impl DecommissionMetadata {
    /// Creates a new record in [`DecommissionStatus::Init`].
    pub fn new(attribute: DecommissionAttribute) -> Self {
        Self {
            attribute,
            status: DecommissionStatus::Init,
        }
    }

    pub fn attribute(&self) -> &DecommissionAttribute {
        &self.attribute
    }

    pub fn status(&self) -> DecommissionStatus {
        self.status
    }

    pub fn with_status(&self, status: DecommissionStatus) -> Self {
        Self {
            attribute: self.attribute.clone(),
            status,
        }
    }

    /// Same attribute name with a new value. Restarts from
    /// [`DecommissionStatus::Init`].
    pub fn with_attribute_value(&self, value: impl Into<String>) -> Self {
        Self::new(DecommissionAttribute::new(self.attribute.name(), value))
    }

    /// Rejects a new decommission of `requested` while this record blocks
    /// it.
    pub(super) fn ensure_no_inflight(
        &self,
        requested: &DecommissionAttribute,
    ) -> Result<(), ConflictError> {
        match self.status {
            DecommissionStatus::Failed => Ok(()),
            DecommissionStatus::Successful => Err(ConflictError::AlreadyDecommissioned(
                self.attribute.clone(),
            )),
            DecommissionStatus::Init | DecommissionStatus::InProgress => {
                tracing::debug!(registered = %self.attribute, %requested, "in-flight decommission");
                Err(ConflictError::InFlight(self.attribute.clone()))
            }
        }
    }
}

// `{"awareness": {"<name>": "<value>"}, "status": "<status>"}`
impl Serialize for DecommissionMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Awareness<'a>(&'a DecommissionAttribute);

        impl Serialize for Awareness<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(self.0.name(), self.0.value())?;
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("awareness", &Awareness(&self.attribute))?;
        map.serialize_entry("status", &self.status)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for DecommissionMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AwarenessVisitor;

        impl<'de> Visitor<'de> for AwarenessVisitor {
            type Value = DecommissionAttribute;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single awareness attribute")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let (name, value) = map
                    .next_entry::<String, String>()?
                    .ok_or_else(|| de::Error::custom("awareness attribute is missing"))?;

                if map.next_key::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom("expected a single awareness attribute"));
                }

                Ok(DecommissionAttribute::new(name, value))
            }
        }

        struct Awareness(DecommissionAttribute);

        impl<'de> Deserialize<'de> for Awareness {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_map(AwarenessVisitor).map(Awareness)
            }
        }

        struct MetadataVisitor;

        impl<'de> Visitor<'de> for MetadataVisitor {
            type Value = DecommissionMetadata;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("decommission metadata")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut attribute = None;
                let mut status = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "awareness" => attribute = Some(map.next_value::<Awareness>()?.0),
                        "status" => status = Some(map.next_value::<DecommissionStatus>()?),
                        other => return Err(de::Error::unknown_field(other, &["awareness", "status"])),
                    }
                }

                Ok(DecommissionMetadata {
                    attribute: attribute.ok_or_else(|| de::Error::missing_field("awareness"))?,
                    status: status.ok_or_else(|| de::Error::missing_field("status"))?,
                })
            }
        }

        deserializer.deserialize_map(MetadataVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_shape() {
        let metadata = DecommissionMetadata::new(DecommissionAttribute::new("zone", "zone_1"))
            .with_status(DecommissionStatus::InProgress);

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "awareness": { "zone": "zone_1" }, "status": "in_progress" })
        );
        assert_eq!(serde_json::from_value::<DecommissionMetadata>(json).unwrap(), metadata);

        let err = serde_json::from_str::<DecommissionMetadata>(r#"{"awareness": {}, "status": "init"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn value_change_restarts() {
        let metadata = DecommissionMetadata::new(DecommissionAttribute::new("zone", "zone_1"))
            .with_status(DecommissionStatus::Failed)
            .with_attribute_value("zone_2");

        assert_eq!(metadata.attribute(), &DecommissionAttribute::new("zone", "zone_2"));
        assert_eq!(metadata.status(), DecommissionStatus::Init);
    }
}
