//! Cluster snapshot machinery.

use {
    super::{
        metadata::{ProtocolVersion, Registry},
        ClusterState,
        CoordinationMetadata,
        Metadata,
        Nodes,
        RoutingTable,
        Version,
    },
    serde::{Deserialize, Serialize},
    std::borrow::Cow,
};

/// Snapshot of a [`ClusterState`] suitable for network transmission and
/// persistent storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<'a> {
    version: Version,
    nodes: Cow<'a, Nodes>,
    coordination: Cow<'a, CoordinationMetadata>,
    routing_table: Cow<'a, RoutingTable>,
    customs: Vec<CustomEntry>,
}

/// Encoded custom metadata entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CustomEntry {
    name: String,
    min_supported_version: ProtocolVersion,
    payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Codec: {0}")]
    Codec(#[from] postcard::Error),
}

impl Snapshot<'_> {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Snapshot<'static>, Error> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

impl ClusterState {
    /// Builds a [`Snapshot`] of this [`ClusterState`] for a peer speaking
    /// `peer_version`.
    ///
    /// Custom entries the peer doesn't support are left out.
    pub fn snapshot(&self, peer_version: ProtocolVersion) -> Result<Snapshot<'_>, Error> {
        let customs = self
            .metadata
            .customs()
            .filter(|c| c.min_supported_version() <= peer_version)
            .map(|c| {
                Ok(CustomEntry {
                    name: c.name().to_string(),
                    min_supported_version: c.min_supported_version(),
                    payload: c.encode()?,
                })
            })
            .collect::<Result<_, Error>>()?;

        Ok(Snapshot {
            version: self.version,
            nodes: Cow::Borrowed(&self.nodes),
            coordination: Cow::Borrowed(&self.coordination),
            routing_table: Cow::Borrowed(&self.routing_table),
            customs,
        })
    }

    /// Re-constructs a [`ClusterState`] out of the provided [`Snapshot`].
    ///
    /// Custom entries unknown to the `registry`, or requiring a newer
    /// protocol version than the local one, are skipped.
    pub fn from_snapshot(s: Snapshot<'_>, registry: &Registry) -> Result<Self, Error> {
        let mut metadata = Metadata::default();

        for entry in s.customs {
            if entry.min_supported_version > ProtocolVersion::CURRENT {
                tracing::warn!(
                    name = %entry.name,
                    version = %entry.min_supported_version,
                    "skipping custom metadata of a newer protocol version"
                );
                continue;
            }

            let Some(decode) = registry.decoder(&entry.name) else {
                tracing::warn!(name = %entry.name, "skipping unknown custom metadata");
                continue;
            };

            metadata.put_any(decode(&entry.payload)?);
        }

        Ok(Self {
            version: s.version,
            nodes: s.nodes.into_owned(),
            coordination: s.coordination.into_owned(),
            routing_table: s.routing_table.into_owned(),
            metadata,
        })
    }
}
