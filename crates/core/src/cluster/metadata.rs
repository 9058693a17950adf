//! Typed extension entries of the cluster state.

use {
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    std::{any::Any, collections::BTreeMap, fmt, sync::Arc},
};

/// Version of the persisted/transmitted state format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl ProtocolVersion {
    pub const CURRENT: Self = Self::new(2, 4, 0);

    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Custom entry stored in the cluster [`Metadata`].
pub trait Custom:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Name the entry is registered under.
    const TYPE: &'static str;

    /// Oldest protocol version able to understand the entry.
    const MIN_SUPPORTED_VERSION: ProtocolVersion;
}

/// Object-safe view of a [`Custom`] entry.
pub trait AnyCustom: fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn min_supported_version(&self) -> ProtocolVersion;
    fn encode(&self) -> Result<Vec<u8>, postcard::Error>;
    fn as_any(&self) -> &dyn Any;
    fn eq_any(&self, other: &dyn AnyCustom) -> bool;
}

impl<T: Custom> AnyCustom for T {
    fn name(&self) -> &'static str {
        T::TYPE
    }

    fn min_supported_version(&self) -> ProtocolVersion {
        T::MIN_SUPPORTED_VERSION
    }

    fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_any(&self, other: &dyn AnyCustom) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }
}

/// Map of [`Custom`] entries keyed by their [`Custom::TYPE`].
///
/// Entries are shared between state versions and replaced wholesale.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    customs: BTreeMap<&'static str, Arc<dyn AnyCustom>>,
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        self.customs.len() == other.customs.len()
            && self
                .customs
                .iter()
                .zip(&other.customs)
                .all(|((a_name, a), (b_name, b))| a_name == b_name && a.eq_any(b.as_ref()))
    }
}

impl Metadata {
    pub fn custom<T: Custom>(&self) -> Option<&T> {
        self.customs
            .get(T::TYPE)
            .and_then(|c| c.as_any().downcast_ref::<T>())
    }

    pub fn customs(&self) -> impl Iterator<Item = &dyn AnyCustom> {
        self.customs.values().map(|c| &**c)
    }

    pub(crate) fn put_custom<T: Custom>(&mut self, value: T) {
        self.customs.insert(T::TYPE, Arc::new(value));
    }

    pub(crate) fn put_any(&mut self, value: Arc<dyn AnyCustom>) {
        self.customs.insert(value.name(), value);
    }

    pub(crate) fn remove_custom<T: Custom>(&mut self) -> bool {
        self.customs.remove(T::TYPE).is_some()
    }
}

type Decoder = fn(&[u8]) -> Result<Arc<dyn AnyCustom>, postcard::Error>;

fn decode<T: Custom>(bytes: &[u8]) -> Result<Arc<dyn AnyCustom>, postcard::Error> {
    Ok(Arc::new(postcard::from_bytes::<T>(bytes)?))
}

/// [`Custom`] entry types known to the local node.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    decoders: BTreeMap<&'static str, Decoder>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Custom>(mut self) -> Self {
        self.decoders.insert(T::TYPE, decode::<T>);
        self
    }

    pub(crate) fn decoder(&self, name: &str) -> Option<Decoder> {
        self.decoders.get(name).copied()
    }
}
