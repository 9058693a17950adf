use {
    crate::settings::Setting,
    futures::Stream,
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, sync::Arc},
};

/// Locality labels the cluster spreads shard copies across.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessAttributes {
    names: Vec<String>,
    forced: BTreeMap<String, Vec<String>>,
}

impl AwarenessAttributes {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            forced: BTreeMap::new(),
        }
    }

    /// Declares the legal values of the `name` attribute.
    pub fn with_forced_values(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if !values.is_empty() {
            self.forced.insert(name.into(), values);
        }
        self
    }

    /// Configured attribute names, in evaluation order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Returns the forced values of the `name` attribute, if the attribute is
    /// forced.
    pub fn forced_values(&self, name: &str) -> Option<&[String]> {
        self.forced.get(name).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Live registry of [`AwarenessAttributes`].
///
/// Updates are last-writer-wins swaps of the whole snapshot, so a reader
/// never observes a half-applied change.
#[derive(Clone, Debug, Default)]
pub struct AttributeCatalog {
    attributes: Setting<AwarenessAttributes>,
}

impl AttributeCatalog {
    pub fn new(attributes: AwarenessAttributes) -> Self {
        Self {
            attributes: Setting::new(attributes),
        }
    }

    /// Replaces the list of awareness attribute names.
    pub fn set_attributes(&self, names: impl IntoIterator<Item = impl Into<String>>) {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        self.attributes.update(|current| AwarenessAttributes {
            names: names.clone(),
            forced: current.forced.clone(),
        });

        tracing::info!(?names, "awareness attributes updated");
    }

    /// Replaces all forced value groups. Groups without values are dropped.
    pub fn set_forced_values<I, V>(&self, groups: I)
    where
        I: IntoIterator<Item = (String, V)>,
        V: IntoIterator<Item = String>,
    {
        let forced: BTreeMap<String, Vec<String>> = groups
            .into_iter()
            .map(|(name, values)| (name, values.into_iter().collect::<Vec<_>>()))
            .filter(|(_, values)| !values.is_empty())
            .collect();

        self.attributes.update(|current| AwarenessAttributes {
            names: current.names.clone(),
            forced: forced.clone(),
        });

        tracing::info!(?forced, "forced awareness values updated");
    }

    /// Returns the current [`AwarenessAttributes`] snapshot.
    pub fn snapshot(&self) -> Arc<AwarenessAttributes> {
        self.attributes.get()
    }

    pub fn subscribe(&self) -> impl Stream<Item = ()> + Send + 'static {
        self.attributes.updates()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_forced_groups_are_dropped() {
        let catalog = AttributeCatalog::new(AwarenessAttributes::new(["zone", "rack"]));

        catalog.set_forced_values([
            ("zone".to_string(), vec!["a".to_string(), "b".to_string()]),
            ("rack".to_string(), vec![]),
        ]);

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.names(), ["zone", "rack"]);
        assert_eq!(snapshot.forced_values("zone"), Some(["a".to_string(), "b".to_string()].as_slice()));
        assert_eq!(snapshot.forced_values("rack"), None);
    }

    #[test]
    fn updates_keep_the_other_half() {
        let catalog = AttributeCatalog::new(
            AwarenessAttributes::new(["zone"]).with_forced_values("zone", ["a", "b"]),
        );
        let before = catalog.snapshot();

        catalog.set_attributes(["zone", "rack"]);

        let after = catalog.snapshot();
        assert!(after.is_configured("rack"));
        assert_eq!(after.forced_values("zone").map(<[_]>::len), Some(2));

        // Earlier snapshots are immutable.
        assert!(!before.is_configured("rack"));
    }
}
