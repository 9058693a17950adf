use {
    super::NodeId,
    serde::{Deserialize, Serialize},
    std::collections::BTreeSet,
};

/// Set of nodes whose votes count towards a quorum.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingConfiguration(BTreeSet<NodeId>);

impl VotingConfiguration {
    pub fn new(ids: impl IntoIterator<Item = impl Into<NodeId>>) -> Self {
        Self(ids.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.0.contains(id)
    }

    pub fn contains_any<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>) -> bool {
        ids.into_iter().any(|id| self.0.contains(id))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.0.iter()
    }

    /// Whether the provided votes form a majority of this configuration.
    pub fn has_quorum<'a>(&self, votes: impl IntoIterator<Item = &'a NodeId>) -> bool {
        let granted = votes
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|id| self.0.contains(*id))
            .count();

        granted * 2 > self.0.len()
    }

    pub(crate) fn without<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>) -> Self {
        let mut new = self.clone();
        for id in ids {
            new.0.remove(id);
        }
        new
    }

    pub(crate) fn with<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>) -> Self {
        let mut new = self.clone();
        new.0.extend(ids.into_iter().cloned());
        new
    }
}

/// Voting configuration of the cluster and the nodes excluded from it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationMetadata {
    last_committed_config: VotingConfiguration,
    voting_config_exclusions: BTreeSet<NodeId>,
}

impl CoordinationMetadata {
    pub fn new(config: VotingConfiguration) -> Self {
        Self {
            last_committed_config: config,
            voting_config_exclusions: BTreeSet::new(),
        }
    }

    pub fn last_committed_config(&self) -> &VotingConfiguration {
        &self.last_committed_config
    }

    pub fn voting_config_exclusions(&self) -> &BTreeSet<NodeId> {
        &self.voting_config_exclusions
    }

    pub(crate) fn set_last_committed_config(&mut self, config: VotingConfiguration) {
        self.last_committed_config = config;
    }

    pub(crate) fn set_voting_config_exclusions(&mut self, exclusions: BTreeSet<NodeId>) {
        self.voting_config_exclusions = exclusions;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quorum() {
        let config = VotingConfiguration::new(["a", "b", "c", "d"]);
        let ids: Vec<NodeId> = ["a", "b", "c", "x"].into_iter().map(NodeId::from).collect();

        assert!(config.has_quorum(&ids[..3]));
        assert!(!config.has_quorum(&ids[..2]));

        // Unknown and duplicate votes don't count.
        assert!(!config.has_quorum([&ids[0], &ids[0], &ids[3]]));
        assert!(!VotingConfiguration::default().has_quorum(&ids));
    }
}
