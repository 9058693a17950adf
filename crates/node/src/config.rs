use {
    crate::logger::LogFormat,
    serde::{de::Error as _, Deserialize},
    std::{collections::BTreeMap, net::SocketAddr, path::PathBuf, time::Duration},
    zonal_core::{
        cluster::{Node, Roles},
        coordination::VOTING_CONFIG_EXCLUSION_TIMEOUT,
        decommission::{self, service::DRAIN_TIMEOUT},
        placement,
    },
};

const PREFIX: &str = "ZONAL_";
const PEER_PREFIX: &str = "ZONAL_PEER_";
const FORCE_PREFIX: &str = "ZONAL_FORCE_";
const FORCE_SUFFIX: &str = "_VALUES";

/// Local node config.
#[derive(Clone, Debug)]
pub struct Config {
    /// The local [`Node`]. It manages the cluster if it's
    /// cluster-manager-eligible.
    pub node: Node,

    /// Other members of the cluster, from `ZONAL_PEER_<ID>` variables.
    pub peers: Vec<Node>,

    /// Indices to allocate shards of.
    pub indices: Vec<IndexConfig>,

    /// Awareness attribute names, in the order they are evaluated.
    pub awareness_attributes: Vec<String>,

    /// Forced values per awareness attribute, from
    /// `ZONAL_FORCE_<NAME>_VALUES` variables.
    pub forced_values: BTreeMap<String, Vec<String>>,

    pub placement: placement::Settings,

    pub decommission: decommission::Config,

    /// How often in-flight shard recoveries get completed.
    pub recovery_interval: Duration,

    /// Address of the admin HTTP server.
    pub admin_addr: SocketAddr,

    pub log_format: LogFormat,

    /// Log into this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexConfig {
    pub name: String,
    pub shards: u32,
    pub replicas: u32,
}

impl Config {
    pub fn from_env() -> envy::Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Builds the [`Config`] out of `(key, value)` pairs of environment
    /// variables.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> envy::Result<Self> {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let raw: RawConfig = envy::prefixed(PREFIX).from_iter(vars.iter().cloned())?;

        if raw.node_id.is_empty() {
            return Err(envy::Error::custom("Node ID is empty"));
        }

        let roles = match raw.node_roles {
            Some(roles) => parse_roles(roles.iter().map(String::as_str)),
            None => Ok(Roles::CLUSTER_MANAGER | Roles::DATA),
        }
        .map_err(envy::Error::custom)?;

        let node = raw
            .node_attributes
            .unwrap_or_default()
            .iter()
            .map(|attr| parse_attribute(attr))
            .try_fold(Node::new(raw.node_id.as_str(), roles), |node, attr| {
                attr.map(|(name, value)| node.with_attribute(name, value))
            })
            .map_err(envy::Error::custom)?;

        let indices: Vec<IndexConfig> = raw
            .indices
            .unwrap_or_default()
            .iter()
            .map(|s| parse_index(s))
            .collect::<Result<_, _>>()
            .map_err(envy::Error::custom)?;

        let admin_addr = raw
            .admin_addr
            .as_deref()
            .unwrap_or("0.0.0.0:9200")
            .parse::<SocketAddr>()
            .map_err(|err| envy::Error::custom(format!("Invalid admin address: {err}")))?;

        let defaults = placement::Settings::default();

        Ok(Self {
            peers: peers_from_vars(&vars)?,
            forced_values: forced_values_from_vars(&vars),
            node,
            indices,
            awareness_attributes: raw.awareness_attributes.unwrap_or_default(),
            placement: placement::Settings {
                skewness_limit: raw.skewness_limit,
                forced_allocation_disable: raw.forced_allocation_disable.unwrap_or(false),
                node_concurrent_recoveries: raw
                    .node_concurrent_recoveries
                    .unwrap_or(defaults.node_concurrent_recoveries),
            },
            decommission: decommission::Config {
                drain_timeout: raw
                    .drain_timeout
                    .map(Duration::from_millis)
                    .unwrap_or(DRAIN_TIMEOUT),
                voting_exclusion_timeout: raw
                    .voting_exclusion_timeout
                    .map(Duration::from_millis)
                    .unwrap_or(VOTING_CONFIG_EXCLUSION_TIMEOUT),
            },
            recovery_interval: Duration::from_millis(raw.recovery_interval.unwrap_or(1000)),
            admin_addr,
            log_format: raw.log_format.unwrap_or_default(),
            log_file: raw.log_file,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    node_id: String,
    node_roles: Option<Vec<String>>,
    node_attributes: Option<Vec<String>>,
    indices: Option<Vec<String>>,
    awareness_attributes: Option<Vec<String>>,
    skewness_limit: Option<usize>,
    forced_allocation_disable: Option<bool>,
    node_concurrent_recoveries: Option<usize>,
    drain_timeout: Option<u64>,
    voting_exclusion_timeout: Option<u64>,
    recovery_interval: Option<u64>,
    admin_addr: Option<String>,
    log_format: Option<LogFormat>,
    log_file: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
enum ParseError {
    #[error("Invalid node role: {0}")]
    Role(String),

    #[error("Invalid node attribute, expected `name=value`: {0}")]
    Attribute(String),

    #[error("Invalid index, expected `name:shards:replicas`: {0}")]
    Index(String),

    #[error("Invalid peer {0}: {1}")]
    Peer(String, Box<ParseError>),
}

fn parse_roles<'a>(roles: impl IntoIterator<Item = &'a str>) -> Result<Roles, ParseError> {
    roles.into_iter().try_fold(Roles::empty(), |acc, role| {
        Ok(acc
            | match role.trim() {
                "cluster_manager" => Roles::CLUSTER_MANAGER,
                "data" => Roles::DATA,
                other => return Err(ParseError::Role(other.to_string())),
            })
    })
}

fn parse_attribute(s: &str) -> Result<(String, String), ParseError> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() && !value.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ParseError::Attribute(s.to_string())),
    }
}

fn parse_index(s: &str) -> Result<IndexConfig, ParseError> {
    let err = || ParseError::Index(s.to_string());

    let mut parts = s.split(':');
    let (Some(name), Some(shards), Some(replicas), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(err());
    };

    if name.is_empty() {
        return Err(err());
    }

    Ok(IndexConfig {
        name: name.to_string(),
        shards: shards.parse().map_err(|_| err())?,
        replicas: replicas.parse().map_err(|_| err())?,
    })
}

/// Parses a peer out of `<roles>;<attributes>`, both being comma separated
/// lists. E.g. `cluster_manager,data;zone=zone_2`.
fn parse_peer(id: &str, s: &str) -> Result<Node, ParseError> {
    let (roles, attributes) = s.split_once(';').unwrap_or((s, ""));

    let roles = parse_roles(roles.split(',').filter(|r| !r.trim().is_empty()))?;

    attributes
        .split(',')
        .filter(|a| !a.trim().is_empty())
        .map(parse_attribute)
        .try_fold(Node::new(id, roles), |node, attr| {
            attr.map(|(name, value)| node.with_attribute(name, value))
        })
}

fn peers_from_vars(vars: &[(String, String)]) -> envy::Result<Vec<Node>> {
    vars.iter()
        .filter_map(|(key, val)| {
            let id = key.strip_prefix(PEER_PREFIX)?;

            Some(
                parse_peer(id, val)
                    .map_err(|err| ParseError::Peer(id.to_string(), Box::new(err)))
                    .map_err(envy::Error::custom),
            )
        })
        .collect()
}

/// Attribute names are lowercased, values are kept as is.
fn forced_values_from_vars(vars: &[(String, String)]) -> BTreeMap<String, Vec<String>> {
    vars.iter()
        .filter_map(|(key, val)| {
            let name = key.strip_prefix(FORCE_PREFIX)?.strip_suffix(FORCE_SUFFIX)?;

            let values = val
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
                .collect();

            Some((name.to_lowercase(), values))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use {super::*, rstest::rstest};

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn full_config() {
        let cfg = Config::from_vars(vars(&[
            ("ZONAL_NODE_ID", "zone_1-node0"),
            ("ZONAL_NODE_ATTRIBUTES", "zone=zone_1,rack=r1"),
            ("ZONAL_INDICES", "idx:3:1,logs:1:0"),
            ("ZONAL_AWARENESS_ATTRIBUTES", "zone,rack"),
            ("ZONAL_FORCE_ZONE_VALUES", "zone_1, zone_2,zone_3"),
            ("ZONAL_PEER_zone_2-node0", "cluster_manager,data;zone=zone_2,rack=r2"),
            ("ZONAL_PEER_zone_3-node0", "data;zone=zone_3"),
            ("ZONAL_SKEWNESS_LIMIT", "1"),
            ("ZONAL_FORCED_ALLOCATION_DISABLE", "true"),
            ("ZONAL_NODE_CONCURRENT_RECOVERIES", "4"),
            ("ZONAL_DRAIN_TIMEOUT", "5000"),
            ("ZONAL_ADMIN_ADDR", "127.0.0.1:9300"),
            ("ZONAL_LOG_FORMAT", "json"),
            ("UNRELATED", "x"),
        ]))
        .unwrap();

        assert_eq!(cfg.node.id().as_str(), "zone_1-node0");
        assert!(cfg.node.is_cluster_manager_eligible() && cfg.node.is_data());
        assert_eq!(cfg.node.attribute("zone"), Some("zone_1"));
        assert_eq!(cfg.node.attribute("rack"), Some("r1"));

        assert_eq!(cfg.indices, vec![
            IndexConfig {
                name: "idx".into(),
                shards: 3,
                replicas: 1
            },
            IndexConfig {
                name: "logs".into(),
                shards: 1,
                replicas: 0
            },
        ]);
        assert_eq!(cfg.awareness_attributes, ["zone", "rack"]);
        assert_eq!(
            cfg.forced_values,
            BTreeMap::from([("zone".to_string(), vec![
                "zone_1".to_string(),
                "zone_2".to_string(),
                "zone_3".to_string()
            ])])
        );

        assert_eq!(cfg.peers.len(), 2);
        let data_only = cfg
            .peers
            .iter()
            .find(|p| p.id().as_str() == "zone_3-node0")
            .unwrap();
        assert!(!data_only.is_cluster_manager_eligible());
        assert_eq!(data_only.attribute("zone"), Some("zone_3"));

        assert_eq!(cfg.placement, placement::Settings {
            skewness_limit: Some(1),
            forced_allocation_disable: true,
            node_concurrent_recoveries: 4,
        });
        assert_eq!(cfg.decommission.drain_timeout, Duration::from_secs(5));
        assert_eq!(cfg.admin_addr, "127.0.0.1:9300".parse().unwrap());
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn defaults() {
        let cfg = Config::from_vars(vars(&[("ZONAL_NODE_ID", "n1")])).unwrap();

        assert!(cfg.peers.is_empty());
        assert!(cfg.indices.is_empty());
        assert!(cfg.awareness_attributes.is_empty());
        assert!(cfg.forced_values.is_empty());
        assert_eq!(cfg.placement, placement::Settings::default());
        assert_eq!(cfg.decommission.drain_timeout, DRAIN_TIMEOUT);
        assert_eq!(
            cfg.decommission.voting_exclusion_timeout,
            VOTING_CONFIG_EXCLUSION_TIMEOUT
        );
        assert_eq!(cfg.recovery_interval, Duration::from_secs(1));
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[rstest]
    #[case::missing_id(&[])]
    #[case::empty_id(&[("ZONAL_NODE_ID", "")])]
    #[case::bad_role(&[("ZONAL_NODE_ID", "n1"), ("ZONAL_NODE_ROLES", "ingest")])]
    #[case::bad_attribute(&[("ZONAL_NODE_ID", "n1"), ("ZONAL_NODE_ATTRIBUTES", "zone")])]
    #[case::bad_index(&[("ZONAL_NODE_ID", "n1"), ("ZONAL_INDICES", "idx:x:1")])]
    #[case::bad_peer(&[("ZONAL_NODE_ID", "n1"), ("ZONAL_PEER_n2", "data;zone=")])]
    #[case::bad_addr(&[("ZONAL_NODE_ID", "n1"), ("ZONAL_ADMIN_ADDR", "localhost")])]
    fn invalid(#[case] pairs: &[(&str, &str)]) {
        assert!(Config::from_vars(vars(pairs)).is_err());
    }

    #[test]
    fn peers_without_attributes() {
        assert_eq!(
            parse_peer("n2", "cluster_manager").unwrap(),
            Node::new("n2", Roles::CLUSTER_MANAGER)
        );
        assert_eq!(
            parse_peer("n3", ";zone=z").unwrap(),
            Node::new("n3", Roles::empty()).with_attribute("zone", "z")
        );
    }
}
