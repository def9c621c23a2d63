use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::executor_client::{ExecutorClient, HttpExecutorClient};

/// Gateway configuration, read from a supergraph YAML file.
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    pub subgraphs: BTreeMap<String, SubgraphConfig>,
}

#[derive(Debug, Deserialize)]
pub struct SubgraphConfig {
    pub routing_url: String,
    /// Sent with every request to this subgraph.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3000))
}

impl GatewayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading gateway config");
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_yaml::from_str(contents)?;
        for (name, subgraph) in &config.subgraphs {
            if reqwest::Url::parse(&subgraph.routing_url).is_err() {
                return Err(ConfigError::InvalidUrl {
                    subgraph: name.clone(),
                    url: subgraph.routing_url.clone(),
                });
            }
        }
        Ok(config)
    }

    /// One HTTP client per subgraph.
    pub fn clients(&self) -> HashMap<String, Arc<dyn ExecutorClient>> {
        self.subgraphs
            .iter()
            .map(|(name, subgraph)| {
                let client = HttpExecutorClient::new(subgraph.routing_url.clone())
                    .with_headers(subgraph.headers.clone());
                (name.clone(), Arc::new(client) as Arc<dyn ExecutorClient>)
            })
            .collect()
    }
}
