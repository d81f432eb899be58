//! Deployment settings: endpoints, signer, contracts and price feed.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use keeper_chain::ContractAddresses;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where and with what the keeper runs.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub chain_id: u64,
    pub rpc: RpcUrls,
    /// Hex private key of the keeper account.
    pub signer_private_key: String,
    pub contracts: DeploymentContracts,
    pub oracle: OracleEndpoint,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcUrls {
    pub http: String,
    pub ws: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentContracts {
    pub liquidation_module: String,
    pub leverage_module: String,
    pub viewer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleEndpoint {
    pub hermes_url: String,
    pub price_feed_id: String,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/positions.json")
}

impl std::fmt::Debug for DeploymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentConfig")
            .field("chain_id", &self.chain_id)
            .field("rpc", &self.rpc)
            .field("signer_private_key", &"<redacted>")
            .field("contracts", &self.contracts)
            .field("oracle", &self.oracle)
            .field("store_path", &self.store_path)
            .finish()
    }
}

impl DeploymentConfig {
    /// Load from TOML, expanding `${VAR}` placeholders in string fields.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.expand_env_vars();
        Ok(config)
    }

    /// Build from the keeper's environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| lookup(name).ok_or_else(|| anyhow::anyhow!("missing environment variable {name}"));

        let chain_id = required("CHAIN_ID")?
            .trim()
            .parse()
            .context("CHAIN_ID must be an integer")?;

        Ok(Self {
            chain_id,
            rpc: RpcUrls {
                http: required("PROVIDER_HTTPS_URL")?,
                ws: required("PROVIDER_WSS_URL")?,
            },
            signer_private_key: required("SIGNER_WALLET_PK")?,
            contracts: DeploymentContracts {
                liquidation_module: required("LIQUIDATION_MODULE_CONTRACT_ADDRESS")?,
                leverage_module: required("LEVERAGE_MODULE_CONTRACT_ADDRESS")?,
                viewer: required("VIEWER_CONTRACT_ADDRESS")?,
            },
            oracle: OracleEndpoint {
                hermes_url: required("PYTH_NETWORK_PRICE_SERVCE_URI")?,
                price_feed_id: required("PYTH_NETWORK_ETH_USD_PRICE_ID")?,
            },
            store_path: lookup("POSITION_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_store_path),
        })
    }

    /// `KEEPER_DEPLOYMENT` file if set, otherwise the environment.
    pub fn load() -> Result<Self> {
        match std::env::var("KEEPER_DEPLOYMENT") {
            Ok(path) => Self::from_file(&path),
            Err(_) => Self::from_env(),
        }
    }

    fn expand_env_vars(&mut self) {
        self.rpc.http = expand_env(&self.rpc.http);
        self.rpc.ws = expand_env(&self.rpc.ws);
        self.signer_private_key = expand_env(&self.signer_private_key);
        self.contracts.liquidation_module = expand_env(&self.contracts.liquidation_module);
        self.contracts.leverage_module = expand_env(&self.contracts.leverage_module);
        self.contracts.viewer = expand_env(&self.contracts.viewer);
        self.oracle.hermes_url = expand_env(&self.oracle.hermes_url);
        self.oracle.price_feed_id = expand_env(&self.oracle.price_feed_id);
    }

    /// Parsed contract addresses.
    pub fn addresses(&self) -> Result<ContractAddresses> {
        Ok(ContractAddresses {
            liquidation_module: parse_address("liquidation_module", &self.contracts.liquidation_module)?,
            leverage_module: parse_address("leverage_module", &self.contracts.leverage_module)?,
            viewer: parse_address("viewer", &self.contracts.viewer)?,
        })
    }
}

fn parse_address(name: &str, value: &str) -> Result<Address> {
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid {name} address: {value}"))
}

/// Expand ${VAR_NAME} patterns with environment variable values.
fn expand_env(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };
    let mut result = s.to_string();

    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }

    result
}
