use serde::{Deserialize, Serialize};
use tetroduel::network;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { address: default_address() }
    }
}

fn default_address() -> String {
    format!("0.0.0.0:{}", network::PORT)
}
