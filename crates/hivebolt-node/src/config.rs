use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use hivebolt_consensus::ValidatorInfo;
use hivebolt_core::config::ChainConfig;
use hivebolt_core::error::ChainError;
use hivebolt_core::types::{Address, Capability};
use hivebolt_vm::HardwareBridge;

fn default_listen_addr() -> String {
    "0.0.0.0:7440".into()
}
fn default_block_interval_ms() -> u64 {
    10_000
}

/// A device entry from the node's hardware roster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: u64,
    pub kind: DeviceKindConfig,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKindConfig {
    Sensor,
    Actuator,
}

/// A provisioning-time capability grant: which contract account may touch
/// which device. Must be identical across replicas.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub address: String,
    pub capability: CapabilityKindConfig,
    pub device_id: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKindConfig {
    ReadSensor,
    WriteActuator,
}

/// Full node configuration, loaded from a JSON file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Consensus parameters; must match across the network.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Hex-encoded 32-byte storage encryption key.
    pub storage_key: String,

    /// Hex-encoded secp256k1 secret key: P2P identity and, when this node
    /// is listed in the validator roster, its block-signing key.
    pub node_secret_key: String,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub peers: Vec<String>,

    /// PoA roster; identical on every node.
    #[serde(default)]
    pub validators: Vec<ValidatorInfo>,

    /// This node's validator id, when it should author blocks.
    #[serde(default)]
    pub validator_id: Option<String>,

    /// Address credited with block rewards when authoring; defaults to the
    /// node key's own address.
    #[serde(default)]
    pub miner_address: Option<String>,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub capabilities: Vec<CapabilityConfig>,

    /// Block production cadence when authoring.
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Decode the storage key; its size is validated by the storage layer.
    pub fn storage_key_bytes(&self) -> Result<Vec<u8>, ChainError> {
        hex::decode(self.storage_key.trim())
            .map_err(|e| ChainError::Corrupt(format!("storage_key hex: {e}")))
    }

    /// Build the hardware bridge from the device roster.
    pub fn hardware(&self) -> HardwareBridge {
        let mut bridge = HardwareBridge::new();
        for device in &self.devices {
            match device.kind {
                DeviceKindConfig::Sensor => bridge.register_sensor(device.device_id, 0),
                DeviceKindConfig::Actuator => bridge.register_actuator(device.device_id),
            }
        }
        bridge
    }

    /// Resolve the configured capability grants.
    pub fn capability_grants(&self) -> Result<Vec<(Address, Capability)>, ChainError> {
        self.capabilities
            .iter()
            .map(|grant| {
                let address = Address::from_str(&grant.address)?;
                let capability = match grant.capability {
                    CapabilityKindConfig::ReadSensor => Capability::ReadSensor(grant.device_id),
                    CapabilityKindConfig::WriteActuator => {
                        Capability::WriteActuator(grant.device_id)
                    }
                };
                Ok((address, capability))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let json = r#"{
            "storage_key": "0101010101010101010101010101010101010101010101010101010101010101",
            "node_secret_key": "02"
        }"#;
        let cfg: NodeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:7440");
        assert_eq!(cfg.chain.network_id, 1);
        assert!(cfg.validator_id.is_none());
        assert_eq!(cfg.storage_key_bytes().unwrap().len(), 32);
    }

    #[test]
    fn devices_and_capabilities_parse() {
        let json = r#"{
            "storage_key": "00",
            "node_secret_key": "00",
            "devices": [
                {"device_id": 100, "kind": "actuator"},
                {"device_id": 200, "kind": "sensor"}
            ],
            "capabilities": [
                {"address": "hb0000000000000000000000000000000000000000",
                 "capability": "write_actuator", "device_id": 100}
            ]
        }"#;
        let cfg: NodeConfig = serde_json::from_str(json).unwrap();
        let hw = cfg.hardware();
        assert!(hw.actuator_state(100).is_ok());
        assert!(hw.read_sensor(200).is_ok());

        let grants = cfg.capability_grants().unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].1, Capability::WriteActuator(100));
    }
}
