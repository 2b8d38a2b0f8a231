use std::collections::HashMap;

use logship_core::{LoadConfiguration, LogShipConfig};
use logship_engine::{BackendConfig, CloudBackend, LocalBackend};
use serde::{Deserialize, Serialize};

/// Agent configuration file: engine settings plus the object store sealed files go to.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AgentConfig {
    pub(crate) engine: LoadConfiguration,
    /// No cloud section means no uploader is attached; files stay pending locally.
    pub(crate) cloud: Option<CloudConfig>,
}

/// Cloud configuration enum (tagged by `backend`)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "backend")]
pub(crate) enum CloudConfig {
    #[serde(rename = "memory")]
    Memory { root: String },
    #[serde(rename = "fs")]
    Fs { root: String },
    #[serde(rename = "s3")]
    S3 {
        root: String,
        region: Option<String>,
        endpoint: Option<String>,
        access_key: Option<String>,
        secret_key: Option<String>,
    },
    #[serde(rename = "gcs")]
    Gcs {
        root: String,
        endpoint: Option<String>,
        credential_file: Option<String>,
    },
}

impl AgentConfig {
    pub(crate) fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Split into the engine configuration and the optional backend.
    pub(crate) fn into_parts(
        self,
    ) -> Result<(LogShipConfig, Option<BackendConfig>), logship_core::ConfigError> {
        let backend = self.cloud.as_ref().map(BackendConfig::from);
        let engine: LogShipConfig = self.engine.try_into()?;
        Ok((engine, backend))
    }
}

fn insert_opt(options: &mut HashMap<String, String>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        options.insert(key.into(), v.clone());
    }
}

impl From<&CloudConfig> for BackendConfig {
    fn from(cfg: &CloudConfig) -> Self {
        match cfg {
            CloudConfig::Memory { root } => BackendConfig::Local {
                backend: LocalBackend::Memory,
                root: root.clone(),
            },
            CloudConfig::Fs { root } => BackendConfig::Local {
                backend: LocalBackend::Fs,
                root: root.clone(),
            },
            CloudConfig::S3 {
                root,
                region,
                endpoint,
                access_key,
                secret_key,
            } => {
                let mut options: HashMap<String, String> = HashMap::new();
                insert_opt(&mut options, "region", region);
                insert_opt(&mut options, "endpoint", endpoint);
                insert_opt(&mut options, "access_key", access_key);
                insert_opt(&mut options, "secret_key", secret_key);
                BackendConfig::Cloud {
                    backend: CloudBackend::S3,
                    root: root.clone(),
                    options,
                }
            }
            CloudConfig::Gcs {
                root,
                endpoint,
                credential_file,
            } => {
                let mut options: HashMap<String, String> = HashMap::new();
                insert_opt(&mut options, "endpoint", endpoint);
                insert_opt(&mut options, "credential_file", credential_file);
                BackendConfig::Cloud {
                    backend: CloudBackend::Gcs,
                    root: root.clone(),
                    options,
                }
            }
        }
    }
}
