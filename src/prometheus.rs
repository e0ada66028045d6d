use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_files: Option<Vec<String>>,
    pub scrape_configs: Vec<ScrapeConfig>,
    pub alerting: AlertingConfig,
}

#[derive(Debug, Serialize)]
pub struct GlobalConfig {
    #[serde(with = "humantime_serde")]
    pub scrape_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub evaluation_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub scrape_timeout: Duration,
}

#[derive(Debug, Serialize)]
pub struct ScrapeConfig {
    pub job_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, Vec<String>>>,
    pub static_configs: Vec<StaticConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relabel_configs: Option<Vec<RelabelConfig>>,
}

impl ScrapeConfig {
    /// A plain scrape job polling a fixed set of targets.
    pub fn with_static_targets(job_name: impl Into<String>, targets: &[&str]) -> Self {
        ScrapeConfig {
            job_name: job_name.into(),
            metrics_path: None,
            params: None,
            static_configs: vec![StaticConfig {
                targets: targets.iter().map(|target| target.to_string()).collect(),
            }],
            relabel_configs: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StaticConfig {
    pub targets: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RelabelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_labels: Option<Vec<String>>,
    pub target_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AlertingConfig {
    pub alertmanagers: Vec<AlertmanagerConfig>,
}

#[derive(Debug, Serialize)]
pub struct AlertmanagerConfig {
    pub static_configs: Vec<StaticConfig>,
}
