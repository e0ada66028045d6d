use crate::prometheus::{
    AlertingConfig, AlertmanagerConfig, Config, GlobalConfig, RelabelConfig, ScrapeConfig,
    StaticConfig,
};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// The prometheus instance itself.
const PROMETHEUS_TARGET: &str = "localhost:9090";

/// Alertmanager, both scraped and used as the alert receiver.
const ALERTMANAGER_TARGET: &str = "alertmanager:9093";

/// The edit-set health checker.
const CHECKER_TARGET: &str = "checker:8090";

/// The blackbox exporter that performs reachability probes on our behalf.
const BLACKBOX_EXPORTER_TARGET: &str = "blackbox-exporter:9115";

/// Public sites probed for an HTTP 200.
const PROBED_SITES: [&str; 5] = [
    "cluebotng.toolforge.org",
    "cluebotng-review.toolforge.org",
    "cluebotng-editsets.toolforge.org",
    "cluebotng-staging.toolforge.org",
    "cluebotng-trainer.toolforge.org",
];

/// Build the configuration document handed to prometheus at launch.
///
/// The scrape jobs and alerting sink are fixed; the only filesystem input is
/// `rules_dir`, which is scanned for alerting/recording rule files. A scan
/// failure (missing directory, permissions) is fatal.
///
/// Most application metrics are pushed into prometheus over remote write, so
/// the job list below only covers the monitoring stack itself plus the
/// external reachability probes.
pub fn generate_configuration(rules_dir: &Path) -> Result<Config> {
    let global = GlobalConfig {
        scrape_interval: Duration::from_secs(60),
        evaluation_interval: Duration::from_secs(60),
        scrape_timeout: Duration::from_secs(10),
    };

    let scrape_configs = vec![
        ScrapeConfig::with_static_targets("prometheus", &[PROMETHEUS_TARGET]),
        ScrapeConfig::with_static_targets("alertmanager", &[ALERTMANAGER_TARGET]),
        ScrapeConfig::with_static_targets("checker", &[CHECKER_TARGET]),
        blackbox_probes(),
        ScrapeConfig::with_static_targets("blackbox_exporter", &[BLACKBOX_EXPORTER_TARGET]),
    ];

    let alerting = AlertingConfig {
        alertmanagers: vec![AlertmanagerConfig {
            static_configs: vec![StaticConfig {
                targets: vec![ALERTMANAGER_TARGET.to_string()],
            }],
        }],
    };

    Ok(Config {
        global,
        rule_files: discover_rule_files(rules_dir)?,
        scrape_configs,
        alerting,
    })
}

/// Collect the absolute paths of all `.yml` rule files in `rules_dir`.
///
/// Returns `None` when nothing matched, so the `rule_files` key is omitted
/// from the document entirely rather than serialized as an empty list.
fn discover_rule_files(rules_dir: &Path) -> Result<Option<Vec<String>>> {
    let mut rule_files = Vec::new();

    let entries = fs::read_dir(rules_dir)
        .with_context(|| format!("unable to scan rules directory {}", rules_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().map_or(false, |extension| extension == "yml") {
            let path = std::path::absolute(&path)
                .with_context(|| format!("unable to resolve rule file {}", path.display()))?;
            rule_files.push(path.to_string_lossy().into_owned());
        }
    }

    // Directory iteration order is platform dependent; keep the document
    // stable across runs.
    rule_files.sort();

    if rule_files.is_empty() {
        Ok(None)
    } else {
        Ok(Some(rule_files))
    }
}

/// Reachability probes for the public sites.
///
/// The probe targets never get scraped directly: the relabel chain hands the
/// original address to the blackbox exporter as its `target` parameter, keeps
/// it visible as the `instance` label, and points the actual scrape at the
/// exporter.
fn blackbox_probes() -> ScrapeConfig {
    let mut params = BTreeMap::new();
    params.insert("module".to_string(), vec!["http_2xx".to_string()]);

    ScrapeConfig {
        job_name: "blackbox".to_string(),
        metrics_path: Some("/probe".to_string()),
        params: Some(params),
        static_configs: vec![StaticConfig {
            targets: PROBED_SITES.iter().map(|site| site.to_string()).collect(),
        }],
        relabel_configs: Some(vec![
            RelabelConfig {
                source_labels: Some(vec!["__address__".to_string()]),
                target_label: "__param_target".to_string(),
                replacement: None,
            },
            RelabelConfig {
                source_labels: Some(vec!["__param_target".to_string()]),
                target_label: "instance".to_string(),
                replacement: None,
            },
            RelabelConfig {
                source_labels: None,
                target_label: "__address__".to_string(),
                replacement: Some(BLACKBOX_EXPORTER_TARGET.to_string()),
            },
        ]),
    }
}
