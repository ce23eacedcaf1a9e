//! CNI plugin configuration classification.
//!
//! A NetworkAttachmentDefinition embeds its CNI configuration as a JSON
//! string. Two shapes are accepted:
//! - a single plugin config, identified by its top-level `type`
//! - a plugin list, identified by a top-level `plugins` array whose elements
//!   each carry a `type`
//!
//! Classification runs in three steps: decode the JSON object, check its
//! structural shape, then extract the plugin types.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while classifying a CNI configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CniConfigError {
    #[error("configuration string is not in JSON format: {0}")]
    NotJson(String),

    #[error("invalid CNI config shape: {0}")]
    InvalidShape(String),

    #[error("missing 'type' in {0}")]
    MissingPluginType(&'static str),
}

/// Which of the two CNI config shapes a document uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// A single plugin config with a top-level `type`.
    Single,
    /// A chained plugin list under `plugins`.
    List,
}

/// Decode a CNI config into its top-level JSON object.
pub fn parse_object(config: &str) -> Result<Map<String, Value>, CniConfigError> {
    match serde_json::from_str::<Value>(config) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CniConfigError::NotJson("expected a JSON object".to_string())),
        Err(e) => Err(CniConfigError::NotJson(e.to_string())),
    }
}

/// Fill in `name` when it is absent or empty, as multus does before
/// handing a config to CNI. `type` and `plugins` are left untouched.
pub fn inject_name(conf: &mut Map<String, Value>, name: &str) {
    let missing = match conf.get("name") {
        None => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if missing {
        conf.insert("name".to_string(), Value::String(name.to_string()));
    }
}

/// Check that a decoded config has the structure of a CNI config or config
/// list. Field presence is not required here, only field types.
pub fn check_shape(conf: &Map<String, Value>) -> Result<ConfigKind, CniConfigError> {
    expect_string(conf, "cniVersion")?;
    expect_string(conf, "name")?;

    match conf.get("plugins") {
        Some(Value::Array(plugins)) => {
            if plugins.is_empty() {
                return Err(CniConfigError::InvalidShape(
                    "'plugins' must not be empty".to_string(),
                ));
            }
            for (index, plugin) in plugins.iter().enumerate() {
                let plugin = plugin.as_object().ok_or_else(|| {
                    CniConfigError::InvalidShape(format!("plugins[{}] is not an object", index))
                })?;
                check_plugin_fields(plugin)?;
            }
            Ok(ConfigKind::List)
        }
        Some(_) => Err(CniConfigError::InvalidShape(
            "'plugins' must be a list".to_string(),
        )),
        None => {
            check_plugin_fields(conf)?;
            Ok(ConfigKind::Single)
        }
    }
}

/// Fields shared by a standalone config and each element of a list.
fn check_plugin_fields(conf: &Map<String, Value>) -> Result<(), CniConfigError> {
    expect_string(conf, "type")?;

    if let Some(ipam) = conf.get("ipam") {
        let ipam = ipam
            .as_object()
            .ok_or_else(|| CniConfigError::InvalidShape("'ipam' must be an object".to_string()))?;
        expect_string(ipam, "type")?;
    }

    if let Some(dns) = conf.get("dns")
        && !dns.is_object()
    {
        return Err(CniConfigError::InvalidShape(
            "'dns' must be an object".to_string(),
        ));
    }

    if let Some(capabilities) = conf.get("capabilities") {
        let valid = capabilities
            .as_object()
            .is_some_and(|caps| caps.values().all(Value::is_boolean));
        if !valid {
            return Err(CniConfigError::InvalidShape(
                "'capabilities' must map names to booleans".to_string(),
            ));
        }
    }

    Ok(())
}

fn expect_string(conf: &Map<String, Value>, field: &str) -> Result<(), CniConfigError> {
    match conf.get(field) {
        None | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(CniConfigError::InvalidShape(format!(
            "'{}' must be a string",
            field
        ))),
    }
}

/// Collect the plugin types of a shape-checked config.
pub fn extract_plugin_types(
    conf: &Map<String, Value>,
    kind: ConfigKind,
) -> Result<BTreeSet<String>, CniConfigError> {
    match kind {
        ConfigKind::List => {
            let plugins = conf
                .get("plugins")
                .and_then(Value::as_array)
                .ok_or(CniConfigError::MissingPluginType("plugins"))?;
            plugins
                .iter()
                .map(|plugin| {
                    plugin_type(plugin).ok_or(CniConfigError::MissingPluginType("plugins"))
                })
                .collect()
        }
        ConfigKind::Single => {
            let plugin_type = conf
                .get("type")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .ok_or(CniConfigError::MissingPluginType("cni config"))?;
            Ok(BTreeSet::from([plugin_type.to_string()]))
        }
    }
}

fn plugin_type(plugin: &Value) -> Option<String> {
    plugin
        .get("type")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Classify a raw CNI config and return the set of plugin types it uses.
///
/// An empty config is valid and yields no types.
pub fn classify(config: &str) -> Result<BTreeSet<String>, CniConfigError> {
    if config.is_empty() {
        return Ok(BTreeSet::new());
    }
    let conf = parse_object(config)?;
    let kind = check_shape(&conf)?;
    extract_plugin_types(&conf, kind)
}

/// Classify a config the way admission sees it: `name` defaults to the
/// owning resource's name before the shape check runs.
pub fn classify_named(resource_name: &str, config: &str) -> Result<BTreeSet<String>, CniConfigError> {
    if config.is_empty() {
        return Ok(BTreeSet::new());
    }
    let mut conf = parse_object(config)?;
    inject_name(&mut conf, resource_name);
    let kind = check_shape(&conf)?;
    extract_plugin_types(&conf, kind)
}
