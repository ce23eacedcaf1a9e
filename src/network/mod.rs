//! Pod network-selection annotation parsing.
//!
//! The `k8s.v1.cni.cncf.io/networks` annotation comes in two syntaxes:
//! - JSON: a list of `{"name", "namespace", "interface"}` objects
//! - Shorthand: a comma-delimited list of `[namespace/]name[@interface]`
//!
//! The JSON syntax is selected whenever the value contains `[`, `{` or `"`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Annotation key carrying a pod's secondary network selection.
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Default namespace handed to the parser by the isolation policy.
/// References that name no namespace come back with this value.
pub const LOCAL_NAMESPACE: &str = "_local";

/// Characters that switch the parser to the JSON syntax.
const JSON_MARKERS: &[char] = &['[', '{', '"'];

/// Errors produced while parsing a network-selection annotation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("network annotation is empty")]
    EmptyAnnotation,

    #[error("failed to parse network selection annotation JSON: {0}")]
    MalformedAnnotationJson(String),

    #[error("invalid network object '{item}' (failed at '{separator}')")]
    InvalidNetworkObjectName { item: String, separator: char },

    #[error(
        "'{0}' does not match the network name format (lower case alphanumeric characters or '-', starting and ending with an alphanumeric character)"
    )]
    InvalidTokenFormat(String),
}

/// A single network selected by a pod.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkReference {
    pub name: String,
    pub namespace: String,
    pub interface_name: String,
}

/// Element of the JSON annotation syntax.
#[derive(Debug, Deserialize)]
struct NetworkSelectionElement {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default, alias = "interfaceRequest")]
    interface: String,
}

static DNS1123_LABEL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok());

/// Check a string against the DNS-1123 label format used for network names.
pub fn is_dns1123_label(value: &str) -> bool {
    DNS1123_LABEL_RE.as_ref().is_some_and(|re| re.is_match(value))
}

/// Annotation tokens follow the DNS-1123 label shape, ignoring ASCII case.
fn is_network_token(value: &str) -> bool {
    is_dns1123_label(&value.to_ascii_lowercase())
}

/// Returns true when the annotation value uses the JSON syntax.
pub fn is_json_syntax(raw: &str) -> bool {
    raw.contains(JSON_MARKERS)
}

/// Parse a network-selection annotation into its references.
///
/// References without a namespace are given `default_namespace`. Input order
/// is preserved.
pub fn parse_network_annotation(
    raw: &str,
    default_namespace: &str,
) -> Result<Vec<NetworkReference>, AnnotationError> {
    if raw.is_empty() {
        return Err(AnnotationError::EmptyAnnotation);
    }

    let mut networks = if is_json_syntax(raw) {
        parse_json(raw)?
    } else {
        raw.split(',')
            .map(|item| parse_network_object_name(item.trim()))
            .collect::<Result<Vec<_>, _>>()?
    };

    for network in networks.iter_mut() {
        if network.namespace.is_empty() {
            network.namespace = default_namespace.to_string();
        }
    }

    Ok(networks)
}

fn parse_json(raw: &str) -> Result<Vec<NetworkReference>, AnnotationError> {
    let elements: Vec<NetworkSelectionElement> = serde_json::from_str(raw)
        .map_err(|e| AnnotationError::MalformedAnnotationJson(e.to_string()))?;

    elements
        .into_iter()
        .map(|element| {
            check_tokens(&[&element.namespace, &element.name, &element.interface])?;
            Ok(NetworkReference {
                name: element.name,
                namespace: element.namespace,
                interface_name: element.interface,
            })
        })
        .collect()
}

/// Parse one shorthand item of the form `[namespace/]name[@interface]`.
fn parse_network_object_name(item: &str) -> Result<NetworkReference, AnnotationError> {
    let (namespace, rest) = match item.split('/').collect::<Vec<_>>().as_slice() {
        [name] => ("", *name),
        [namespace, name] => (namespace.trim(), *name),
        _ => {
            return Err(AnnotationError::InvalidNetworkObjectName {
                item: item.to_string(),
                separator: '/',
            });
        }
    };

    let (name, interface) = match rest.split('@').collect::<Vec<_>>().as_slice() {
        [name] => (name.trim(), ""),
        [name, interface] => (name.trim(), interface.trim()),
        _ => {
            return Err(AnnotationError::InvalidNetworkObjectName {
                item: item.to_string(),
                separator: '@',
            });
        }
    };

    check_tokens(&[namespace, name, interface])?;

    Ok(NetworkReference {
        name: name.to_string(),
        namespace: namespace.to_string(),
        interface_name: interface.to_string(),
    })
}

/// Every non-empty token must have the DNS-1123 label shape.
fn check_tokens(tokens: &[&str]) -> Result<(), AnnotationError> {
    match tokens
        .iter()
        .find(|token| !token.is_empty() && !is_network_token(token))
    {
        Some(token) => Err(AnnotationError::InvalidTokenFormat(token.to_string())),
        None => Ok(()),
    }
}
