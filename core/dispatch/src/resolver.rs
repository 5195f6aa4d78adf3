//! Plugin instance resolution.

use serde::{Deserialize, Serialize};
use std::fmt;

use cmsync_common::{Error, Handle, Result};

/// Kind of plugin operation; selects the plugin binding and the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Module references and module sources.
    Schema,
    /// Resource data.
    Data,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Schema => f.write_str("schema"),
            OperationKind::Data => f.write_str("data"),
        }
    }
}

fn non_blank(name: &Option<String>) -> Option<&str> {
    name.as_deref().filter(|name| !name.trim().is_empty())
}

/// Name of the plugin service that owns `handle` for `kind`.
///
/// The common service name wins when set; otherwise the per-kind name is used.
///
/// # Errors
/// - `InvalidInput` if the handle has no binding for `kind`
pub fn resolve_plugin_instance(handle: &Handle, kind: OperationKind) -> Result<String> {
    let plugins = &handle.plugins;
    let specific = match kind {
        OperationKind::Schema => &plugins.dmi_model_service_name,
        OperationKind::Data => &plugins.dmi_data_service_name,
    };
    non_blank(&plugins.dmi_service_name)
        .or_else(|| non_blank(specific))
        .map(str::to_string)
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "Handle {} has no plugin bound for {} operations",
                handle.id, kind
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmsync_common::{HandleId, PluginBindings};

    fn handle(plugins: PluginBindings) -> Handle {
        Handle::advised(HandleId::new("ch-1").unwrap(), plugins)
    }

    #[test]
    fn test_common_name_serves_both_kinds() {
        let handle = handle(PluginBindings::common("http://dmi-1"));
        assert_eq!(
            resolve_plugin_instance(&handle, OperationKind::Schema).unwrap(),
            "http://dmi-1"
        );
        assert_eq!(
            resolve_plugin_instance(&handle, OperationKind::Data).unwrap(),
            "http://dmi-1"
        );
    }

    #[test]
    fn test_split_bindings() {
        let handle = handle(PluginBindings::split("http://model", "http://data"));
        assert_eq!(
            resolve_plugin_instance(&handle, OperationKind::Schema).unwrap(),
            "http://model"
        );
        assert_eq!(
            resolve_plugin_instance(&handle, OperationKind::Data).unwrap(),
            "http://data"
        );
    }

    #[test]
    fn test_blank_common_name_falls_back() {
        let mut plugins = PluginBindings::split("http://model", "http://data");
        plugins.dmi_service_name = Some("  ".to_string());
        let handle = handle(plugins);
        assert_eq!(
            resolve_plugin_instance(&handle, OperationKind::Data).unwrap(),
            "http://data"
        );
    }

    #[test]
    fn test_missing_binding_is_invalid_input() {
        let handle = handle(PluginBindings::default());
        assert!(matches!(
            resolve_plugin_instance(&handle, OperationKind::Schema),
            Err(Error::InvalidInput(_))
        ));
    }
}
