// Deferred-phase request.
//
// The only thing that crosses from the immediate phase to the elevated phase. Everything the
// deferred side needs is rebuilt from this plus whatever it re-reads from disk.

use crate::models::bag::PropertyBag;
use crate::models::components::ComponentKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Keys copied from the host bag into a deferred payload, besides the component's own `PI_` keys.
const SHARED_KEYS: &[&str] = &[
    "WSP_INSTALL_DIR",
    "ProductVersion",
    "INSTALLER_SOURCE_DIR",
    "MainConfig",
    "ComponentId",
    "FileNameMap",
    "PI_ESERVER_URL",
    "SERVER_ACCESS_PASSWORD",
    "SERVERADMIN_PASSWORD",
    "DB_SERVER",
    "DB_AUTH",
    "DB_LOGIN",
    "DB_PASSWORD",
    "DB_DATABASE",
    "DB_CONN",
    "PI_PREREQ_IIS_INSTALL",
    "PI_PREREQ_ASPNET_INSTALL",
    "PI_PREREQ_NETFX_INSTALL",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredRequest {
    pub correlation_id: String,
    pub data: PropertyBag,
}

impl DeferredRequest {
    /// Snapshot the parts of `bag` the deferred phase of `component` consumes.
    pub fn for_component(component: ComponentKind, bag: &PropertyBag) -> Self {
        let own_prefix = format!("PI_{}_", component.bag_prefix());
        let found_id = format!("COMPFOUND_{}_ID", component.bag_prefix());
        let found_cfg = format!("COMPFOUND_{}_MAIN_CFG", component.bag_prefix());

        let mut data = PropertyBag::new();
        for (k, v) in bag.iter() {
            if k.starts_with(&own_prefix) || SHARED_KEYS.contains(&k) {
                data.set(k, v);
            }
        }
        // A discovered installation feeds the prepare pipeline.
        if let Some(id) = bag.get_non_blank(&found_id) {
            data.set("ComponentId", id);
        }
        if let Some(cfg) = bag.get_non_blank(&found_cfg) {
            data.set("MainConfig", cfg);
        }

        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            data,
        }
    }

    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize deferred request")
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).context("Deferred payload is not a valid request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_keeps_only_relevant_keys() {
        let bag = PropertyBag::from_pairs([
            ("PI_PORTAL_IP", "10.0.0.9"),
            ("PI_SERVER_IP", "10.0.0.1"),
            ("PI_ESERVER_URL", "http://10.0.0.2:9002/"),
            ("COMPFOUND_PORTAL_ID", "portal"),
            ("COMPFOUND_PORTAL_MAIN_CFG", "C:\\WebsitePanel\\WebsitePanel.Installer.json"),
            ("VALIDATE_MSG", "noise"),
        ]);
        let req = DeferredRequest::for_component(ComponentKind::Portal, &bag);
        assert_eq!(req.data.get("PI_PORTAL_IP"), "10.0.0.9");
        assert_eq!(req.data.get("PI_ESERVER_URL"), "http://10.0.0.2:9002/");
        assert_eq!(req.data.get("ComponentId"), "portal");
        assert!(!req.data.contains("PI_SERVER_IP"));
        assert!(!req.data.contains("VALIDATE_MSG"));
    }

    #[test]
    fn payload_round_trips() {
        let bag = PropertyBag::from_pairs([("PI_SERVER_PORT", "9003")]);
        let req = DeferredRequest::for_component(ComponentKind::Server, &bag);
        let back = DeferredRequest::from_payload(&req.to_payload().expect("ser")).expect("de");
        assert_eq!(back, req);
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(DeferredRequest::from_payload("not json").is_err());
    }
}
