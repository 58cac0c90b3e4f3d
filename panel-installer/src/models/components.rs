// Fixed component registry.
//
// The product ships exactly three installable components. Everything that needs a component
// code, a property-bag prefix, or a package folder resolves it from this table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Server,
    EnterpriseServer,
    Portal,
}

/// Static facts about one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentRegistration {
    pub kind: ComponentKind,
    /// Stable code stored in the main configuration (`ComponentCode` setting).
    pub code: &'static str,
    /// Human-readable name; also the backup subtree name.
    pub name: &'static str,
    /// Property-bag infix: `PI_<prefix>_IP`, `COMPFOUND_<prefix>`, ...
    pub bag_prefix: &'static str,
    /// Sub-folder of the package source that holds this component's files.
    pub package_folder: &'static str,
    /// Endpoint used when nothing better is known.
    pub default_endpoint: &'static str,
}

pub const COMPONENTS: [ComponentRegistration; 3] = [
    ComponentRegistration {
        kind: ComponentKind::Server,
        code: "server",
        name: "Server",
        bag_prefix: "SERVER",
        package_folder: "Server",
        default_endpoint: "http://127.0.0.1:9003",
    },
    ComponentRegistration {
        kind: ComponentKind::EnterpriseServer,
        code: "enterpriseserver",
        name: "Enterprise Server",
        bag_prefix: "ESERVER",
        package_folder: "EnterpriseServer",
        default_endpoint: "http://127.0.0.1:9002",
    },
    ComponentRegistration {
        kind: ComponentKind::Portal,
        code: "portal",
        name: "Portal",
        bag_prefix: "PORTAL",
        package_folder: "Portal",
        default_endpoint: "http://127.0.0.1:9001",
    },
];

impl ComponentKind {
    pub fn all() -> [ComponentKind; 3] {
        [
            ComponentKind::Server,
            ComponentKind::EnterpriseServer,
            ComponentKind::Portal,
        ]
    }

    pub fn registration(self) -> &'static ComponentRegistration {
        match self {
            ComponentKind::Server => &COMPONENTS[0],
            ComponentKind::EnterpriseServer => &COMPONENTS[1],
            ComponentKind::Portal => &COMPONENTS[2],
        }
    }

    pub fn code(self) -> &'static str {
        self.registration().code
    }

    pub fn name(self) -> &'static str {
        self.registration().name
    }

    pub fn bag_prefix(self) -> &'static str {
        self.registration().bag_prefix
    }

    /// Property-bag key for one of this component's `PI_` fields, e.g. `PI_ESERVER_PORT`.
    pub fn bag_key(self, field: &str) -> String {
        format!("PI_{}_{}", self.bag_prefix(), field)
    }

    pub fn from_code(code: &str) -> Option<ComponentKind> {
        COMPONENTS
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code.trim()))
            .map(|c| c.kind)
    }
}

/// Portal falls back to this when no enterprise server endpoint can be discovered.
pub fn default_enterprise_server_url() -> &'static str {
    ComponentKind::EnterpriseServer.registration().default_endpoint
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "");
        match norm.as_str() {
            "server" => Ok(ComponentKind::Server),
            "eserver" | "enterpriseserver" => Ok(ComponentKind::EnterpriseServer),
            "portal" | "webportal" => Ok(ComponentKind::Portal),
            _ => Err(format!(
                "unknown component '{}' (expected server, eserver or portal)",
                s
            )),
        }
    }
}
