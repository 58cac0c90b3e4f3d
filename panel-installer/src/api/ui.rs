// Dialog helpers
//
// Input validations, the enterprise server URL default, the recap text and the IP drop-downs.
// Validations always succeed as actions; the verdict goes to `VALIDATE_OK` / `VALIDATE_MSG`.

use log::debug;

use crate::installation::host::HostProbe;
use crate::models::bag::PropertyBag;
use crate::models::responses::{ActionResult, ValidationOutcome};
use crate::utils::validation::{validate_database_name, validate_identity, validate_password_pair};

pub const VALIDATE_OK: &str = "VALIDATE_OK";
pub const VALIDATE_MSG: &str = "VALIDATE_MSG";
pub const RECAP_TEXT: &str = "CUSTOM_INSTALL_TEXT";

const IP_CONTROLS: [&str; 3] = ["PI_SERVER_IP", "PI_ESERVER_IP", "PI_PORTAL_IP"];

/// Installable features and the recap lines shown when they are selected for local install.
const RECAP: &[(&str, &[&str])] = &[
    (
        "ServerFeature",
        &["Copy WebsitePanel Server files", "Add WebsitePanel Server website"],
    ),
    (
        "EnterpriseServerFeature",
        &[
            "Copy WebsitePanel Enterprise Server files",
            "Install WebsitePanel database and updates",
            "Add WebsitePanel Enterprise Server website",
        ],
    ),
    (
        "PortalFeature",
        &["Copy WebsitePanel Portal files", "Add WebsitePanel Enterprise Portal website"],
    ),
    (
        "SchedulerServiceFeature",
        &[
            "Copy WebsitePanel Scheduler Service files",
            "Install Scheduler Service Windows Service",
        ],
    ),
    ("WDPortalFeature", &["Copy WebsitePanel WebDav Portal files"]),
];

fn validation_reset(bag: &mut PropertyBag) {
    bag.set(VALIDATE_OK, "0");
    bag.set(VALIDATE_MSG, "Error occurred.");
}

fn record_validation(bag: &mut PropertyBag, outcome: ValidationOutcome) -> ActionResult {
    validation_reset(bag);
    bag.append_line(VALIDATE_MSG, &outcome.message);
    bag.set_flag(VALIDATE_OK, outcome.ok);
    debug!(
        "[PHASE: immediate] [STEP: validation] ok={} message={}",
        outcome.ok, outcome.message
    );
    ActionResult::Success
}

pub fn database_connection_validate(bag: &mut PropertyBag) -> ActionResult {
    let outcome = validate_database_name(bag.get("DB_DATABASE"));
    record_validation(bag, outcome)
}

pub fn server_admin_validate(bag: &mut PropertyBag) -> ActionResult {
    let outcome = validate_password_pair(bag, "SERVERADMIN");
    record_validation(bag, outcome)
}

pub fn server_validate_ad(bag: &mut PropertyBag) -> ActionResult {
    let outcome = validate_identity(bag, "PI_SERVER");
    record_validation(bag, outcome)
}

pub fn eserver_validate_ad(bag: &mut PropertyBag) -> ActionResult {
    let outcome = validate_identity(bag, "PI_ESERVER");
    record_validation(bag, outcome)
}

pub fn portal_validate_ad(bag: &mut PropertyBag) -> ActionResult {
    let outcome = validate_identity(bag, "PI_PORTAL");
    record_validation(bag, outcome)
}

pub fn server_access_validate(bag: &mut PropertyBag) -> ActionResult {
    let outcome = validate_password_pair(bag, "SERVER_ACCESS");
    record_validation(bag, outcome)
}

pub fn set_eserver_url_ui(bag: &mut PropertyBag) -> ActionResult {
    let url = format!(
        "http://{}:{}/",
        bag.get("PI_ESERVER_IP").trim(),
        bag.get("PI_ESERVER_PORT").trim()
    );
    bag.set("PI_ESERVER_URL", url);
    ActionResult::Success
}

/// A feature is requested for local install when `FEATURE_<name>` reads `local`.
fn requested_locally(bag: &PropertyBag, feature: &str) -> bool {
    bag.get(&format!("FEATURE_{}", feature))
        .trim()
        .eq_ignore_ascii_case("local")
}

pub fn recap_list_ui(bag: &mut PropertyBag) -> ActionResult {
    bag.set(RECAP_TEXT, "");
    for (feature, lines) in RECAP {
        if !requested_locally(bag, feature) {
            continue;
        }
        for line in lines.iter() {
            bag.append_line(RECAP_TEXT, line);
        }
    }
    ActionResult::Success
}

pub async fn fill_ip_list_ui(probe: &dyn HostProbe, bag: &mut PropertyBag) -> ActionResult {
    let addresses = probe.ipv4_addresses().await;
    for ip in addresses {
        for control in IP_CONTROLS {
            bag.add_option(control, ip.to_string());
        }
    }
    ActionResult::Success
}
