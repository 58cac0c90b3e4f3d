// Input validation utilities
//
// User-correctable input problems come back as `ValidationOutcome` values; nothing here errors.

use crate::models::bag::{PropertyBag, YesNo};
use crate::models::responses::ValidationOutcome;
use anyhow::Result;
use regex::Regex;

pub const MSG_EMPTY_PASSWORD: &str = "Empty password.";
pub const MSG_PASSWORD_MISMATCH: &str =
    "Password does not match the confirm password. Type both passwords again.";
pub const MSG_EMPTY_DOMAIN: &str = "The domain can't be empty.";
pub const MSG_EMPTY_LOGIN: &str = "The login can't be empty.";
pub const MSG_EMPTY_DATABASE: &str = "The database name can't be empty.";

pub fn validate_password(password: &str, confirm: &str) -> ValidationOutcome {
    if password.trim().is_empty() {
        ValidationOutcome::invalid(MSG_EMPTY_PASSWORD)
    } else if password != confirm {
        ValidationOutcome::invalid(MSG_PASSWORD_MISMATCH)
    } else {
        ValidationOutcome::valid()
    }
}

/// `<ns>_PASSWORD` against `<ns>_PASSWORD_CONFIRM`.
pub fn validate_password_pair(bag: &PropertyBag, ns: &str) -> ValidationOutcome {
    validate_password(
        bag.get(&format!("{}_PASSWORD", ns)),
        bag.get(&format!("{}_PASSWORD_CONFIRM", ns)),
    )
}

/// Service identity for a component namespace such as `PI_ESERVER`.
///
/// Domain is only required when a domain account is being created; login and password always are.
pub fn validate_identity(bag: &PropertyBag, ns: &str) -> ValidationOutcome {
    let create_ad = bag.flag(&format!("{}_CREATE_AD", ns)) == YesNo::Yes;
    if create_ad && bag.get(&format!("{}_DOMAIN", ns)).trim().is_empty() {
        return ValidationOutcome::invalid(MSG_EMPTY_DOMAIN);
    }
    if bag.get(&format!("{}_LOGIN", ns)).trim().is_empty() {
        return ValidationOutcome::invalid(MSG_EMPTY_LOGIN);
    }
    validate_password_pair(bag, ns)
}

pub fn validate_database_name(name: &str) -> ValidationOutcome {
    if name.trim().is_empty() {
        return ValidationOutcome::invalid(MSG_EMPTY_DATABASE);
    }
    match validate_sql_server_database_name(name) {
        Ok(()) => ValidationOutcome::valid(),
        Err(e) => ValidationOutcome::invalid(e.to_string()),
    }
}

/// SQL Server naming rules for a database we are about to create.
pub fn validate_sql_server_database_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow::anyhow!("Database name cannot be empty"));
    }

    if name.chars().count() > 128 {
        return Err(anyhow::anyhow!(
            "Database name cannot exceed 128 characters"
        ));
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return Err(anyhow::anyhow!(
            "Database name cannot start or end with spaces"
        ));
    }

    let invalid_chars = ['<', '>', ':', '"', '/', '\\', '|', '?', '*', '[', ']', ';'];
    if name.chars().any(|c| invalid_chars.contains(&c)) {
        return Err(anyhow::anyhow!("Database name contains invalid characters"));
    }

    Ok(())
}

/// Quote a database name for interpolation into T-SQL (`USE [..]`).
pub fn quote_sql_server_identifier(name: &str) -> Result<String> {
    let ident_re = Regex::new(r"^[A-Za-z0-9_\-\. ]+$").map_err(|e| {
        anyhow::anyhow!("Internal error: failed to compile identifier regex: {}", e)
    })?;
    let n = name.trim();
    if n.is_empty() || !ident_re.is_match(n) {
        anyhow::bail!("Invalid SQL Server identifier: '{}'", n);
    }
    Ok(format!("[{}]", n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_rules_in_order() {
        assert_eq!(validate_password(" ", " ").message, MSG_EMPTY_PASSWORD);
        assert_eq!(validate_password("a", "b").message, MSG_PASSWORD_MISMATCH);
        assert!(validate_password("a", "a").ok);
    }

    #[test]
    fn identity_checks_domain_only_when_creating_account() {
        let mut bag = PropertyBag::from_pairs([
            ("PI_SERVER_CREATE_AD", "1"),
            ("PI_SERVER_LOGIN", "WPServer"),
            ("PI_SERVER_PASSWORD", "p"),
            ("PI_SERVER_PASSWORD_CONFIRM", "p"),
        ]);
        assert_eq!(validate_identity(&bag, "PI_SERVER").message, MSG_EMPTY_DOMAIN);

        bag.set("PI_SERVER_CREATE_AD", "0");
        assert!(validate_identity(&bag, "PI_SERVER").ok);

        bag.set("PI_SERVER_LOGIN", "");
        assert_eq!(validate_identity(&bag, "PI_SERVER").message, MSG_EMPTY_LOGIN);
    }

    #[test]
    fn identity_falls_through_to_password() {
        let bag = PropertyBag::from_pairs([
            ("PI_PORTAL_LOGIN", "WPPortal"),
            ("PI_PORTAL_PASSWORD", "x"),
        ]);
        assert_eq!(
            validate_identity(&bag, "PI_PORTAL").message,
            MSG_PASSWORD_MISMATCH
        );
    }

    #[test]
    fn database_name_rules() {
        assert_eq!(validate_database_name("").message, MSG_EMPTY_DATABASE);
        assert!(validate_database_name("WebsitePanel").ok);
        assert!(!validate_database_name("bad]name").ok);
    }

    #[test]
    fn identifier_quoting_rejects_injection() {
        assert_eq!(
            quote_sql_server_identifier("WebsitePanel").expect("ok"),
            "[WebsitePanel]"
        );
        assert!(quote_sql_server_identifier("x]; DROP TABLE y; --").is_err());
    }
}
