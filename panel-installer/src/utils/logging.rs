// Logging helpers
// Dual-format records (JSON lines + human-readable text) and secret masking.

use log::Level;
use serde_json::json;

/// Mask a sensitive value, keeping a short prefix/suffix of long values for troubleshooting.
pub fn mask_sensitive(input: &str) -> String {
    if input.len() <= 8 || !input.is_char_boundary(4) || !input.is_char_boundary(input.len() - 4)
    {
        return "***".to_string();
    }

    format!("{}...{}", &input[..4], &input[input.len() - 4..])
}

/// Mask credentials inside a SQL Server `key=value;` connection string.
pub fn mask_connection_string(conn_str: &str) -> String {
    let s = conn_str.trim();
    if s.is_empty() {
        return String::new();
    }

    s.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(mask_kv_part)
        .collect::<Vec<_>>()
        .join(";")
}

fn mask_kv_part(part: &str) -> String {
    let Some((k, v)) = part.split_once('=') else {
        return part.to_string();
    };
    let key = k.trim();
    let norm_key = key.to_ascii_lowercase().replace([' ', '_'], "");

    match norm_key.as_str() {
        "password" | "pwd" => format!("{}=***", key),
        "userid" | "user" | "username" | "uid" => format!("{}={}", key, mask_sensitive(v.trim())),
        _ => part.to_string(),
    }
}

/// Mask a property-bag value by key name, for bag dumps in debug logs.
pub fn mask_bag_value(key: &str, value: &str) -> String {
    let upper = key.to_ascii_uppercase();
    if upper.contains("PASSWORD") || upper.contains("CRYPTO") {
        return if value.is_empty() {
            String::new()
        } else {
            "***".to_string()
        };
    }
    if upper == "DB_CONN" {
        return mask_connection_string(value);
    }
    value.to_string()
}

/// Parse phase and step from log message
/// Extracts [PHASE: ...] and [STEP: ...] patterns
pub fn parse_log_metadata(message: &str) -> (Option<String>, Option<String>, String) {
    let (phase, rest) = extract_tag(message, "[PHASE:");
    let (step, cleaned) = extract_tag(&rest, "[STEP:");
    (phase, step, cleaned)
}

fn extract_tag(message: &str, open: &str) -> (Option<String>, String) {
    let Some(start) = message.find(open) else {
        return (None, message.to_string());
    };
    let Some(end) = message[start..].find(']') else {
        return (None, message.to_string());
    };
    let value = message[start + open.len()..start + end].trim().to_string();
    let cleaned = format!("{} {}", &message[..start], &message[start + end + 1..])
        .trim()
        .to_string();
    (Some(value), cleaned)
}

/// Format log entry as JSON for structured logging
pub fn format_json_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut log_entry = json!({
        "timestamp": timestamp,
        "level": level.as_str(),
        "target": target,
        "message": message,
    });

    if let Some(phase) = phase {
        log_entry["phase"] = json!(phase);
    }
    if let Some(step) = step {
        log_entry["step"] = json!(step);
    }

    serde_json::to_string(&log_entry).unwrap_or_else(|_| "{}".to_string())
}

/// Format log entry as human-readable text
pub fn format_human_readable_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut log_line = format!("[{}] [{}]", timestamp, level.as_str());

    if let Some(phase) = phase {
        log_line.push_str(&format!(" [PHASE: {}]", phase));
    }
    if let Some(step) = step {
        log_line.push_str(&format!(" [STEP: {}]", step));
    }

    log_line.push_str(&format!(" [{}] {}", target, message));
    log_line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_password_in_sql_server_string() {
        let conn = "Server=sql01\\SQLEXPRESS;Database=WebsitePanel;User id=sa;Password=Sup3rSecret!;";
        let masked = mask_connection_string(conn);
        assert!(masked.contains("Password=***"), "{}", masked);
        assert!(!masked.contains("Sup3rSecret"), "{}", masked);
        assert!(masked.contains("Server=sql01\\SQLEXPRESS"), "{}", masked);
        assert!(masked.contains("Database=WebsitePanel"), "{}", masked);
    }

    #[test]
    fn masks_pwd_shorthand_and_long_user_ids() {
        let masked = mask_connection_string("Server=s;Uid=administrator;Pwd=secret123;");
        assert!(masked.contains("Pwd=***"));
        assert!(!masked.contains("secret123"));
        assert!(!masked.contains("administrator"));
        assert!(masked.contains("Uid=admi...ator"));
    }

    #[test]
    fn integrated_security_string_is_untouched() {
        let conn = "Server=localhost;Database=master;Integrated Security=SSPI";
        assert_eq!(mask_connection_string(conn), conn);
        assert_eq!(mask_connection_string("   "), "");
    }

    #[test]
    fn bag_values_masked_by_key() {
        assert_eq!(mask_bag_value("PI_SERVER_PASSWORD_CONFIRM", "abc"), "***");
        assert_eq!(mask_bag_value("SERVERADMIN_PASSWORD", ""), "");
        assert_eq!(
            mask_bag_value("DB_CONN", "Server=a;Password=b"),
            "Server=a;Password=***"
        );
        assert_eq!(mask_bag_value("PI_SERVER_IP", "10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn short_values_fully_masked() {
        assert_eq!(mask_sensitive("abc"), "***");
        assert_eq!(mask_sensitive("12345678"), "***");
        assert_eq!(mask_sensitive("abcdefghijklmnop"), "abcd...mnop");
    }

    #[test]
    fn phase_and_step_are_extracted() {
        let (phase, step, msg) =
            parse_log_metadata("[PHASE: deferred] [STEP: pipeline] action started (kind=Backup)");
        assert_eq!(phase.as_deref(), Some("deferred"));
        assert_eq!(step.as_deref(), Some("pipeline"));
        assert_eq!(msg, "action started (kind=Backup)");

        let (phase, step, msg) = parse_log_metadata("plain message");
        assert!(phase.is_none() && step.is_none());
        assert_eq!(msg, "plain message");
    }

    #[test]
    fn json_line_carries_structured_fields() {
        let line = format_json_log(
            "2024-01-01T00:00:00Z",
            Level::Info,
            "panel_installer",
            "hello",
            Some("immediate"),
            None,
        );
        let v: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(v["phase"], "immediate");
        assert!(v.get("step").is_none());
    }
}
