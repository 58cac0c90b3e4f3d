// Property bag shared with the installer host.
//
// The host owns the real store; we receive a snapshot, mutate it through the helpers below,
// and hand it back. Missing keys read as the empty string, matching host semantics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Two-valued flag as the host stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    pub fn as_str(self) -> &'static str {
        match self {
            YesNo::Yes => "1",
            YesNo::No => "0",
        }
    }

    pub fn from_bool(value: bool) -> Self {
        if value {
            YesNo::Yes
        } else {
            YesNo::No
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "yes" | "true" => YesNo::Yes,
            _ => YesNo::No,
        }
    }
}

/// One row of a host check-list control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub ok: bool,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBag {
    #[serde(default)]
    properties: BTreeMap<String, String>,
    /// Drop-down contents keyed by the property the control is bound to.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    checklists: BTreeMap<String, Vec<ChecklistItem>>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut bag = Self::new();
        for (k, v) in pairs {
            bag.set(k, v);
        }
        bag
    }

    pub fn get(&self, key: &str) -> &str {
        self.properties.get(key).map(String::as_str).unwrap_or("")
    }

    /// Value of `key` when it holds something other than whitespace.
    pub fn get_non_blank(&self, key: &str) -> Option<&str> {
        let v = self.get(key);
        if v.trim().is_empty() {
            None
        } else {
            Some(v)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Writes `value` only when it is not blank. Returns whether a write happened.
    pub fn set_if_not_blank(&mut self, key: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            return false;
        }
        self.set(key, value);
        true
    }

    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.set(key, YesNo::from_bool(value).as_str());
    }

    pub fn flag(&self, key: &str) -> YesNo {
        YesNo::parse(self.get(key))
    }

    /// Appends `message` as a new line of a multi-line text property. Blank messages are dropped.
    pub fn append_line(&mut self, key: &str, message: &str) {
        if message.trim().is_empty() {
            return;
        }
        let current = self.get(key);
        let next = if current.trim().is_empty() {
            message.to_string()
        } else {
            format!("{}\n{}", current, message)
        };
        self.set(key, next);
    }

    pub fn add_option(&mut self, control: &str, value: impl Into<String>) {
        self.options
            .entry(control.to_string())
            .or_default()
            .push(value.into());
    }

    pub fn options(&self, control: &str) -> &[String] {
        self.options.get(control).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clear_options(&mut self, control: &str) {
        self.options.remove(control);
    }

    pub fn add_check(&mut self, control: &str, ok: bool, title: impl Into<String>) {
        self.checklists
            .entry(control.to_string())
            .or_default()
            .push(ChecklistItem {
                ok,
                title: title.into(),
            });
    }

    pub fn checklist(&self, control: &str) -> &[ChecklistItem] {
        self.checklists.get(control).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_read_as_empty() {
        let bag = PropertyBag::new();
        assert_eq!(bag.get("DB_SERVER"), "");
        assert_eq!(bag.get_non_blank("DB_SERVER"), None);
    }

    #[test]
    fn set_if_not_blank_skips_whitespace() {
        let mut bag = PropertyBag::from_pairs([("PI_SERVER_IP", "10.0.0.1")]);
        assert!(!bag.set_if_not_blank("PI_SERVER_IP", "  "));
        assert_eq!(bag.get("PI_SERVER_IP"), "10.0.0.1");
        assert!(bag.set_if_not_blank("PI_SERVER_IP", "10.0.0.2"));
        assert_eq!(bag.get("PI_SERVER_IP"), "10.0.0.2");
    }

    #[test]
    fn append_line_joins_and_ignores_blank() {
        let mut bag = PropertyBag::new();
        bag.append_line("PI_PREREQ_LOG", "first");
        bag.append_line("PI_PREREQ_LOG", "");
        bag.append_line("PI_PREREQ_LOG", "second");
        assert_eq!(bag.get("PI_PREREQ_LOG"), "first\nsecond");
    }

    #[test]
    fn flags_round_trip_through_host_values() {
        let mut bag = PropertyBag::new();
        bag.set_flag("DB_CONN_CORRECT", true);
        assert_eq!(bag.get("DB_CONN_CORRECT"), "1");
        assert_eq!(bag.flag("DB_CONN_CORRECT"), YesNo::Yes);
        bag.set("X", "yes");
        assert_eq!(bag.flag("X"), YesNo::Yes);
        assert_eq!(bag.flag("MISSING"), YesNo::No);
    }

    #[test]
    fn serializes_controls_alongside_properties() {
        let mut bag = PropertyBag::new();
        bag.set("DB_SERVER", "sql01");
        bag.add_option("DB_SERVER", "sql01");
        bag.add_check("REQCHECKLIST", true, "Operating System");
        let json = serde_json::to_string(&bag).expect("serialize");
        let back: PropertyBag = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, bag);
        assert_eq!(back.options("DB_SERVER"), ["sql01".to_string()]);
        assert_eq!(back.checklist("REQCHECKLIST").len(), 1);
    }
}
