// Product versions and the no-downgrade guard.

use crate::models::errors::SetupError;
use crate::models::variables::InstallerKind;
use log::warn;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Four-part dotted version. Missing parts compare as zero, so `2.1` == `2.1.0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ProductVersion([u32; 4]);

impl ProductVersion {
    pub fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self([major, minor, build, revision])
    }

    pub fn parts(&self) -> [u32; 4] {
        self.0
    }
}

impl Ord for ProductVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for ProductVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for ProductVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let fields: Vec<&str> = s.split('.').collect();
        if fields.len() > 4 {
            return Err(format!("version '{}' has more than four parts", s));
        }
        let mut parts = [0u32; 4];
        for (slot, field) in parts.iter_mut().zip(fields) {
            *slot = field
                .trim()
                .parse()
                .map_err(|_| format!("version '{}' has a non-numeric part '{}'", s, field))?;
        }
        Ok(Self(parts))
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

fn comparable(label: &str, raw: &str) -> Option<ProductVersion> {
    if raw.trim().is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(
                "[PHASE: discovery] [STEP: version] Unparsable {} version; guard skipped: {}",
                label, e
            );
            None
        }
    }
}

/// Refuse an in-place update that would replace `found` with an older `target`.
///
/// Full MSI package installations are exempt. When either version is blank or unparsable the
/// two cannot be ordered and the update is allowed.
pub fn version_guard(found: &str, target: &str, kind: InstallerKind) -> Result<(), SetupError> {
    if kind == InstallerKind::Msi {
        return Ok(());
    }
    let (Some(found_v), Some(target_v)) =
        (comparable("installed", found), comparable("target", target))
    else {
        return Ok(());
    };
    if found_v > target_v {
        return Err(SetupError::VersionGuard {
            found: found.trim().to_string(),
            target: target.trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn missing_parts_are_zero() {
        let a: ProductVersion = "2.1".parse().expect("parse");
        assert_eq!(a, ProductVersion::new(2, 1, 0, 0));
        assert_eq!("".parse::<ProductVersion>(), Ok(ProductVersion::default()));
        assert!("2.x".parse::<ProductVersion>().is_err());
        assert!("1.2.3.4.5".parse::<ProductVersion>().is_err());
    }

    #[test]
    fn ordering_is_numeric_not_lexical() {
        let a: ProductVersion = "2.10.0".parse().expect("parse");
        let b: ProductVersion = "2.9.9".parse().expect("parse");
        assert!(a > b);
    }

    #[test]
    fn msi_installs_skip_the_guard() {
        assert!(version_guard("3.0.0", "2.0.0", InstallerKind::Msi).is_ok());
        assert!(version_guard("3.0.0", "2.0.0", InstallerKind::Interactive).is_err());
    }

    #[test]
    fn blank_found_version_never_blocks() {
        assert!(version_guard("", "1.0.0", InstallerKind::Interactive).is_ok());
    }

    #[test]
    fn blank_target_version_does_not_block() {
        assert!(version_guard("2.1.0", "", InstallerKind::Interactive).is_ok());
        assert!(version_guard("2.1.0", "   ", InstallerKind::Interactive).is_ok());
    }

    #[test]
    fn garbled_versions_are_not_ordered() {
        assert!("2.x.0".parse::<ProductVersion>().is_err());
        assert!(version_guard("2.x.0", "1.0.0", InstallerKind::Interactive).is_ok());
        assert!(version_guard("3.0.0", "1.0.0.0.7", InstallerKind::Interactive).is_ok());
        assert!(version_guard("3.0.0", "1.0.0", InstallerKind::Interactive).is_err());
    }

    proptest! {
        #[test]
        fn guard_fails_exactly_when_target_is_older(
            found in proptest::array::uniform4(0u32..50),
            target in proptest::array::uniform4(0u32..50),
        ) {
            let f = ProductVersion(found);
            let t = ProductVersion(target);
            let res = version_guard(&f.to_string(), &t.to_string(), InstallerKind::Interactive);
            if t < f {
                let is_guard = matches!(res, Err(SetupError::VersionGuard { .. }));
                prop_assert!(is_guard);
            } else {
                prop_assert!(res.is_ok());
            }
        }
    }
}
