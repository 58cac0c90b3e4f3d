// Compact paired-value encoding.
//
// A flat list of fields joined by `-=del=-`, read back two at a time as (key, value). Used for
// the filename remap table carried in the property bag and for backup manifests. The token
// does not occur in Windows paths or in the settings we store.

use anyhow::Result;

pub const DELIMITER: &str = "-=del=-";

pub fn encode_pairs<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut fields: Vec<&str> = Vec::new();
    for (k, v) in pairs {
        fields.push(k);
        fields.push(v);
    }
    fields.join(DELIMITER)
}

pub fn decode_pairs(encoded: &str) -> Result<Vec<(String, String)>> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let fields: Vec<&str> = trimmed.split(DELIMITER).collect();
    if fields.len() % 2 != 0 {
        anyhow::bail!(
            "Paired value list has an odd number of fields ({})",
            fields.len()
        );
    }

    Ok(fields
        .chunks(2)
        .map(|c| (c[0].to_string(), c[1].to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_flat_field_list() {
        let s = encode_pairs([("web.config", "WebsitePanel.Installer.json"), ("a", "")]);
        assert_eq!(s, "web.config-=del=-WebsitePanel.Installer.json-=del=-a-=del=-");
        let back = decode_pairs(&s).expect("decode");
        assert_eq!(back[0].0, "web.config");
        assert_eq!(back[1], ("a".to_string(), String::new()));
    }

    #[test]
    fn empty_input_is_empty_list() {
        assert!(decode_pairs("  ").expect("decode").is_empty());
    }

    #[test]
    fn odd_field_count_is_rejected() {
        assert!(decode_pairs("one-=del=-two-=del=-three").is_err());
    }

    #[test]
    fn paths_with_separators_survive() {
        let s = encode_pairs([("C:\\WebsitePanel\\Portal", "D:\\x=y;z")]);
        let back = decode_pairs(&s).expect("decode");
        assert_eq!(back, vec![("C:\\WebsitePanel\\Portal".into(), "D:\\x=y;z".into())]);
    }
}
