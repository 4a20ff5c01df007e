use std::collections::BTreeMap;

use crate::errors::CurtinError;
use crate::utils::fs;

/// Serialize the action-id -> device-path map as JSON.
pub fn render(map: &BTreeMap<String, String>) -> String {
    // BTreeMap keeps the output deterministic
    serde_json::to_string_pretty(map).expect("string map serializes")
}

pub fn write(path: &str, map: &BTreeMap<String, String>) -> Result<(), CurtinError> {
    fs::write_file(path, &render(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_round_trip() {
        let mut map = BTreeMap::new();
        map.insert(String::from("disk0"), String::from("/dev/sda"));
        map.insert(String::from("disk0-part1"), String::from("/dev/sda1"));

        let rendered = render(&map);
        let parsed: BTreeMap<String, String> =
            serde_json::from_str(&rendered).unwrap();

        assert_eq!(parsed, map);
    }
}
