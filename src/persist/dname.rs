use serde::Serialize;

/// A stable `/dev/disk/by-dname/{name}` symlink, keyed on whatever
/// identity the device type exposes to udev.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DnameRule {
    DiskSerial { name: String, serial: String },
    DiskWwn { name: String, wwn: String },
    Partition { name: String, partuuid: String },
    DeviceMapper { name: String, dm_name: String },
}

fn equality(key: &str, value: &str) -> String {
    format!("{key}==\"{value}\"")
}

fn setting(key: &str, value: &str) -> String {
    format!("{key}+=\"{value}\"")
}

// by-dname targets come from config `name` fields; whitespace and
// slashes would break the symlink path.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
            true => c,
            false => '_',
        })
        .collect()
}

impl DnameRule {
    pub fn render(&self) -> String {
        let mut clauses = vec![
            equality("SUBSYSTEM", "block"),
            String::from("ACTION!=\"remove\""),
        ];

        let name = match self {
            Self::DiskSerial { name, serial } => {
                clauses.push(equality("ENV{DEVTYPE}", "disk"));
                clauses.push(equality("ENV{ID_SERIAL}", serial));
                name
            }
            Self::DiskWwn { name, wwn } => {
                clauses.push(equality("ENV{DEVTYPE}", "disk"));
                clauses.push(equality("ENV{ID_WWN_WITH_EXTENSION}", wwn));
                name
            }
            Self::Partition { name, partuuid } => {
                clauses.push(equality("ENV{DEVTYPE}", "partition"));
                clauses.push(equality("ENV{ID_PART_ENTRY_UUID}", partuuid));
                name
            }
            Self::DeviceMapper { name, dm_name } => {
                clauses.push(equality("ENV{DM_NAME}", dm_name));
                name
            }
        };

        clauses.push(setting(
            "SYMLINK",
            &format!("disk/by-dname/{}", sanitize(name)),
        ));

        clauses.join(", ")
    }
}

pub fn render(rules: &[DnameRule]) -> String {
    let mut out = String::new();
    for rule in rules {
        out.push_str(&rule.render());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_disk_serial() {
        let rule = DnameRule::DiskSerial {
            name: String::from("main_disk"),
            serial: String::from("QM00002"),
        };

        assert_eq!(
            rule.render(),
            "SUBSYSTEM==\"block\", ACTION!=\"remove\", ENV{DEVTYPE}==\"disk\", \
             ENV{ID_SERIAL}==\"QM00002\", SYMLINK+=\"disk/by-dname/main_disk\"",
        );
    }

    #[test]
    fn test_render_dm() {
        let rule = DnameRule::DeviceMapper {
            name: String::from("vg0-root"),
            dm_name: String::from("vg0-root"),
        };

        assert_eq!(
            rule.render(),
            "SUBSYSTEM==\"block\", ACTION!=\"remove\", ENV{DM_NAME}==\"vg0-root\", \
             SYMLINK+=\"disk/by-dname/vg0-root\"",
        );
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("main disk"), "main_disk");
        assert_eq!(sanitize("a/b"), "a_b");
        assert_eq!(sanitize("ok-name_1.2"), "ok-name_1.2");
    }
}
