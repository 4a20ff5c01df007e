use serde::Serialize;

/// One record of the generated fstab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FstabEntry {
    pub spec: String,
    pub path: String,
    pub fstype: String,
    pub options: String,
    pub freq: u32,
    pub passno: u32,
}

impl FstabEntry {
    pub fn render(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.spec, self.path, self.fstype, self.options, self.freq, self.passno
        )
    }
}

// Mounts must appear parents-first; swap and other pathless records sink
// to the bottom.
fn path_depth(entry: &FstabEntry) -> usize {
    match entry.path.as_str() {
        "none" => usize::MAX,
        path => path.split('/').filter(|part| !part.is_empty()).count(),
    }
}

/// Render the full fstab, ordered by mount-path depth (stable for ties).
pub fn render(entries: &[FstabEntry]) -> String {
    let mut ordered: Vec<&FstabEntry> = entries.iter().collect();
    ordered.sort_by_key(|entry| path_depth(entry));

    let mut out = String::from("# fstab generated during installation\n");
    for entry in ordered {
        out.push_str(&entry.render());
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(spec: &str, path: &str, fstype: &str, passno: u32) -> FstabEntry {
        FstabEntry {
            spec: spec.to_string(),
            path: path.to_string(),
            fstype: fstype.to_string(),
            options: String::from("defaults"),
            freq: 0,
            passno,
        }
    }

    #[test]
    fn test_render_ordering() {
        let entries = vec![
            entry("/dev/sda3", "/home/user/data", "ext4", 1),
            entry("/dev/sda4", "none", "swap", 0),
            entry("UUID=deadbeef-0000-0000-0000-000000000000", "/", "ext4", 1),
            entry("/dev/sda2", "/home", "ext4", 1),
        ];

        let rendered = render(&entries);
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines[0], "# fstab generated during installation");
        assert!(lines[1].starts_with("UUID=deadbeef"));
        assert!(lines[2].starts_with("/dev/sda2 /home "));
        assert!(lines[3].starts_with("/dev/sda3 /home/user/data "));
        assert!(lines[4].starts_with("/dev/sda4 none swap "));
    }

    #[test]
    fn test_render_entry() {
        let e = entry("UUID=abc", "/", "ext4", 1);
        assert_eq!(e.render(), "UUID=abc / ext4 defaults 0 1");
    }
}
