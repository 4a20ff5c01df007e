use serde::Serialize;

/// One `/etc/crypttab` line: mapping name, source volume, key material,
/// options. The source is a `UUID=` spec so the mapping survives device
/// renames; the key field is a path (`/dev/urandom` included, verbatim)
/// or `none` for passphrase prompting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrypttabEntry {
    pub name: String,
    pub source: String,
    pub key: String,
    pub options: Vec<String>,
}

impl CrypttabEntry {
    pub fn render(&self) -> String {
        let options = match self.options.is_empty() {
            true => String::from("luks"),
            false => self.options.join(","),
        };

        format!("{} {} {} {}", self.name, self.source, self.key, options)
    }
}

pub fn render(entries: &[CrypttabEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.render());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let entry = CrypttabEntry {
            name: String::from("cryptroot"),
            source: String::from("UUID=deadbeef-0000-0000-0000-000000000000"),
            key: String::from("/dev/urandom"),
            options: vec![],
        };

        assert_eq!(
            entry.render(),
            "cryptroot UUID=deadbeef-0000-0000-0000-000000000000 /dev/urandom luks"
        );

        let rendered = entry.render();
        let fields: Vec<&str> = rendered.split_whitespace().collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[2], "/dev/urandom");
        assert_eq!(fields[3], "luks");
    }

    #[test]
    fn test_render_custom_options() {
        let entry = CrypttabEntry {
            name: String::from("cryptswap"),
            source: String::from("UUID=11111111-1111-1111-1111-111111111111"),
            key: String::from("/dev/urandom"),
            options: vec![String::from("swap"), String::from("cipher=aes-xts-plain64")],
        };

        assert!(entry.render().ends_with("swap,cipher=aes-xts-plain64"));
    }
}
