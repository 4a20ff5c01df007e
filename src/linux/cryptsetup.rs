use crate::errors::CurtinError;
use crate::utils::shell;

/// Key material for a dm_crypt volume: an inline passphrase or a file
/// path. `/dev/urandom` and `/dev/random` are valid keyfiles and reach
/// crypttab verbatim (throwaway keys for swap-style volumes).
#[derive(Debug, Clone)]
pub enum KeySpec {
    Passphrase(String),
    Keyfile(String),
}

impl KeySpec {
    /// The crypttab key field for this spec. Inline passphrases are
    /// written to a keyfile by the caller, never into crypttab.
    pub fn crypttab_key(&self, fallback: &str) -> String {
        match self {
            Self::Passphrase(_) => fallback.to_string(),
            Self::Keyfile(path) => path.clone(),
        }
    }
}

/// Executes:
/// ```shell
/// cryptsetup --batch-mode luksFormat {device} [{keyfile} | --key-file -]
/// ```
/// Inline passphrases are piped on stdin rather than landing in argv.
pub fn luks_format(device: &str, key: &KeySpec) -> Result<(), CurtinError> {
    match key {
        KeySpec::Keyfile(keyfile) => {
            shell::exec(
                "cryptsetup",
                &["--batch-mode", "luksFormat", device, keyfile],
            )?;
        }
        KeySpec::Passphrase(passphrase) => {
            check_passphrase(passphrase)?;
            shell::exec_stdin(
                "cryptsetup",
                &["--batch-mode", "luksFormat", device, "--key-file", "-"],
                passphrase,
            )?;
        }
    }

    Ok(())
}

/// Executes:
/// ```shell
/// cryptsetup open --type luks {device} {name} --key-file {keyfile|-}
/// ```
pub fn open(device: &str, name: &str, key: &KeySpec) -> Result<(), CurtinError> {
    match key {
        KeySpec::Keyfile(keyfile) => {
            shell::exec(
                "cryptsetup",
                &["open", "--type", "luks", device, name, "--key-file", keyfile],
            )?;
        }
        KeySpec::Passphrase(passphrase) => {
            check_passphrase(passphrase)?;
            shell::exec_stdin(
                "cryptsetup",
                &["open", "--type", "luks", device, name, "--key-file", "-"],
                passphrase,
            )?;
        }
    }

    Ok(())
}

/// Executes:
/// ```shell
/// cryptsetup luksUUID {device}
/// ```
pub fn luks_uuid(device: &str) -> Result<String, CurtinError> {
    let out = shell::exec("cryptsetup", &["luksUUID", device])?;
    Ok(out.stdout.trim().to_string())
}

fn check_passphrase(passphrase: &str) -> Result<(), CurtinError> {
    match passphrase.is_empty() {
        true => Err(CurtinError::BadConfig(String::from("empty luks passphrase"))),
        false => Ok(()),
    }
}
