use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::errors::CurtinError;
use crate::utils::shell;

// Properties applied unless the config overrides them.
const ZPOOL_DEFAULT_PROPERTIES: [(&str, &str); 2] =
    [("ashift", "12"), ("version", "28")];

const ZFS_DEFAULT_PROPERTIES: [(&str, &str); 3] =
    [("atime", "off"), ("canmount", "off"), ("normalization", "formD")];

// YAML reads `on`/`off` as booleans; zfs wants them back as strings.
fn render_value(value: &Value) -> String {
    match value {
        Value::Bool(true) => String::from("on"),
        Value::Bool(false) => String::from("off"),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => format!("{other:?}"),
    }
}

fn join_flags(
    optflag: &str,
    defaults: &[(&str, &str)],
    overrides: &BTreeMap<String, Value>,
) -> Vec<String> {
    let mut merged: BTreeMap<String, String> = defaults
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (key, value) in overrides {
        merged.insert(key.clone(), render_value(value));
    }

    let mut flags = Vec::new();
    for (key, value) in merged {
        flags.push(optflag.to_string());
        flags.push(format!("{key}={value}"));
    }

    flags
}

/// Executes:
/// ```shell
/// zpool create -o ashift=12 ... -O atime=off ... [-m {mountpoint}] \
///     [-R {altroot}] {pool} {vdevs...}
/// ```
pub fn zpool_create(
    pool: &str,
    vdevs: &[&str],
    mountpoint: Option<&str>,
    altroot: Option<&str>,
    pool_properties: &BTreeMap<String, Value>,
    fs_properties: &BTreeMap<String, Value>,
) -> Result<(), CurtinError> {
    let mut args: Vec<String> = vec![String::from("create")];

    args.extend(join_flags("-o", &ZPOOL_DEFAULT_PROPERTIES, pool_properties));
    args.extend(join_flags("-O", &ZFS_DEFAULT_PROPERTIES, fs_properties));

    if let Some(mountpoint) = mountpoint {
        args.extend([String::from("-m"), mountpoint.to_string()]);
    }
    if let Some(altroot) = altroot {
        args.extend([String::from("-R"), altroot.to_string()]);
    }

    args.push(pool.to_string());
    args.extend(vdevs.iter().map(|v| v.to_string()));

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    shell::exec("zpool", &arg_refs)?;

    Ok(())
}

/// Executes:
/// ```shell
/// zfs create [-o k=v ...] {pool}/{volume}
/// ```
pub fn zfs_create(
    pool: &str,
    volume: &str,
    properties: &BTreeMap<String, Value>,
) -> Result<(), CurtinError> {
    let mut args: Vec<String> = vec![String::from("create")];

    for (key, value) in properties {
        args.push(String::from("-o"));
        args.push(format!("{key}={}", render_value(value)));
    }

    args.push(format!("{pool}/{}", volume.trim_matches('/')));

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    shell::exec("zfs", &arg_refs)?;

    Ok(())
}
