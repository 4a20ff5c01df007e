use std::io::Read;
use std::path::Path;

use log::{info, warn};

use crate::apply::ApplyContext;
use crate::errors::CurtinError;
use crate::linux::cryptsetup::{self, KeySpec};
use crate::linux::{mount, udev, zfs};
use crate::storage::{EncryptionStyle, Zfs, Zpool};
use crate::utils::shell;

/// Stable /dev/disk/by-id alias for a device, preferred for vdevs so
/// pools survive controller reordering. Falls back to the raw path
/// with a warning.
pub fn by_id_link(devpath: &str) -> Option<String> {
    let by_id = Path::new("/dev/disk/by-id");
    let entries = std::fs::read_dir(by_id).ok()?;

    for entry in entries.filter_map(|entry| entry.ok()) {
        let link = entry.path();
        let Ok(resolved) = std::fs::canonicalize(&link) else {
            continue;
        };

        if resolved.display().to_string() == devpath {
            return Some(link.display().to_string());
        }
    }

    None
}

pub fn handle_zpool(
    ctx: &mut ApplyContext,
    zpool: &Zpool,
) -> Result<Option<String>, CurtinError> {
    let mut vdevs = Vec::with_capacity(zpool.vdevs.len());
    for device_id in &zpool.vdevs {
        let devpath = ctx.device_path(device_id)?;

        match by_id_link(&devpath) {
            Some(link) => vdevs.push(link),
            None => {
                warn!(
                    "zpool {}: no /dev/disk/by-id alias for {devpath}, \
                     using the raw path",
                    zpool.id
                );
                vdevs.push(devpath);
            }
        }
    }

    let altroot = ctx.env.target.display().to_string();
    let keystore = match zpool.encryption_style {
        Some(EncryptionStyle::LuksKeystore) => {
            Some(prepare_pool_key(&zpool.pool, zpool.keyfile.as_deref())?)
        }
        None => None,
    };

    let mut pool_properties = zpool.pool_properties.clone();
    let mut fs_properties = zpool.fs_properties.clone();
    if let Some(keyfile) = &keystore {
        fs_properties.insert(
            String::from("encryption"),
            serde_yaml::Value::from("aes-256-gcm"),
        );
        fs_properties.insert(String::from("keyformat"), serde_yaml::Value::from("raw"));
        fs_properties.insert(
            String::from("keylocation"),
            serde_yaml::Value::from(format!("file://{keyfile}")),
        );
    }

    if zpool.default_features == Some(false) {
        pool_properties
            .entry(String::from("feature@async_destroy"))
            .or_insert(serde_yaml::Value::from("disabled"));
    }

    info!("zpool create {} on {}", zpool.pool, vdevs.join(", "));

    let vdev_refs: Vec<&str> = vdevs.iter().map(String::as_str).collect();
    zfs::zpool_create(
        &zpool.pool,
        &vdev_refs,
        zpool.mountpoint.as_deref(),
        Some(&altroot),
        &pool_properties,
        &fs_properties,
    )?;

    if let Some(keyfile) = &keystore {
        build_luks_keystore(&zpool.pool, keyfile)?;
    }

    // the pool name is the handle later zfs actions resolve
    Ok(Some(zpool.pool.clone()))
}

pub fn handle_zfs(ctx: &mut ApplyContext, dataset: &Zfs) -> Result<Option<String>, CurtinError> {
    let pool = ctx.device_path(&dataset.pool)?;

    info!("zfs create {pool}/{}", dataset.volume);
    zfs::zfs_create(&pool, &dataset.volume, &dataset.properties)?;

    Ok(Some(format!("{pool}/{}", dataset.volume)))
}

// The pool key is 32 bytes of urandom written to a root-only runfile;
// the keystore dataset built afterwards is its durable home.
fn prepare_pool_key(pool: &str, keyfile: Option<&str>) -> Result<String, CurtinError> {
    let path = match keyfile {
        Some(path) => path.to_string(),
        None => format!("/run/curtin-zpool-{pool}.key"),
    };

    if Path::new(&path).exists() {
        return Ok(path);
    }

    let mut key = [0u8; 32];
    std::fs::File::open("/dev/urandom")
        .and_then(|mut urandom| urandom.read_exact(&mut key))
        .map_err(|err| CurtinError::CmdFailed {
            error: Some(err),
            context: String::from("cannot read /dev/urandom for pool key"),
        })?;

    std::fs::write(&path, key).map_err(|err| CurtinError::CmdFailed {
        error: Some(err),
        context: format!("cannot write pool keyfile {path}"),
    })?;

    Ok(path)
}

// A LUKS-wrapped zvol inside the pool holds the pool key, so the
// initramfs can prompt once and unlock both layers.
fn build_luks_keystore(pool: &str, keyfile: &str) -> Result<(), CurtinError> {
    info!("building luks keystore for pool {pool}");

    shell::exec("zfs", &["create", "-V", "20M", &format!("{pool}/keystore")])?;
    udev::settle()?;

    let zvol = format!("/dev/zvol/{pool}/keystore");
    let key = KeySpec::Keyfile(keyfile.to_string());
    cryptsetup::luks_format(&zvol, &key)?;

    let mapper_name = format!("keystore-{pool}");
    cryptsetup::open(&zvol, &mapper_name, &key)?;

    let mapper_path = format!("/dev/mapper/{mapper_name}");
    shell::exec_timeout(
        "mkfs.ext4",
        &["-F", "-q", &mapper_path],
        shell::TIMEOUT_MKFS,
    )?;

    let mount_dir = std::path::PathBuf::from(format!("/run/keystore/{pool}"));
    mount::mount(&mapper_path, &mount_dir, Some("ext4"), None)?;

    let stored_key = mount_dir.join(format!("{pool}.system.key"));
    std::fs::copy(keyfile, &stored_key).map_err(|err| CurtinError::CmdFailed {
        error: Some(err),
        context: format!("cannot store pool key in {}", stored_key.display()),
    })?;

    Ok(())
}
