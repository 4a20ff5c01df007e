pub mod crypttab;
pub mod device_map;
pub mod dname;
pub mod fstab;

use std::collections::BTreeMap;
use std::path::Path;

use log::info;

use crate::errors::CurtinError;
use crate::storage::{NvmeController, NvmeTransport};
use crate::utils::fs;

pub const DNAME_RULES_FILE: &str = "etc/udev/rules.d/71-curtin-by-dname.rules";

/// Everything the execution accumulated for the target system.
#[derive(Debug, Default)]
pub struct Artifacts {
    pub fstab: Vec<fstab::FstabEntry>,
    pub crypttab: Vec<crypttab::CrypttabEntry>,
    pub dnames: Vec<dname::DnameRule>,
    pub device_map: BTreeMap<String, String>,
    pub nvme_controllers: Vec<NvmeController>,
}

/// Write all persisted outputs under the target mount point.
///
/// `output_fstab` (the OUTPUT_FSTAB contract) receives a second copy of
/// the fstab for the containing installer; `device_map_path` comes from
/// `storage.device_map_path`.
pub fn persist_all(
    target: &Path,
    artifacts: &Artifacts,
    output_fstab: Option<&str>,
    device_map_path: Option<&str>,
) -> Result<(), CurtinError> {
    let rendered_fstab = fstab::render(&artifacts.fstab);
    fs::write_file(target.join("etc/fstab"), &rendered_fstab)?;
    info!("wrote {} fstab entries", artifacts.fstab.len());

    if let Some(path) = output_fstab {
        fs::write_file(path, &rendered_fstab)?;
    }

    if !artifacts.crypttab.is_empty() {
        fs::write_file(
            target.join("etc/crypttab"),
            &crypttab::render(&artifacts.crypttab),
        )?;
        info!("wrote {} crypttab entries", artifacts.crypttab.len());
    }

    if !artifacts.dnames.is_empty() {
        fs::write_file(
            target.join(DNAME_RULES_FILE),
            &dname::render(&artifacts.dnames),
        )?;
    }

    if let Some(path) = device_map_path {
        device_map::write(path, &artifacts.device_map)?;
    }

    write_nvme_connections(target, &artifacts.nvme_controllers)?;

    Ok(())
}

// Fabric-attached nvme needs a connect at boot; the discovery config is
// what nvme-cli's systemd units read.
fn write_nvme_connections(
    target: &Path,
    controllers: &[NvmeController],
) -> Result<(), CurtinError> {
    let mut lines = String::new();

    for controller in controllers {
        if controller.transport != NvmeTransport::Tcp {
            continue;
        }

        let addr = controller.tcp_addr.as_deref().unwrap_or("");
        let port = controller.tcp_port.unwrap_or(4420);
        lines.push_str(&format!(
            "--transport=tcp --traddr={addr} --trsvcid={port}\n"
        ));
    }

    if lines.is_empty() {
        return Ok(());
    }

    fs::write_file(target.join("etc/nvme/discovery.conf"), &lines)
}
