use log::info;

use crate::apply::ApplyContext;
use crate::errors::CurtinError;
use crate::linux::cryptsetup::{self, KeySpec};
use crate::persist::crypttab::CrypttabEntry;
use crate::storage::DmCrypt;

pub fn handle(
    ctx: &mut ApplyContext,
    crypt: &DmCrypt,
) -> Result<Option<String>, CurtinError> {
    let volume_path = ctx.device_path(&crypt.volume)?;

    let key = match (&crypt.key, &crypt.keyfile) {
        (Some(passphrase), None) => KeySpec::Passphrase(passphrase.clone()),
        (None, Some(keyfile)) => KeySpec::Keyfile(keyfile.clone()),
        // the loader enforces exactly-one-of
        _ => {
            return Err(CurtinError::CurtinRsBug(format!(
                "dm_crypt {} reached execution without a key spec",
                crypt.id
            )));
        }
    };

    info!("luksFormat on {volume_path}, opening as {}", crypt.dm_name);
    cryptsetup::luks_format(&volume_path, &key)?;
    cryptsetup::open(&volume_path, &crypt.dm_name, &key)?;

    let uuid = cryptsetup::luks_uuid(&volume_path)?;

    ctx.artifacts.crypttab.push(CrypttabEntry {
        name: crypt.dm_name.clone(),
        source: format!("UUID={uuid}"),
        key: key.crypttab_key("none"),
        options: crypt.options.clone().unwrap_or_default(),
    });

    Ok(Some(format!("/dev/mapper/{}", crypt.dm_name)))
}
