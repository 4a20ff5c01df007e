use crate::errors::CurtinError;
use crate::storage::PartFlag;
use crate::utils::shell;

/// GPT type GUID selected by a partition flag, where the flag implies
/// one. parted handles the rest of the flags directly.
pub fn flag_to_typecode(flag: PartFlag) -> Option<&'static str> {
    match flag {
        // EFI system partition
        PartFlag::Boot => Some("C12A7328-F81F-11D2-BA4B-00A0C93EC93B"),
        PartFlag::Home => Some("933AC7E1-2EB4-4F13-B844-0E14E2AEF915"),
        PartFlag::Prep => Some("9E1A2D38-C612-4316-AA26-8B49521E5A8B"),
        _ => None,
    }
}

/// Executes:
/// ```shell
/// sgdisk --zap-all {device}
/// ```
/// Destroys both GPT headers and the protective MBR.
pub fn zap_all(device: &str) -> Result<(), CurtinError> {
    shell::exec("sgdisk", &["--zap-all", device])?;
    Ok(())
}

/// Executes:
/// ```shell
/// sgdisk --typecode={number}:{guid} {device}
/// ```
pub fn set_typecode(
    device: &str,
    number: u32,
    guid: &str,
) -> Result<(), CurtinError> {
    let arg = format!("--typecode={number}:{guid}");
    shell::exec("sgdisk", &[&arg, device])?;
    Ok(())
}

/// Executes, once per attribute:
/// ```shell
/// sgdisk --attributes={number}:set:{attr} {device}
/// ```
/// Attributes are given as sgdisk bit names or numbers, e.g. `63` or
/// `RequiredPartition`.
pub fn set_attributes(
    device: &str,
    number: u32,
    attrs: &[String],
) -> Result<(), CurtinError> {
    for attr in attrs {
        let arg = format!("--attributes={number}:set:{attr}");
        shell::exec("sgdisk", &[&arg, device])?;
    }

    Ok(())
}

/// Fields of `sgdisk -i {number} {device}` the verifier compares.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub type_guid: Option<String>,
    pub unique_guid: Option<String>,
    pub name: Option<String>,
    pub attrs: u64,
}

/// Bit position for an sgdisk attribute given as a number or one of
/// the named bits.
pub fn attr_bit(attr: &str) -> Option<u32> {
    match attr {
        "RequiredPartition" => Some(0),
        "NoBlockIOProtocol" => Some(1),
        "LegacyBIOSBootable" => Some(2),
        other => other.parse().ok().filter(|bit| *bit < 64),
    }
}

/// Executes:
/// ```shell
/// sgdisk -i {number} {device}
/// ```
pub fn info(device: &str, number: u32) -> Result<PartInfo, CurtinError> {
    let number_arg = number.to_string();
    let out = shell::exec("sgdisk", &["-i", &number_arg, device])?;
    Ok(parse_info(&out.stdout))
}

pub fn parse_info(output: &str) -> PartInfo {
    let mut info = PartInfo::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "Partition GUID code" => {
                // "C12A7328-... (EFI system partition)"
                info.type_guid = value
                    .split_whitespace()
                    .next()
                    .map(|guid| guid.to_uppercase());
            }
            "Partition unique GUID" => {
                info.unique_guid = Some(value.to_uppercase());
            }
            "Partition name" => {
                info.name = Some(value.trim_matches('\'').to_string());
            }
            "Attribute flags" => {
                info.attrs = u64::from_str_radix(value, 16).unwrap_or(0);
            }
            _ => {}
        }
    }

    info
}
