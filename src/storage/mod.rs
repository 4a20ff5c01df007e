pub mod graph;
pub mod size;
pub mod validation;

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::errors::CurtinError;
pub use size::Size;

/// Top-level installer config; the engine only reads the `storage` key.
#[derive(Debug, Deserialize)]
pub struct InstallerConfig {
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub version: u32,

    #[serde(default)]
    pub device_map_path: Option<String>,

    #[serde(deserialize_with = "de_entries")]
    pub config: Vec<Entry>,
}

impl StorageConfig {
    #[inline]
    pub fn from_yaml(yaml: &str) -> Result<Self, CurtinError> {
        parse(yaml)
    }
}

/// Parse the full installer YAML and extract the storage document.
pub fn parse(yaml: &str) -> Result<StorageConfig, CurtinError> {
    let installer: InstallerConfig = serde_yaml::from_str(yaml)
        .map_err(|err| CurtinError::BadConfig(err.to_string()))?;

    let storage = installer.storage;
    if !matches!(storage.version, 1 | 2) {
        return Err(CurtinError::BadConfig(format!(
            "unsupported storage config version {}",
            storage.version
        )));
    }

    Ok(storage)
}

/// One entry of `storage.config`, tagged by its `type` key.
///
/// The closed type set replaces runtime-typed dictionaries: every variant
/// carries its own fields and unknown keys are rejected at parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Entry {
    Dasd(Dasd),
    Disk(Disk),
    Partition(Partition),
    Format(Format),
    Mount(Mount),
    LvmVolGroup(LvmVolGroup),
    LvmPartition(LvmPartition),
    DmCrypt(DmCrypt),
    Raid(Raid),
    Bcache(Bcache),
    Zpool(Zpool),
    Zfs(Zfs),
    NvmeController(NvmeController),
    Device(Device),
}

fn de_entries<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<Entry>, D::Error> {
    let raw: Vec<Value> = Vec::deserialize(deserializer)?;

    let mut entries = Vec::with_capacity(raw.len());
    for (i, value) in raw.into_iter().enumerate() {
        let entry = parse_entry(value).map_err(|err| {
            de::Error::custom(format!("config entry #{}: {err:?}", i + 1))
        })?;
        entries.push(entry);
    }

    Ok(entries)
}

// The `type` tag is popped from the mapping before dispatch so that each
// variant struct can reject unknown keys.
fn parse_entry(value: Value) -> Result<Entry, CurtinError> {
    let Value::Mapping(mut map) = value else {
        return Err(CurtinError::BadConfig(String::from(
            "config entry is not a mapping",
        )));
    };

    let tag = map
        .remove(Value::from("type"))
        .ok_or_else(|| CurtinError::BadConfig(String::from("entry without type")))?;

    let Value::String(tag) = tag else {
        return Err(CurtinError::BadConfig(String::from("entry type is not a string")));
    };

    let value = Value::Mapping(map);

    fn typed<T: serde::de::DeserializeOwned>(
        tag: &str,
        value: Value,
    ) -> Result<T, CurtinError> {
        serde_yaml::from_value(value)
            .map_err(|err| CurtinError::BadConfig(format!("bad {tag} entry: {err}")))
    }

    let entry = match tag.as_str() {
        "dasd" => Entry::Dasd(typed(&tag, value)?),
        "disk" => Entry::Disk(typed(&tag, value)?),
        "partition" => Entry::Partition(typed(&tag, value)?),
        "format" => Entry::Format(typed(&tag, value)?),
        "mount" => Entry::Mount(typed(&tag, value)?),
        "lvm_volgroup" => Entry::LvmVolGroup(typed(&tag, value)?),
        "lvm_partition" => Entry::LvmPartition(typed(&tag, value)?),
        "dm_crypt" => Entry::DmCrypt(typed(&tag, value)?),
        "raid" => Entry::Raid(typed(&tag, value)?),
        "bcache" => Entry::Bcache(typed(&tag, value)?),
        "zpool" => Entry::Zpool(typed(&tag, value)?),
        "zfs" => Entry::Zfs(typed(&tag, value)?),
        "nvme_controller" => Entry::NvmeController(typed(&tag, value)?),
        "device" => Entry::Device(typed(&tag, value)?),
        unknown => {
            return Err(CurtinError::BadConfig(format!(
                "unknown entry type {unknown:?}"
            )));
        }
    };

    Ok(entry)
}

impl Entry {
    pub fn id(&self) -> &str {
        match self {
            Self::Dasd(e) => &e.id,
            Self::Disk(e) => &e.id,
            Self::Partition(e) => &e.id,
            Self::Format(e) => &e.id,
            Self::Mount(e) => &e.id,
            Self::LvmVolGroup(e) => &e.id,
            Self::LvmPartition(e) => &e.id,
            Self::DmCrypt(e) => &e.id,
            Self::Raid(e) => &e.id,
            Self::Bcache(e) => &e.id,
            Self::Zpool(e) => &e.id,
            Self::Zfs(e) => &e.id,
            Self::NvmeController(e) => &e.id,
            Self::Device(e) => &e.id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Dasd(_) => "dasd",
            Self::Disk(_) => "disk",
            Self::Partition(_) => "partition",
            Self::Format(_) => "format",
            Self::Mount(_) => "mount",
            Self::LvmVolGroup(_) => "lvm_volgroup",
            Self::LvmPartition(_) => "lvm_partition",
            Self::DmCrypt(_) => "dm_crypt",
            Self::Raid(_) => "raid",
            Self::Bcache(_) => "bcache",
            Self::Zpool(_) => "zpool",
            Self::Zfs(_) => "zfs",
            Self::NvmeController(_) => "nvme_controller",
            Self::Device(_) => "device",
        }
    }

    pub fn preserve(&self) -> bool {
        match self {
            Self::Dasd(e) => e.preserve,
            Self::Disk(e) => e.preserve,
            Self::Partition(e) => e.preserve,
            Self::Format(e) => e.preserve,
            Self::LvmVolGroup(e) => e.preserve,
            Self::LvmPartition(e) => e.preserve,
            Self::DmCrypt(e) => e.preserve,
            Self::Raid(e) => e.preserve,
            Self::Bcache(e) => e.preserve,
            Self::Device(e) => e.preserve,
            Self::Mount(_) | Self::Zpool(_) | Self::Zfs(_) | Self::NvmeController(_) => {
                false
            }
        }
    }

    /// Ids of the entries this entry references, in field order.
    /// These are the edges of the action graph.
    pub fn deps(&self) -> Vec<&str> {
        fn as_refs(v: &Vec<String>) -> Vec<&str> {
            v.iter().map(String::as_str).collect()
        }

        match self {
            Self::Dasd(_) | Self::NvmeController(_) | Self::Device(_) => vec![],

            Self::Disk(e) => {
                e.nvme_controller.iter().map(String::as_str).collect()
            }

            Self::Partition(e) => vec![e.device.as_str()],
            Self::Format(e) => vec![e.volume.as_str()],

            Self::Mount(e) => {
                e.device.iter().map(String::as_str).collect()
            }

            Self::LvmVolGroup(e) => as_refs(&e.devices),
            Self::LvmPartition(e) => vec![e.volgroup.as_str()],
            Self::DmCrypt(e) => vec![e.volume.as_str()],

            Self::Raid(e) => {
                let mut deps = as_refs(&e.devices);
                deps.extend(e.spare_devices.iter().map(String::as_str));
                deps.extend(e.container.iter().map(String::as_str));
                deps
            }

            Self::Bcache(e) => {
                let mut deps = Vec::new();
                deps.extend(e.backing_device.iter().map(String::as_str));
                deps.extend(e.cache_device.iter().map(String::as_str));
                deps
            }

            Self::Zpool(e) => as_refs(&e.vdevs),
            Self::Zfs(e) => vec![e.pool.as_str()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PTable {
    #[serde(rename = "msdos", alias = "dos")]
    Msdos,

    #[serde(rename = "gpt")]
    Gpt,

    #[serde(rename = "vtoc")]
    Vtoc,
}

impl fmt::Display for PTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Msdos => "msdos",
            Self::Gpt => "gpt",
            Self::Vtoc => "vtoc",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Wipe {
    Superblock,
    SuperblockRecursive,
    Pvremove,
    Zero,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartFlag {
    Logical,
    Extended,
    Boot,
    BiosGrub,
    Swap,
    Lvm,
    Raid,
    Home,
    Prep,
    Msftres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Writethrough,
    Writeback,
    Writearound,
    None,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Writethrough => "writethrough",
            Self::Writeback => "writeback",
            Self::Writearound => "writearound",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
    Container,
}

impl RaidLevel {
    pub fn as_mdadm_arg(&self) -> &'static str {
        match self {
            Self::Raid0 => "0",
            Self::Raid1 => "1",
            Self::Raid5 => "5",
            Self::Raid6 => "6",
            Self::Raid10 => "10",
            Self::Container => "container",
        }
    }
}

impl<'de> Deserialize<'de> for RaidLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;

        let level = match &value {
            Value::Number(n) => match n.as_u64() {
                Some(0) => Some(Self::Raid0),
                Some(1) => Some(Self::Raid1),
                Some(5) => Some(Self::Raid5),
                Some(6) => Some(Self::Raid6),
                Some(10) => Some(Self::Raid10),
                _ => None,
            },
            Value::String(s) => match s.as_str() {
                "0" | "raid0" | "stripe" => Some(Self::Raid0),
                "1" | "raid1" | "mirror" => Some(Self::Raid1),
                "5" | "raid5" => Some(Self::Raid5),
                "6" | "raid6" => Some(Self::Raid6),
                "10" | "raid10" => Some(Self::Raid10),
                "container" => Some(Self::Container),
                _ => None,
            },
            _ => None,
        };

        level.ok_or_else(|| {
            de::Error::custom(format!("invalid raidlevel: {value:?}"))
        })
    }
}

fn de_bool_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        other => Err(de::Error::custom(format!("expected boolean, got {other:?}"))),
    }
}

fn de_opt_u32<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u32>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| de::Error::custom("number out of range")),
        Value::String(s) => s
            .parse::<u32>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("bad number string {s:?}"))),
        other => Err(de::Error::custom(format!("expected number, got {other:?}"))),
    }
}

fn de_opt_string_num<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(de::Error::custom(format!("expected string, got {other:?}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dasd {
    pub id: String,
    pub device_id: String,

    #[serde(default, deserialize_with = "de_opt_u32")]
    pub blocksize: Option<u32>,

    #[serde(default)]
    pub disk_layout: Option<DasdLayout>,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub mode: Option<DasdMode>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub preserve: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DasdLayout {
    Cdl,
    Ldl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DasdMode {
    Quick,
    Full,
    Expand,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Disk {
    pub id: String,

    #[serde(default)]
    pub serial: Option<String>,

    #[serde(default)]
    pub wwn: Option<String>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub multipath: Option<String>,

    #[serde(default)]
    pub nvme_controller: Option<String>,

    #[serde(default)]
    pub device_id: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub ptable: Option<PTable>,

    #[serde(default)]
    pub wipe: Option<Wipe>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "de_bool_int")]
    pub grub_device: bool,

    #[serde(default)]
    pub preserve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Partition {
    pub id: String,
    pub device: String,
    pub size: Size,

    #[serde(default)]
    pub offset: Option<Size>,

    #[serde(default, deserialize_with = "de_opt_u32")]
    pub number: Option<u32>,

    #[serde(default)]
    pub flag: Option<PartFlag>,

    #[serde(default)]
    pub partition_type: Option<String>,

    #[serde(default)]
    pub partition_name: Option<String>,

    #[serde(default)]
    pub attrs: Option<Vec<String>>,

    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub multipath: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub wipe: Option<Wipe>,

    #[serde(default)]
    pub resize: bool,

    #[serde(default, deserialize_with = "de_bool_int")]
    pub grub_device: bool,

    #[serde(default)]
    pub preserve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Format {
    pub id: String,
    pub volume: String,
    pub fstype: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub extra_options: Option<Vec<String>>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub preserve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mount {
    pub id: String,

    #[serde(default)]
    pub device: Option<String>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub spec: Option<String>,

    #[serde(default)]
    pub fstype: Option<String>,

    #[serde(default)]
    pub options: Option<String>,

    #[serde(default, deserialize_with = "de_opt_u32")]
    pub freq: Option<u32>,

    #[serde(default, deserialize_with = "de_opt_u32")]
    pub passno: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LvmVolGroup {
    pub id: String,
    pub name: String,
    pub devices: Vec<String>,

    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub preserve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LvmPartition {
    pub id: String,
    pub name: String,
    pub volgroup: String,

    #[serde(default)]
    pub size: Option<Size>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub preserve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DmCrypt {
    pub id: String,
    pub volume: String,
    pub dm_name: String,

    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub keyfile: Option<String>,

    #[serde(default)]
    pub options: Option<Vec<String>>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub preserve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Raid {
    pub id: String,
    pub name: String,
    pub raidlevel: RaidLevel,

    #[serde(default)]
    pub devices: Vec<String>,

    #[serde(default)]
    pub spare_devices: Vec<String>,

    #[serde(default)]
    pub container: Option<String>,

    #[serde(default, deserialize_with = "de_opt_string_num")]
    pub metadata: Option<String>,

    #[serde(default)]
    pub mdname: Option<String>,

    #[serde(default)]
    pub ptable: Option<PTable>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub wipe: Option<Wipe>,

    #[serde(default)]
    pub preserve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bcache {
    pub id: String,

    #[serde(default)]
    pub backing_device: Option<String>,

    #[serde(default)]
    pub cache_device: Option<String>,

    #[serde(default)]
    pub cache_mode: Option<CacheMode>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub preserve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Zpool {
    pub id: String,
    pub pool: String,
    pub vdevs: Vec<String>,

    #[serde(default)]
    pub mountpoint: Option<String>,

    #[serde(default)]
    pub pool_properties: BTreeMap<String, Value>,

    #[serde(default)]
    pub fs_properties: BTreeMap<String, Value>,

    #[serde(default)]
    pub default_features: Option<bool>,

    #[serde(default)]
    pub encryption_style: Option<EncryptionStyle>,

    #[serde(default)]
    pub keyfile: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionStyle {
    LuksKeystore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Zfs {
    pub id: String,
    pub pool: String,
    pub volume: String,

    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NvmeController {
    pub id: String,
    pub transport: NvmeTransport,

    #[serde(default)]
    pub tcp_addr: Option<String>,

    #[serde(default, deserialize_with = "de_opt_u32")]
    pub tcp_port: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NvmeTransport {
    Pcie,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Device {
    pub id: String,
    pub path: String,

    #[serde(default)]
    pub ptable: Option<PTable>,

    #[serde(default)]
    pub preserve: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC_GPT: &str = r#"
storage:
  version: 1
  config:
    - type: disk
      id: disk0
      serial: QM00002
      ptable: gpt
      wipe: superblock
      grub_device: true
    - type: partition
      id: disk0-part1
      device: disk0
      size: 1M
      flag: bios_grub
    - type: partition
      id: disk0-part2
      device: disk0
      size: 3G
    - type: format
      id: disk0-part2-format
      volume: disk0-part2
      fstype: ext4
    - type: mount
      id: disk0-part2-mount
      device: disk0-part2-format
      path: /
"#;

    #[test]
    fn test_parse_basic() {
        let storage = parse(BASIC_GPT).expect("basic config must parse");

        assert_eq!(storage.version, 1);
        assert_eq!(storage.config.len(), 5);

        let Entry::Disk(disk) = &storage.config[0] else {
            panic!("first entry is not a disk");
        };
        assert_eq!(disk.serial.as_deref(), Some("QM00002"));
        assert_eq!(disk.ptable, Some(PTable::Gpt));
        assert!(disk.grub_device);

        let Entry::Partition(bios_grub) = &storage.config[1] else {
            panic!("second entry is not a partition");
        };
        assert_eq!(bios_grub.size, Size(1 << 20));
        assert_eq!(bios_grub.flag, Some(PartFlag::BiosGrub));

        assert_eq!(storage.config[3].deps(), vec!["disk0-part2"]);
        assert_eq!(storage.config[4].deps(), vec!["disk0-part2-format"]);
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let yaml = r#"
storage:
  version: 1
  config:
    - type: floppy
      id: fd0
"#;
        let err = parse(yaml).expect_err("unknown type must fail");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        let yaml = r#"
storage:
  version: 1
  config:
    - type: disk
      id: disk0
      serial: QM00002
      frobnicate: yes
"#;
        let err = parse(yaml).expect_err("unknown key must fail");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        let yaml = "storage:\n  version: 3\n  config: []\n";
        parse(yaml).expect_err("version 3 must fail");
    }

    #[test]
    fn test_raidlevel_forms() {
        struct Test<'a> {
            yaml: &'a str,
            expected: RaidLevel,
        }

        let tests = vec![
            Test { yaml: "raidlevel: 1", expected: RaidLevel::Raid1 },
            Test { yaml: "raidlevel: raid1", expected: RaidLevel::Raid1 },
            Test { yaml: "raidlevel: mirror", expected: RaidLevel::Raid1 },
            Test { yaml: "raidlevel: '10'", expected: RaidLevel::Raid10 },
            Test { yaml: "raidlevel: 5", expected: RaidLevel::Raid5 },
        ];

        #[derive(Deserialize, Debug)]
        struct Doc {
            raidlevel: RaidLevel,
        }

        for test in tests {
            let doc: Doc = serde_yaml::from_str(test.yaml)
                .unwrap_or_else(|err| panic!("{}: {err}", test.yaml));
            assert_eq!(test.expected, doc.raidlevel, "case: {}", test.yaml);
        }

        serde_yaml::from_str::<Doc>("raidlevel: 7").expect_err("raid7 is invalid");
    }

    #[test]
    fn test_dm_crypt_fields() {
        let yaml = r#"
storage:
  version: 1
  config:
    - type: dm_crypt
      id: crypt0
      volume: disk0-part2
      dm_name: cryptroot
      keyfile: /dev/urandom
"#;
        let storage = parse(yaml).unwrap();
        let Entry::DmCrypt(crypt) = &storage.config[0] else {
            panic!("not dm_crypt");
        };
        assert_eq!(crypt.keyfile.as_deref(), Some("/dev/urandom"));
        assert!(crypt.key.is_none());
    }
}
