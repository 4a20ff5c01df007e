use crate::errors::CurtinError;
use crate::storage::PTable;
use crate::utils::shell;

/// Executes:
/// ```shell
/// parted --script {device} mklabel {msdos|gpt}
/// ```
pub fn mklabel(device: &str, table: PTable) -> Result<(), CurtinError> {
    let label = match table {
        PTable::Msdos => "msdos",
        PTable::Gpt => "gpt",
        // vtoc labels are written by fdasd, not parted
        PTable::Vtoc => {
            return Err(CurtinError::CurtinRsBug(format!(
                "vtoc label on {device} must go through fdasd"
            )));
        }
    };

    shell::exec("parted", &["--script", device, "mklabel", label])?;
    Ok(())
}

/// Executes:
/// ```shell
/// parted --script {device} unit B mkpart {part_word} {start}B {end}B
/// ```
/// `end` is inclusive, parted-style. On gpt tables the part word is
/// taken as the partition name; callers pass "primary" and set the real
/// name afterwards.
pub fn mkpart(
    device: &str,
    part_word: &str,
    start: u64,
    end: u64,
) -> Result<(), CurtinError> {
    let start_arg = format!("{start}B");
    let end_arg = format!("{end}B");

    shell::exec(
        "parted",
        &[
            "--script", device, "unit", "B", "mkpart", part_word, &start_arg,
            &end_arg,
        ],
    )?;

    Ok(())
}

/// Executes:
/// ```shell
/// parted --script {device} set {number} {flag} on
/// ```
pub fn set_flag(device: &str, number: u32, flag: &str) -> Result<(), CurtinError> {
    let number_arg = number.to_string();
    shell::exec(
        "parted",
        &["--script", device, "set", &number_arg, flag, "on"],
    )?;

    Ok(())
}

/// Executes:
/// ```shell
/// parted --script {device} name {number} {name}
/// ```
pub fn name_partition(
    device: &str,
    number: u32,
    name: &str,
) -> Result<(), CurtinError> {
    let number_arg = number.to_string();
    shell::exec("parted", &["--script", device, "name", &number_arg, name])?;
    Ok(())
}

/// Executes:
/// ```shell
/// parted --script {device} rm {number}
/// ```
pub fn rm(device: &str, number: u32) -> Result<(), CurtinError> {
    let number_arg = number.to_string();
    shell::exec("parted", &["--script", device, "rm", &number_arg])?;
    Ok(())
}
