use crate::errors::CurtinError;
use crate::utils::shell;

/// Executes:
/// ```shell
/// sfdisk --part-type {device} {number} {type}
/// ```
/// `part_type` is a raw MBR type byte like `82` or `0x82`.
pub fn set_part_type(
    device: &str,
    number: u32,
    part_type: &str,
) -> Result<(), CurtinError> {
    let number_arg = number.to_string();
    let type_arg = part_type.trim_start_matches("0x");

    shell::exec(
        "sfdisk",
        &["--part-type", device, &number_arg, type_arg],
    )?;

    Ok(())
}

/// Executes:
/// ```shell
/// sfdisk --part-type {device} {number}
/// ```
/// (query form; prints the type byte)
pub fn get_part_type(device: &str, number: u32) -> Result<String, CurtinError> {
    let number_arg = number.to_string();
    let out = shell::exec("sfdisk", &["--part-type", device, &number_arg])?;
    Ok(out.stdout.trim().to_lowercase())
}
