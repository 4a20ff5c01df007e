use crate::errors::CurtinError;
use crate::storage::RaidLevel;
use crate::utils::shell;

/// Executes:
/// ```shell
/// mdadm --create {md} --run --homehost=any --metadata={v} --level={L} \
///     --raid-devices={N} --assume-clean {members...} \
///     [--spare-devices={K} {spares...}]
/// ```
/// `--assume-clean` skips the initial resync; the installer writes over
/// the whole array anyway.
pub fn create(
    md_path: &str,
    level: RaidLevel,
    metadata: &str,
    members: &[&str],
    spares: &[&str],
    container: Option<&str>,
) -> Result<(), CurtinError> {
    let level_arg = format!("--level={}", level.as_mdadm_arg());
    let metadata_arg = format!("--metadata={metadata}");
    let raid_devices_arg = format!("--raid-devices={}", members.len());
    let spares_arg = format!("--spare-devices={}", spares.len());

    let mut args = vec![
        "--create",
        md_path,
        "--run",
        "--homehost=any",
        &level_arg,
        &raid_devices_arg,
    ];

    // a member array inside a container inherits its metadata
    match container {
        Some(container_path) => args.push(container_path),
        None => args.push(&metadata_arg),
    }

    if level != RaidLevel::Container {
        args.push("--assume-clean");
    }

    args.extend(members);

    if !spares.is_empty() {
        args.push(&spares_arg);
        args.extend(spares);
    }

    shell::exec("mdadm", &args)?;
    Ok(())
}
