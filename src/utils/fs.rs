use std::path::Path;

use crate::errors::CurtinError;

pub fn read_file<P>(path: P) -> Result<String, CurtinError>
where
    P: AsRef<Path>,
{
    std::fs::read_to_string(path.as_ref()).map_err(|err| {
        CurtinError::NoSuchFile(err, path.as_ref().display().to_string())
    })
}

/// Write `contents` to `path`, creating parent directories as needed.
pub fn write_file<P>(path: P, contents: &str) -> Result<(), CurtinError>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            CurtinError::NoSuchFile(err, parent.display().to_string())
        })?;
    }

    std::fs::write(path, contents)
        .map_err(|err| CurtinError::NoSuchFile(err, path.display().to_string()))
}
