//! Parsing of `/proc/[pid]/cgroup` for diagnostics.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use cordon_common::error::{CordonError, Result};

/// Parses the given cgroup file, typically `/proc/self/cgroup` or
/// `/proc/<pid>/cgroup`, into a map of controllers to cgroup paths,
/// e.g. `"cpu" -> "/user.slice"`.
///
/// On a v2 unified hierarchy there are no per-controller paths, so the
/// resulting map has a single element keyed by the empty string.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line does not have
/// the `hierarchy-ID:controller-list:path` shape.
pub fn parse_cgroup_file(path: &Path) -> Result<HashMap<String, String>> {
    let file = std::fs::File::open(path).map_err(|e| CordonError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_cgroup_from_reader(std::io::BufReader::new(file))
}

/// Reader-driven variant of [`parse_cgroup_file`].
///
/// # Errors
///
/// Returns an error on malformed lines or read failures.
pub fn parse_cgroup_from_reader(reader: impl BufRead) -> Result<HashMap<String, String>> {
    let mut cgroups = HashMap::new();

    for line in reader.lines() {
        let line = line.map_err(|e| CordonError::Io {
            path: "/proc/[pid]/cgroup".into(),
            source: e,
        })?;
        // From cgroups(7), each hierarchy contributes one line of three
        // colon-separated fields: hierarchy-ID:controller-list:path.
        let mut parts = line.splitn(3, ':');
        let (Some(_id), Some(controllers), Some(path)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CordonError::Config {
                message: format!("invalid cgroup entry: must contain at least two colons: {line}"),
            });
        };
        for controller in controllers.split(',') {
            let _ = cgroups.insert(controller.to_owned(), path.to_owned());
        }
    }
    Ok(cgroups)
}
