/// Protected-path classification for the deletion service.
///
/// [`classify`] is pure string inspection: it never touches the filesystem
/// or the index, so the verdict for a path is the same whether or not the
/// path exists. Windows paths (`C:\...`) are recognised on every platform
/// and separators may be `/` or `\`.
///
/// Components are compared case-insensitively and `.`/`..` are resolved
/// lexically first, so `/home/../usr` is treated as `/usr`.
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathClass {
    /// A filesystem root or an operating-system area.
    SystemCritical,
    /// A file whose name marks it as an OS swap, hibernation or boot file.
    ProtectedName,
    Safe,
}

impl PathClass {
    pub fn is_protected(self) -> bool {
        !matches!(self, Self::Safe)
    }
}

/// Top-level directories of a Windows drive that are off limits.
const WINDOWS_DRIVE_DIRS: &[&str] = &[
    "windows",
    "program files",
    "program files (x86)",
    "programdata",
    "system volume information",
    "recovery",
    "boot",
];

/// Trash folders, protected wherever they appear.
const TRASH_DIRS: &[&str] = &["$recycle.bin", ".trash", ".trashes"];

/// Top-level Unix directories that are off limits, with everything below.
const UNIX_ROOT_DIRS: &[&str] = &[
    "bin", "boot", "dev", "etc", "lib", "lib32", "lib64", "proc", "sbin", "sys", "usr", "system",
    "library",
];

/// Deeper Unix prefixes that are off limits.
const UNIX_PREFIXES: &[&[&str]] = &[&["var", "lib"]];

const PROTECTED_NAMES: &[&str] = &[
    "pagefile.sys",
    "hiberfil.sys",
    "swapfile.sys",
    "bootmgr",
    "bootnxt",
    "ntldr",
    "swapfile",
];

/// Classify `path` for deletion.
pub fn classify(path: &Path) -> PathClass {
    let text = path.to_string_lossy();
    let parsed = Parsed::new(&text);
    let comps = &parsed.components;

    // Filesystem roots, drive and share roots, raw devices and the empty path.
    if comps.is_empty() || parsed.device {
        return PathClass::SystemCritical;
    }

    if comps.iter().any(|c| TRASH_DIRS.contains(&c.as_str())) {
        return PathClass::SystemCritical;
    }

    if let Some(pos) = comps.iter().position(|c| c == "windows") {
        if comps[pos + 1..]
            .iter()
            .any(|c| c == "system32" || c == "syswow64")
        {
            return PathClass::SystemCritical;
        }
    }

    if parsed.drive && WINDOWS_DRIVE_DIRS.contains(&comps[0].as_str()) {
        return PathClass::SystemCritical;
    }

    if parsed.unix_absolute {
        if UNIX_ROOT_DIRS.contains(&comps[0].as_str()) {
            return PathClass::SystemCritical;
        }
        let under_prefix = UNIX_PREFIXES.iter().any(|prefix| {
            comps.len() >= prefix.len() && comps.iter().zip(prefix.iter()).all(|(c, p)| c == p)
        });
        if under_prefix {
            return PathClass::SystemCritical;
        }
    }

    if let Some(name) = comps.last() {
        if PROTECTED_NAMES.contains(&name.as_str()) {
            return PathClass::ProtectedName;
        }
    }

    PathClass::Safe
}

/// Lowercased, lexically normalised components of a path string.
struct Parsed {
    /// Starts with a drive letter (`C:`) or a UNC share (`\\server\share`).
    drive: bool,
    /// Starts with a separator and has no drive letter.
    unix_absolute: bool,
    /// A `\\.\` device path that names no drive.
    device: bool,
    components: Vec<String>,
}

/// ASCII case-insensitive `strip_prefix`.
fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

impl Parsed {
    fn new(text: &str) -> Self {
        // Only backslashes introduce a UNC share; `//usr` is `/usr` on Unix.
        let backslash_unc = text.starts_with("\\\\");
        let normalised = text.replace('\\', "/");
        let mut rest = normalised.as_str();

        let mut unc = false;
        let mut device_ns = false;
        if let Some(r) = strip_prefix_ci(rest, "//?/unc/").or_else(|| strip_prefix_ci(rest, "//./unc/")) {
            rest = r;
            unc = true;
        } else if let Some(r) = rest.strip_prefix("//?/") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix("//./") {
            rest = r;
            device_ns = true;
        } else if backslash_unc {
            rest = &rest[2..];
            unc = true;
        }

        let mut drive = false;
        if unc {
            // Server and share form the root, like a drive letter.
            let mut parts = rest.splitn(3, '/');
            let server = parts.next().unwrap_or_default();
            let share = parts.next().unwrap_or_default();
            rest = if server.is_empty() || share.is_empty() {
                ""
            } else {
                parts.next().unwrap_or_default()
            };
            drive = true;
        } else {
            let bytes = rest.as_bytes();
            if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
                rest = &rest[2..];
                drive = true;
            }
        }
        let device = device_ns && !drive;
        let unix_absolute = !drive && !device_ns && rest.starts_with('/');

        let mut components: Vec<String> = Vec::new();
        for part in rest.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                other => components.push(other.to_lowercase()),
            }
        }

        Self {
            drive,
            unix_absolute,
            device,
            components,
        }
    }
}
