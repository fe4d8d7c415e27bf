//! Host environment probes used by `/env` and the system prompt.

use std::{
    ffi::{OsStr, OsString},
    path::Path,
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use azsh_mentions::EnvLookup;

/// Tools `/env` reports when found on `PATH`.
pub(crate) const PROBED_TOOLS: &[&str] = &[
    "az", "kubectl", "helm", "terraform", "git", "gh", "python3", "azcopy", "bicep",
];

pub(crate) fn detect_cloud_shell(env: &EnvLookup) -> bool {
    ["CLOUD_SHELL_ID", "ACC_CLOUD"]
        .into_iter()
        .any(|key| env(key).is_some_and(|value| !value.is_empty()))
}

pub(crate) fn environment_label(cloud_shell: bool) -> &'static str {
    if cloud_shell {
        "Azure Cloud Shell"
    } else {
        "Local Terminal"
    }
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

pub(crate) fn is_executable_available_in(executable: &str, path_var: Option<&OsStr>) -> bool {
    let trimmed = executable.trim();
    if trimmed.is_empty() {
        return false;
    }
    let candidate = Path::new(trimmed);
    if candidate.is_absolute() || trimmed.contains(std::path::MAIN_SEPARATOR) {
        return is_executable_file(candidate);
    }
    let Some(path_var) = path_var else {
        return false;
    };
    std::env::split_paths(path_var).any(|mut dir| {
        dir.push(trimmed);
        is_executable_file(&dir)
    })
}

/// Returns the probed tools present on `path_var`, in probe order.
pub(crate) fn available_tools(path_var: Option<&OsStr>) -> Vec<&'static str> {
    PROBED_TOOLS
        .iter()
        .copied()
        .filter(|tool| is_executable_available_in(tool, path_var))
        .collect()
}

pub(crate) fn process_path() -> Option<OsString> {
    std::env::var_os("PATH")
}
