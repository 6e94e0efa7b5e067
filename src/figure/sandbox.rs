//! Static capability checks, resource limits and the script preamble for
//! plotting code.
//!
//! Scripts are rejected before launch when they import modules outside the
//! allow-list, reach the operating system through an allowed package, or
//! use dynamic code execution. The process itself runs behind an isolation
//! wrapper and under `prlimit`. The preamble forces a non-interactive
//! plotting backend and loads the data tables into `TABLES`.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// File the tables are serialized to inside the figure directory.
pub const TABLES_FILE: &str = "tables.json";
/// File the combined preamble and script are written to.
pub const SCRIPT_FILE: &str = "plot.py";
/// Image extensions accepted as plot output.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "pdf", "svg"];
/// Program that applies [`SandboxLimits`] before exec'ing the interpreter.
pub const PRLIMIT: &str = "prlimit";

/// Modules a script may never reach, even when an allowed package
/// re-exports them.
pub const SENSITIVE_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "socket",
    "builtins",
    "importlib",
    "ctypes",
    "pathlib",
    "multiprocessing",
];

/// Resource limits for one plotting process. Zero leaves a limit unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Address space in bytes.
    pub memory_limit: u64,
    /// CPU time in seconds.
    pub cpu_seconds: u64,
    /// Largest file the script may write, in bytes.
    pub file_size_limit: u64,
    /// Open file descriptors.
    pub open_files: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_limit: 2 * 1024 * 1024 * 1024,
            cpu_seconds: 120,
            file_size_limit: 64 * 1024 * 1024,
            open_files: 256,
        }
    }
}

impl SandboxLimits {
    pub fn unlimited() -> Self {
        Self {
            memory_limit: 0,
            cpu_seconds: 0,
            file_size_limit: 0,
            open_files: 0,
        }
    }

    /// `prlimit` prefix enforcing the limits; empty when nothing is limited.
    pub fn prlimit_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            ("--as", self.memory_limit),
            ("--cpu", self.cpu_seconds),
            ("--fsize", self.file_size_limit),
            ("--nofile", self.open_files),
        ]
        .into_iter()
        .filter(|(_, value)| *value > 0)
        .map(|(flag, value)| format!("{}={}", flag, value))
        .collect();

        if !args.is_empty() {
            args.insert(0, PRLIMIT.to_string());
        }
        args
    }
}

/// Prepended to every plotting script.
pub const PREAMBLE: &str = r#"import json as _lf_json
import socket as _lf_socket


def _lf_denied(*args, **kwargs):
    raise PermissionError("network access is disabled for plotting scripts")


_lf_socket.socket = _lf_denied
_lf_socket.create_connection = _lf_denied
_lf_socket.getaddrinfo = _lf_denied

import matplotlib

matplotlib.use("Agg")
import matplotlib.pyplot as plt

plt.rcParams["axes.unicode_minus"] = False

with open("tables.json", encoding="utf-8") as _lf_fh:
    TABLES = _lf_json.load(_lf_fh)

del _lf_fh, _lf_json, _lf_socket
"#;

fn import_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:from\s+(\S+)\s+import\s+(.+)|import\s+(.+))").ok()
    })
    .as_ref()
}

fn forbidden_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"(?:^|[^.\w])(?:exec|eval|compile|globals|locals|vars|getattr|setattr|delattr|open|input|breakpoint|__import__)\s*\(|\.\s*(?:{})\b|\.\s*__\w+__|__builtins__|__loader__|__spec__",
            SENSITIVE_MODULES.join("|")
        );
        Regex::new(&pattern).ok()
    })
    .as_ref()
}

fn sensitive(name: &str) -> bool {
    name.split('.').any(|part| SENSITIVE_MODULES.contains(&part.trim()))
}

/// Top-level module names a script imports.
///
/// Fails when any imported path or name is one of [`SENSITIVE_MODULES`],
/// so `from matplotlib import os` is caught even though `matplotlib` is
/// allowed.
pub fn imported_modules(script: &str) -> Result<BTreeSet<String>, String> {
    let re = import_regex().ok_or("import pattern unavailable")?;
    let mut modules = BTreeSet::new();

    for line in script.lines() {
        let code = line.split('#').next().unwrap_or("");
        let Some(caps) = re.captures(code) else { continue };

        if let (Some(from), Some(names)) = (caps.get(1), caps.get(2)) {
            let name = from.as_str();
            if name.starts_with('.') {
                return Err(format!("relative import '{}' is not allowed", name));
            }
            if sensitive(name) {
                return Err(format!("import of '{}' is not allowed", name));
            }
            for item in import_items(names.as_str()) {
                if sensitive(item) {
                    return Err(format!("import of '{}' is not allowed", item));
                }
            }
            modules.insert(root_module(name));
        } else if let Some(list) = caps.get(3) {
            for name in import_items(list.as_str()) {
                if sensitive(name) {
                    return Err(format!("import of '{}' is not allowed", name));
                }
                modules.insert(root_module(name));
            }
        }
    }

    Ok(modules)
}

/// Names in an import list, without aliases or parentheses.
fn import_items(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').filter_map(|item| {
        item.trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace())
            .split_whitespace()
            .next()
    })
}

fn root_module(name: &str) -> String {
    name.split('.').next().unwrap_or(name).trim().to_string()
}

/// Checks a script against the import allow-list and the forbidden builtins.
///
/// Returns a human-readable reason when the script is rejected.
pub fn check_script(script: &str, allowed_imports: &[String]) -> Result<(), String> {
    if script.trim().is_empty() {
        return Err("plotting script is empty".to_string());
    }

    for module in imported_modules(script)? {
        if !allowed_imports.iter().any(|m| *m == module) {
            return Err(format!("import of '{}' is not allowed", module));
        }
    }

    let forbidden = forbidden_regex().ok_or("capability pattern unavailable")?;
    if let Some(m) = forbidden.find(script) {
        return Err(format!(
            "use of '{}' is not allowed",
            m.as_str().trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
        ));
    }

    Ok(())
}

/// Full program text: preamble followed by the generated script.
pub fn build_program(script: &str) -> String {
    format!("{}\n# --- generated plotting code ---\n{}\n", PREAMBLE, script)
}
