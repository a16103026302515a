//! Machine identity of a migration job

use std::path::Path;

/// Machine a source tree was recorded on
///
/// For a network share (`//server/data`, `\\server\data`) this is the
/// server name; otherwise the local host name.
#[must_use]
pub fn default_machine(source_root: &Path) -> String {
    share_server(&source_root.to_string_lossy()).unwrap_or_else(local_hostname)
}

fn share_server(path: &str) -> Option<String> {
    if !(path.starts_with("//") || path.starts_with(r"\\")) {
        return None;
    }
    path.trim_start_matches(['/', '\\'])
        .split(['/', '\\'])
        .next()
        .filter(|server| !server.is_empty() && *server != "?" && *server != ".")
        .map(str::to_string)
}

#[cfg(unix)]
fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(not(unix))]
fn local_hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_server() {
        assert_eq!(share_server("//moli/data"), Some("moli".to_string()));
        assert_eq!(share_server(r"\\moli\data\crab.dir"), Some("moli".to_string()));
        assert_eq!(share_server("/home/lab/data"), None);
        assert_eq!(share_server(r"\\?\C:\data"), None);
    }

    #[test]
    fn test_local_root_uses_hostname() {
        let machine = default_machine(Path::new("/tmp/data"));
        assert!(!machine.is_empty());
        assert_eq!(machine, local_hostname());
    }
}
