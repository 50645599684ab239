use std::path::PathBuf;

use crate::utils::dir::APPLICATION_NAME;

/// The daemon binary ships next to the cli one.
pub fn to_daemon_path(mut path: PathBuf) -> PathBuf {
    path.set_file_name(format!("{APPLICATION_NAME}-daemon"));
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    path
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::to_daemon_path;

    #[test]
    fn test_daemon_next_to_cli() {
        let path = to_daemon_path(PathBuf::from("/opt/bin/exewatch"));
        #[cfg(not(windows))]
        assert_eq!(path, PathBuf::from("/opt/bin/exewatch-daemon"));
        #[cfg(windows)]
        assert_eq!(path, PathBuf::from("/opt/bin/exewatch-daemon.exe"));
    }
}
