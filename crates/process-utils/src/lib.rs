//! Process helpers shared across the workspace.
//!
//! Covers two concerns of spawning external tools: keeping Windows from
//! flashing a console window, and finding the tool's executable.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Platform file name for an executable (`ffmpeg` -> `ffmpeg.exe` on Windows).
pub fn executable_name(name: &str) -> String {
    if cfg!(windows) && !name.to_ascii_lowercase().ends_with(".exe") {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Locate an executable by scanning `PATH`, then a list of fallback directories.
///
/// Returns the first candidate that exists as a regular file.
pub fn find_executable(name: &str, fallback_dirs: &[&str]) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH");
    let path_dirs = path_var
        .as_deref()
        .map(|paths| std::env::split_paths(paths).collect::<Vec<_>>())
        .unwrap_or_default();

    find_executable_in(
        name,
        path_dirs
            .iter()
            .map(PathBuf::as_path)
            .chain(fallback_dirs.iter().map(Path::new)),
    )
}

/// Locate an executable in an explicit, ordered list of directories.
pub fn find_executable_in<'a>(
    name: &str,
    dirs: impl IntoIterator<Item = &'a Path>,
) -> Option<PathBuf> {
    let file_name = executable_name(name);
    dirs.into_iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_first_matching_directory() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let binary = executable_name("fake-engine");
        std::fs::write(second.path().join(&binary), b"").unwrap();

        let found = find_executable_in("fake-engine", [first.path(), second.path()]);
        assert_eq!(found, Some(second.path().join(binary)));
    }

    #[test]
    fn ignores_directories_with_the_same_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(executable_name("fake-engine"))).unwrap();

        assert_eq!(find_executable_in("fake-engine", [dir.path()]), None);
    }

    #[test]
    fn missing_executable_is_none() {
        assert_eq!(
            find_executable("definitely-not-a-real-tool-7f3a", &["/nonexistent/bin"]),
            None
        );
    }
}
