use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::executor::ProcessExecutor;
use crate::validator;

/// Fixed prefix every toolkit execution failure is collapsed into before
/// leaving this component. The structured error kind does not survive
/// this boundary, only its message text.
pub const TOOLKIT_ERROR_PREFIX: &str = "Error executing toolkit command: ";

/// Invoked once, with captured stdout/stderr and the exit code, when a
/// toolkit command completes successfully. Never invoked on failure.
pub type CompletionCallback = Box<dyn FnOnce(Vec<u8>, Vec<u8>, i32) + Send + 'static>;

// The native chooser is a UI-affine resource: at most one interaction at
// a time, never on the reactor.
static CHOOSER_GUARD: Mutex<()> = Mutex::const_new(());
static CHOOSER_CONTEXT: OnceLock<()> = OnceLock::new();

fn ensure_chooser_context() {
    CHOOSER_CONTEXT.get_or_init(|| {
        #[cfg(target_os = "linux")]
        if std::env::var_os("DISPLAY").is_none() && std::env::var_os("WAYLAND_DISPLAY").is_none() {
            tracing::warn!("no display server detected; native chooser requests will return nothing");
        }
    });
}

/// Directories are returned with exactly one trailing separator so a
/// caller can tell files from directories without a second filesystem
/// check.
pub fn normalize_picked_path(path: &Path) -> String {
    let mut text = path.to_string_lossy().into_owned();
    if path.is_dir() {
        while text.ends_with(['/', '\\']) {
            text.pop();
        }
        text.push(MAIN_SEPARATOR);
    }
    text
}

/// OS interface for toolkit commands: validation + execution, the native
/// file chooser, and the platform opener. Stateless per call; safe to
/// invoke concurrently from multiple workers.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// (primary, fallback) script names probed inside a pipeline
    /// configuration directory.
    fn toolkit_script_names(&self) -> (&'static str, &'static str) {
        ("shotgun", "tank")
    }

    /// External launcher executable consulted before the platform opener.
    fn launcher(&self) -> Option<&Path>;

    /// Platform command line that hands a file to the desktop environment.
    fn opener_argv(&self, filepath: &Path) -> Vec<String>;

    /// Validates and runs a whitelisted toolkit command to completion.
    ///
    /// The blocking child wait runs on a worker thread so the network
    /// loop keeps servicing connections while the command runs. Either
    /// validation fully passes and the process runs to completion, or
    /// nothing is launched.
    async fn execute_toolkit_command(
        &self,
        pipeline_config_path: &Path,
        command: &str,
        args: &[String],
        on_complete: CompletionCallback,
    ) -> Result<()> {
        let (primary, fallback) = self.toolkit_script_names();
        let pipeline_config_path = pipeline_config_path.to_path_buf();
        let command = command.to_owned();
        let args = args.to_vec();

        let outcome = tokio::task::spawn_blocking(move || {
            let resolved =
                validator::validate(&pipeline_config_path, &command, primary, fallback)
                    .map_err(|err| err.to_string())?;
            let mut argv = Vec::with_capacity(args.len() + 2);
            argv.push(resolved.to_string_lossy().into_owned());
            argv.push(command);
            argv.extend(args);
            debug!("running toolkit command: {argv:?}");
            ProcessExecutor::run(&argv).map_err(|err| err.to_string())
        })
        .await
        .context("toolkit execution worker panicked")?;

        match outcome {
            Ok(result) => {
                on_complete(result.stdout, result.stderr, result.exit_code);
                Ok(())
            }
            Err(message) => Err(anyhow!("{TOOLKIT_ERROR_PREFIX}{message}")),
        }
    }

    /// Hands a file to the configured launcher, or to the desktop
    /// environment's default opener.
    async fn open(&self, filepath: &Path) -> Result<()> {
        if !filepath.is_file() {
            bail!("Error opening file [{}]. File not found.", filepath.display());
        }

        let target = filepath.to_string_lossy().into_owned();
        let argv = match self.launcher() {
            Some(launcher) => vec![launcher.to_string_lossy().into_owned(), target],
            None => self.opener_argv(filepath),
        };
        tokio::task::spawn_blocking(move || ProcessExecutor::run(&argv).map(|_| ()))
            .await
            .context("opener worker panicked")?
            .map_err(anyhow::Error::new)
    }

    /// Pops up the native selection surface and returns the chosen
    /// absolute paths, directories suffixed with a trailing separator.
    /// Cancellation yields an empty list.
    async fn pick_file_or_directory(&self, multi: bool) -> Result<Vec<String>> {
        let _interaction = CHOOSER_GUARD.lock().await;
        ensure_chooser_context();

        let picked = tokio::task::spawn_blocking(move || {
            let dialog = rfd::FileDialog::new();
            if multi {
                dialog.pick_files().unwrap_or_default()
            } else {
                dialog.pick_file().map(|path| vec![path]).unwrap_or_default()
            }
        })
        .await
        .context("chooser worker panicked")?;

        Ok(picked
            .iter()
            .map(|path| normalize_picked_path(path))
            .collect())
    }
}

pub struct MacProcessManager {
    launcher: Option<PathBuf>,
}

impl MacProcessManager {
    pub fn new(launcher: Option<PathBuf>) -> Self {
        Self { launcher }
    }
}

#[async_trait]
impl ProcessManager for MacProcessManager {
    fn launcher(&self) -> Option<&Path> {
        self.launcher.as_deref()
    }

    fn opener_argv(&self, filepath: &Path) -> Vec<String> {
        vec![
            "open".to_owned(),
            filepath.to_string_lossy().into_owned(),
        ]
    }
}

pub struct WindowsProcessManager {
    launcher: Option<PathBuf>,
}

impl WindowsProcessManager {
    pub fn new(launcher: Option<PathBuf>) -> Self {
        Self { launcher }
    }
}

#[async_trait]
impl ProcessManager for WindowsProcessManager {
    // Toolkit installs ship batch entry points on Windows.
    fn toolkit_script_names(&self) -> (&'static str, &'static str) {
        ("shotgun.bat", "tank.bat")
    }

    fn launcher(&self) -> Option<&Path> {
        self.launcher.as_deref()
    }

    fn opener_argv(&self, filepath: &Path) -> Vec<String> {
        vec![
            "cmd".to_owned(),
            "/C".to_owned(),
            "start".to_owned(),
            String::new(),
            filepath.to_string_lossy().into_owned(),
        ]
    }
}

pub struct LinuxProcessManager {
    launcher: Option<PathBuf>,
}

impl LinuxProcessManager {
    pub fn new(launcher: Option<PathBuf>) -> Self {
        Self { launcher }
    }
}

#[async_trait]
impl ProcessManager for LinuxProcessManager {
    fn launcher(&self) -> Option<&Path> {
        self.launcher.as_deref()
    }

    fn opener_argv(&self, filepath: &Path) -> Vec<String> {
        vec![
            "xdg-open".to_owned(),
            filepath.to_string_lossy().into_owned(),
        ]
    }
}

/// Selects the concrete manager for the host operating system. Exactly
/// one variant exists per process; no runtime re-selection.
pub fn create(launcher: Option<PathBuf>) -> Arc<dyn ProcessManager> {
    match std::env::consts::OS {
        "macos" => Arc::new(MacProcessManager::new(launcher)),
        "windows" => Arc::new(WindowsProcessManager::new(launcher)),
        _ => Arc::new(LinuxProcessManager::new(launcher)),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{
        create, ensure_chooser_context, normalize_picked_path, ProcessManager,
        TOOLKIT_ERROR_PREFIX,
    };

    fn temp_dir(tag: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("shotgun-bridge-manager-{tag}-{stamp}"));
        std::fs::create_dir_all(&path).expect("create scratch dir");
        path
    }

    #[cfg(unix)]
    fn write_script(dir: &std::path::Path, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, body).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("mark executable");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn round_trip_delivers_output_through_completion_callback() {
        let dir = temp_dir("roundtrip");
        write_script(&dir, "shotgun", "#!/bin/sh\nprintf pong\nexit 0\n");

        let manager = create(None);
        let (tx, rx) = std::sync::mpsc::channel();
        manager
            .execute_toolkit_command(
                &dir,
                "shotgun",
                &["ping".to_owned()],
                Box::new(move |stdout, stderr, exit_code| {
                    let _ = tx.send((stdout, stderr, exit_code));
                }),
            )
            .await
            .expect("toolkit command succeeds");

        let (stdout, stderr, exit_code) = rx.try_recv().expect("callback ran");
        assert_eq!(stdout, b"pong");
        assert!(stderr.is_empty());
        assert_eq!(exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_child_surfaces_prefixed_error_with_stderr() {
        let dir = temp_dir("failing");
        write_script(&dir, "shotgun", "#!/bin/sh\necho cache rebuild failed >&2\nexit 1\n");

        let manager = create(None);
        let callback_ran = Arc::new(AtomicBool::new(false));
        let flag = callback_ran.clone();
        let err = manager
            .execute_toolkit_command(
                &dir,
                "shotgun_cache",
                &[],
                Box::new(move |_, _, _| flag.store(true, Ordering::SeqCst)),
            )
            .await
            .expect_err("child exits non-zero");

        let message = err.to_string();
        assert!(message.starts_with(TOOLKIT_ERROR_PREFIX));
        assert!(message.contains("cache rebuild failed"));
        assert!(!callback_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn validation_failure_never_invokes_callback() {
        let manager = create(None);
        let callback_ran = Arc::new(AtomicBool::new(false));
        let flag = callback_ran.clone();
        let err = manager
            .execute_toolkit_command(
                &std::env::temp_dir(),
                "maya_open",
                &[],
                Box::new(move |_, _, _| flag.store(true, Ordering::SeqCst)),
            )
            .await
            .expect_err("command family rejected");

        assert!(err.to_string().starts_with(TOOLKIT_ERROR_PREFIX));
        assert!(!callback_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn open_rejects_missing_file() {
        let manager = create(None);
        let missing = std::env::temp_dir().join("shotgun-bridge-manager-no-such-file");
        let err = manager.open(&missing).await.expect_err("missing file");
        assert!(err.to_string().contains("File not found."));
    }

    #[test]
    fn directories_get_exactly_one_trailing_separator() {
        let dir = temp_dir("normalize");
        let normalized = normalize_picked_path(&dir);
        let separator = std::path::MAIN_SEPARATOR;
        assert!(normalized.ends_with(separator));
        assert!(!normalized.ends_with(&format!("{separator}{separator}")));
        // Re-normalizing an already-suffixed path must not stack separators.
        let again = normalize_picked_path(&PathBuf::from(&normalized));
        assert_eq!(again, normalized);
    }

    #[test]
    fn file_paths_are_left_untouched() {
        let dir = temp_dir("normalize-file");
        let file = dir.join("version.txt");
        std::fs::write(&file, "1").expect("write file");
        assert_eq!(normalize_picked_path(&file), file.to_string_lossy());
    }

    #[test]
    fn chooser_context_initialization_is_idempotent() {
        ensure_chooser_context();
        ensure_chooser_context();
    }

    #[test]
    fn factory_selects_platform_script_names() {
        let manager = create(None);
        let expected = if cfg!(windows) {
            ("shotgun.bat", "tank.bat")
        } else {
            ("shotgun", "tank")
        };
        assert_eq!(manager.toolkit_script_names(), expected);
    }
}
