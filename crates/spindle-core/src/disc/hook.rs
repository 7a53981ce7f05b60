use crate::repository::Layout;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

const PROCESS_TEMPLATE: &str = include_str!("templates/process.sh");
const MAKE_ISO_TEMPLATE: &str = include_str!("templates/make_iso.sh");

/// A sealed disc ready for image creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedDisc {
    pub root: PathBuf,
    pub disc_id: i64,
    pub preparing_dir: PathBuf,
    pub notify: String,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReceipt {
    pub pid: Option<u32>,
}

/// Hand-off point to whatever turns a preparation directory into an image.
///
/// Implementations must return as soon as the work is started; success or
/// failure of the image itself is reported by the hook, not here.
pub trait DispatchHook {
    fn dispatch(&self, disc: &SealedDisc) -> io::Result<DispatchReceipt>;
}

/// Runs `hooks/process.sh <root> <disc id> <email>` as a detached process.
#[derive(Debug, Clone)]
pub struct ShellHook {
    script: PathBuf,
}

impl ShellHook {
    pub fn new(layout: &Layout) -> Self {
        Self {
            script: layout.process_hook(),
        }
    }
}

impl DispatchHook for ShellHook {
    fn dispatch(&self, disc: &SealedDisc) -> io::Result<DispatchReceipt> {
        let child = Command::new("/bin/sh")
            .arg(&self.script)
            .arg(&disc.root)
            .arg(disc.disc_id.to_string())
            .arg(&disc.notify)
            .current_dir(&disc.root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = child.id();
        debug!("Spawned {} for disc {} (pid {})", self.script.display(), disc.disc_id, pid);
        // Never waited on.
        drop(child);
        Ok(DispatchReceipt { pid: Some(pid) })
    }
}

/// Install the stock `process.sh` / `make_iso.sh` pair into `hooks/`.
pub fn write_default_hooks(layout: &Layout) -> io::Result<()> {
    fs::create_dir_all(layout.hooks_dir())?;
    for (path, body) in [
        (layout.process_hook(), PROCESS_TEMPLATE),
        (layout.make_iso_hook(), MAKE_ISO_TEMPLATE),
    ] {
        fs::write(&path, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(())
}
