use std::error::Error;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

/// Hands a URL or a local file to the operating system's default handler.
pub trait Opener: Send + Sync {
    fn open(&self, target: &str) -> anyhow::Result<()>;
}

/// Opens targets with the shell of the host OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

#[cfg(windows)]
impl Opener for SystemOpener {
    fn open(&self, target: &str) -> anyhow::Result<()> {
        use crate::wstring::Wstring;
        use winapi::um::shellapi::{ShellExecuteExW, LPSHELLEXECUTEINFOW, SHELLEXECUTEINFOW};
        use winapi::um::winuser::SW_SHOWNORMAL;

        let verb = Wstring::new("open");
        let file = Wstring::new(target);

        let mut sei: SHELLEXECUTEINFOW = unsafe { std::mem::zeroed() };
        sei.cbSize = std::mem::size_of::<SHELLEXECUTEINFOW>() as u32;
        sei.lpVerb = verb.as_ptr();
        sei.lpFile = file.as_ptr();
        sei.nShow = SW_SHOWNORMAL;

        if unsafe { ShellExecuteExW(&mut sei as LPSHELLEXECUTEINFOW) } == 0 {
            return Err(OpenError::new(target, std::io::Error::last_os_error()).into());
        }
        Ok(())
    }
}

#[cfg(not(windows))]
impl Opener for SystemOpener {
    fn open(&self, target: &str) -> anyhow::Result<()> {
        let program = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };

        std::process::Command::new(program)
            .arg(target)
            .spawn()
            .map_err(|e| OpenError::new(target, e))?;
        Ok(())
    }
}

/// Failure to hand a target to the OS, with the system's reason (including
/// the OS error code when there is one).
pub struct OpenError {
    message: String,
}

impl OpenError {
    fn new(target: &str, reason: impl Display) -> Self {
        Self {
            message: format!("Failed to open {target}: {reason}"),
        }
    }
}

impl Display for OpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.message)
    }
}

impl Debug for OpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.message)
    }
}

impl Error for OpenError {}
