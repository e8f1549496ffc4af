use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;

/// NUL-terminated UTF-16 buffer for passing strings to the Win32 API.
#[derive(Default)]
pub struct Wstring {
    str: Vec<u16>,
}

impl Wstring {
    pub fn new<S: AsRef<OsStr>>(s: S) -> Self {
        Self {
            str: s.as_ref().encode_wide().chain(Some(0)).collect(),
        }
    }

    pub fn as_ptr(&self) -> *const u16 {
        self.str.as_ptr()
    }
}
