use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use crate::error::WindowsAudioError;

/// Joins the calling thread to the multithreaded apartment until dropped.
pub(crate) struct ComGuard;

impl ComGuard {
    pub(crate) fn init() -> Result<Self, WindowsAudioError> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED)
                .ok()
                .map_err(|e| WindowsAudioError::Com(format!("CoInitializeEx failed: {}", e)))?;
        }
        Ok(Self)
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}
