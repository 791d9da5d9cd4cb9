//! Windows microphone privacy check.
//!
//! On Windows 10 1803+, microphone access is controlled by Settings > Privacy >
//! Microphone. Unpackaged desktop apps get no consent prompt; a disabled
//! toggle shows up as `E_ACCESSDENIED` when activating the audio client.

use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use crate::com::ComGuard;
use crate::error::WindowsAudioError;

/// Whether the default (or given) capture device can be opened.
///
/// `Ok(false)` means access is blocked by privacy settings or the device is
/// held exclusively by another process.
pub fn check_microphone_permission() -> Result<bool, WindowsAudioError> {
    let _com = ComGuard::init()?;
    unsafe { check_mic_access_inner() }
}

unsafe fn check_mic_access_inner() -> Result<bool, WindowsAudioError> {
    let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
        .map_err(|e| WindowsAudioError::Com(format!("failed to create enumerator: {}", e)))?;

    let device = match enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) {
        Ok(d) => d,
        Err(_) => return Err(WindowsAudioError::DeviceNotFound),
    };

    let result: windows::core::Result<IAudioClient> = device.Activate(CLSCTX_ALL, None);
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.code() == E_ACCESSDENIED || e.code() == AUDCLNT_E_DEVICE_IN_USE => Ok(false),
        Err(e) => {
            log::warn!("unexpected error checking microphone permission: {}", e);
            Ok(true)
        }
    }
}
