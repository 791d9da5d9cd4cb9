//! Windows capture device enumeration via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list microphone endpoints with friendly
//! names and transport types, and to resolve the endpoint a session opens.

use windows::core::*;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::Foundation::*;
use windows::Win32::System::Com::*;
use windows::Win32::UI::Shell::PropertiesSystem::*;

use mic_relay_core::{AudioSource, AudioTransportType};

use crate::error::WindowsAudioError;

/// Capture device enumerator using the Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Create a new device enumerator.
    ///
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> std::result::Result<Self, WindowsAudioError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| WindowsAudioError::Com(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// List active capture (microphone) devices.
    pub fn list_capture_devices(&self) -> std::result::Result<Vec<AudioSource>, WindowsAudioError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .map_err(|e| WindowsAudioError::Com(format!("EnumAudioEndpoints failed: {}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| WindowsAudioError::Com(format!("GetCount failed: {}", e)))?;

            let default_id = self.default_capture_device_id().ok();
            let mut devices = Vec::new();

            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Some(id) = Self::device_id(&device) else {
                    continue;
                };
                let name = Self::get_device_friendly_name(&device).unwrap_or_else(|| format!("Microphone {}", i));
                let is_default = default_id.as_deref() == Some(id.as_str());

                devices.push(AudioSource {
                    id,
                    name,
                    is_default,
                    transport_type: Some(Self::detect_transport_type(&device)),
                });
            }

            Ok(devices)
        }
    }

    /// Get the default capture device ID.
    pub fn default_capture_device_id(&self) -> std::result::Result<String, WindowsAudioError> {
        let device = self.capture_device(None)?;
        Self::device_id(&device).ok_or_else(|| WindowsAudioError::Com("GetId failed".into()))
    }

    /// Resolve `device_id`, or the default console capture endpoint when `None`.
    pub(crate) fn capture_device(&self, device_id: Option<&str>) -> std::result::Result<IMMDevice, WindowsAudioError> {
        unsafe {
            match device_id {
                Some(id) => {
                    let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                    self.enumerator
                        .GetDevice(PCWSTR(wide_id.as_ptr()))
                        .map_err(|_| WindowsAudioError::DeviceNotFound)
                }
                None => self
                    .enumerator
                    .GetDefaultAudioEndpoint(eCapture, eConsole)
                    .map_err(|_| WindowsAudioError::DeviceNotFound),
            }
        }
    }

    /// Describe `device_id` (or the default endpoint) as an [`AudioSource`].
    pub fn describe(&self, device_id: Option<&str>) -> std::result::Result<AudioSource, WindowsAudioError> {
        let device = self.capture_device(device_id)?;
        let id = Self::device_id(&device).ok_or(WindowsAudioError::DeviceNotFound)?;
        let default_id = self.default_capture_device_id().ok();
        Ok(AudioSource {
            name: Self::get_device_friendly_name(&device).unwrap_or_else(|| "Microphone".into()),
            is_default: default_id.as_deref() == Some(id.as_str()),
            transport_type: Some(Self::detect_transport_type(&device)),
            id,
        })
    }

    fn device_id(device: &IMMDevice) -> Option<String> {
        unsafe {
            let id = device.GetId().ok()?;
            let text = id.to_string().ok();
            CoTaskMemFree(Some(id.0 as *const _));
            text
        }
    }

    fn get_device_friendly_name(device: &IMMDevice) -> Option<String> {
        read_string_property(device, &PKEY_Device_FriendlyName)
    }

    /// Classify the endpoint by its PnP enumerator (`BTHENUM`, `USB`, ...).
    fn detect_transport_type(device: &IMMDevice) -> AudioTransportType {
        match read_string_property(device, &PKEY_Device_EnumeratorName) {
            Some(name) => transport_from_enumerator(&name),
            None => AudioTransportType::Unknown,
        }
    }
}

fn transport_from_enumerator(name: &str) -> AudioTransportType {
    if name.contains("BTHLEENUM") {
        AudioTransportType::BluetoothLE
    } else if name.contains("BTHENUM") {
        AudioTransportType::Bluetooth
    } else if name.contains("USB") {
        AudioTransportType::Usb
    } else {
        AudioTransportType::BuiltIn
    }
}

/// Read a string property from the device's property store.
fn read_string_property(device: &IMMDevice, key: &PROPERTYKEY) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(key).ok()?;
        let text = value.to_string();
        (!text.is_empty()).then_some(text)
    }
}
