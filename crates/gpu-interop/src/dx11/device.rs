//! D3D11 device for the ANGLE backend.
//!
//! Holds the device and immediate context that both ANGLE and the shared
//! render targets live on. The device is multithread-protected at creation
//! because ANGLE drives it from the render threads while the bridge creates
//! textures and copies into them from whatever thread calls the allocator.

use windows::core::Interface;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::*;

use surface_core::AdapterLuid;
use tracing::{debug, error, info, trace, warn};

/// A D3D11 device with its immediate context.
///
/// Created via [`Dx11Device::new()`]. With a preferred adapter the device is
/// created on exactly that adapter; otherwise hardware is tried first and
/// WARP second.
pub struct Dx11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    adapter: Option<AdapterLuid>,
    verbose: bool,
}

// SAFETY: the device is created with multithread protection enabled, which
// makes the immediate context safe to use from several threads.
unsafe impl Send for Dx11Device {}
unsafe impl Sync for Dx11Device {}

impl Dx11Device {
    /// Returns `None` if D3D11 is unavailable, or if `preferred` names an
    /// adapter that cannot be found or used.
    ///
    /// With `verbose` set the device logs its adapter and reports
    /// device-removed checks through [`Dx11Device::check_removed`].
    pub fn new(preferred: Option<AdapterLuid>, verbose: bool) -> Option<Self> {
        let flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT;
        let feature_levels = [
            D3D_FEATURE_LEVEL_11_1,
            D3D_FEATURE_LEVEL_11_0,
            D3D_FEATURE_LEVEL_10_1,
            D3D_FEATURE_LEVEL_10_0,
        ];

        let (device, context) = match preferred {
            Some(luid) => {
                let adapter = find_adapter(luid)?;
                let created = create_device(
                    Some(&adapter),
                    D3D_DRIVER_TYPE_UNKNOWN,
                    flags,
                    &feature_levels,
                );
                if created.is_none() {
                    error!("Failed to create D3D11 device on pinned adapter {luid}");
                }
                created?
            }
            None => {
                // Try HARDWARE first, fall back to WARP for CI/headless
                let mut created = None;
                for driver_type in [D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP] {
                    created = create_device(None, driver_type, flags, &feature_levels);
                    if created.is_some() {
                        debug!("D3D11 device created with driver type {:?}", driver_type);
                        break;
                    }
                }
                if created.is_none() {
                    error!("Failed to create D3D11 device with any driver type");
                }
                created?
            }
        };

        match device.cast::<ID3D11Multithread>() {
            Ok(multithread) => unsafe {
                let _ = multithread.SetMultithreadProtected(true.into());
            },
            Err(e) => warn!("ID3D11Multithread unavailable, device is not thread-protected: {e}"),
        }

        if verbose {
            match describe_adapter(&device) {
                Some(adapter) => debug!("D3D11 device on adapter {adapter}"),
                None => debug!("D3D11 device adapter could not be queried"),
            }
        }

        Some(Self {
            device,
            context,
            adapter: preferred,
            verbose,
        })
    }

    /// Borrow the underlying `ID3D11Device`.
    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    /// Borrow the immediate device context.
    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    pub fn adapter(&self) -> Option<AdapterLuid> {
        self.adapter
    }

    /// Raw COM pointer, for handing the device to ANGLE.
    pub fn as_raw(&self) -> *mut std::ffi::c_void {
        self.device.as_raw()
    }

    /// `Some(reason)` once the device has been removed or reset.
    pub fn removed_reason(&self) -> Option<String> {
        match unsafe { self.device.GetDeviceRemovedReason() } {
            Ok(()) => None,
            Err(e) => Some(format!("{e}")),
        }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Verbose-mode diagnostic: log the removed reason after `stage`.
    pub fn check_removed(&self, stage: &str) {
        if !self.verbose {
            return;
        }
        match self.removed_reason() {
            Some(reason) => warn!("D3D11 device removed after {stage}: {reason}"),
            None => trace!("D3D11 device healthy after {stage}"),
        }
    }
}

/// `"<luid>: <description>"` of the adapter `device` was created on.
fn describe_adapter(device: &ID3D11Device) -> Option<String> {
    let dxgi: IDXGIDevice = device.cast().ok()?;
    let adapter = unsafe { dxgi.GetAdapter() }.ok()?;
    let desc = unsafe { adapter.GetDesc() }.ok()?;
    let luid = AdapterLuid {
        low_part: desc.AdapterLuid.LowPart,
        high_part: desc.AdapterLuid.HighPart,
    };
    let name = String::from_utf16_lossy(&desc.Description)
        .trim_end_matches('\0')
        .to_string();
    Some(format!("{luid}: {name}"))
}

fn create_device(
    adapter: Option<&IDXGIAdapter>,
    driver_type: D3D_DRIVER_TYPE,
    flags: D3D11_CREATE_DEVICE_FLAG,
    feature_levels: &[D3D_FEATURE_LEVEL],
) -> Option<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device = None;
    let mut context = None;
    let hr = unsafe {
        D3D11CreateDevice(
            adapter,
            driver_type,
            HMODULE::default(),
            flags,
            Some(feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device as *mut _),
            None,
            Some(&mut context as *mut _),
        )
    };
    if let Err(e) = hr {
        debug!("D3D11CreateDevice({:?}) failed: {e}", driver_type);
        return None;
    }
    Some((device?, context?))
}

/// Find the DXGI adapter whose LUID matches `luid`.
fn find_adapter(luid: AdapterLuid) -> Option<IDXGIAdapter> {
    let factory: IDXGIFactory1 = match unsafe { CreateDXGIFactory1() } {
        Ok(f) => f,
        Err(e) => {
            error!("CreateDXGIFactory1 failed: {e}");
            return None;
        }
    };

    let mut index = 0;
    while let Ok(adapter) = unsafe { factory.EnumAdapters1(index) } {
        index += 1;
        let Ok(desc) = (unsafe { adapter.GetDesc1() }) else {
            continue;
        };
        if desc.AdapterLuid.LowPart == luid.low_part
            && desc.AdapterLuid.HighPart == luid.high_part
        {
            let name = String::from_utf16_lossy(&desc.Description)
                .trim_end_matches('\0')
                .to_string();
            info!("Pinned D3D11 adapter {luid}: {name}");
            return adapter.cast::<IDXGIAdapter>().ok();
        }
    }

    error!("No DXGI adapter with LUID {luid}");
    None
}
