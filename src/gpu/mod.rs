//! GPU device access.
//!
//! Uses wgpu for cross-platform GPU access (Metal, Vulkan, DX12). Generation
//! never needs a device; it is only used to check generated WGSL modules.

use std::borrow::Cow;

/// Try to create a wgpu device and queue.
/// Returns None if no GPU adapter is available.
pub fn try_create_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("graph-builder"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
        },
        None,
    ))
    .ok()?;
    Some((device, queue))
}

/// Compile a WGSL module on `device`, returning the validation message if
/// the device rejects it.
pub fn validate_wgsl(device: &wgpu::Device, source: &str) -> Result<(), String> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let _module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("graph-builder-kernels"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(err.to_string()),
        None => Ok(()),
    }
}
