//! devmuxctl - read-only introspection tool for an in-process Registry.
//!
//! There is no kernel module or daemon this binary talks to; the registry
//! it reports on is seeded in-process with a small set of demonstration
//! devices on an in-memory backend. Useful for exercising the reporting
//! surface (`driver_info_for_slot`, `hw_info_for_slot`, the control
//! protocol's `limits.*` and `version_info` commands) without any real
//! hardware attached.

use devmux::control::{Command, ControlRequest, Response};
use devmux::platform::MockBackend;
use devmux::registry::{Device, EventSrc, InterruptConfig, MemRegion, MemRegionType, RecordFlags, Registry};
use devmux::version::CRATE_VERSION;
use std::process::ExitCode;
use std::sync::Arc;

fn demo_registry() -> Registry {
    let registry = Registry::new(Arc::new(MockBackend::new()));

    let mut adc = Device::new("acme", "adc", 0, "acme-adc v1.3", "rev-b").unwrap();
    adc.mem[0] = MemRegion::new("ctrl", 0x1000, 4096, 0, 256, MemRegionType::Physical, RecordFlags::empty(), 4096);
    adc.mem[1] = MemRegion::new("data", 0x2000, 4096, 0, 4096, MemRegionType::Physical, RecordFlags::SHARED, 4096);
    adc.events[0] = EventSrc::new("sample_ready", RecordFlags::empty(), InterruptConfig { irq: 17, ..Default::default() });
    registry.manage(adc).unwrap();

    let mut gpio = Device::new("acme", "gpio", 0, "acme-gpio v2.0", "rev-a").unwrap();
    gpio.mem[0] = MemRegion::new("bank0", 0x3000, 4096, 0, 64, MemRegionType::Physical, RecordFlags::SHARED, 4096);
    registry.manage(gpio).unwrap();

    registry
}

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    let registry = demo_registry();

    match args.get(1).map(String::as_str) {
        Some("list") => {
            list_devices(&registry);
            ExitCode::SUCCESS
        }
        Some("info") => match args.get(2) {
            Some(id) => match device_info(&registry, id) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("devmuxctl: {e}");
                    ExitCode::from(1)
                }
            },
            None => {
                eprintln!("devmuxctl: info requires a <group>.<device>.<instance> argument");
                ExitCode::from(1)
            }
        },
        Some("version") => {
            print_version(&registry);
            ExitCode::SUCCESS
        }
        _ => {
            print_usage();
            ExitCode::from(1)
        }
    }
}

fn list_devices(registry: &Registry) {
    println!("{:<5} {:<8} {:<8} {:<4} {:<20} MEM       EVENTS", "SLOT", "GROUP", "DEVICE", "INST", "DRIVER");
    for dev in registry.list_devices() {
        println!(
            "{:<5} {:<8} {:<8} {:<4} {:<20} {:<9} {}",
            dev.slot,
            dev.group,
            dev.name,
            dev.instance,
            dev.driver_info,
            dev.mem_names.join(","),
            dev.event_names.join(","),
        );
    }
}

fn device_info(registry: &Registry, id: &str) -> Result<(), String> {
    let (group, name, instance) = parse_device_id(id)?;
    let slot = registry
        .find_device_slot(group, name, instance)
        .map_err(|e| format!("{group}.{name}.{instance}: {e}"))?;
    let driver = registry.driver_info_for_slot(slot).map_err(|e| e.to_string())?;
    let hw = registry.hw_info_for_slot(slot).map_err(|e| e.to_string())?;
    println!("slot:       {slot}");
    println!("identity:   {group}.{name}.{instance}");
    println!("driver:     {driver}");
    println!("hardware:   {hw}");
    Ok(())
}

fn parse_device_id(id: &str) -> Result<(&str, &str, u32), String> {
    let mut parts = id.splitn(3, '.');
    let group = parts.next().filter(|s| !s.is_empty());
    let name = parts.next().filter(|s| !s.is_empty());
    let instance = parts.next().and_then(|s| s.parse::<u32>().ok());
    match (group, name, instance) {
        (Some(g), Some(n), Some(i)) => Ok((g, n, i)),
        _ => Err(format!("{id}: expected <group>.<device>.<instance>")),
    }
}

fn print_version(registry: &Registry) {
    let req = ControlRequest::new(CRATE_VERSION, Command::VersionInfo);
    match registry.dispatch(req) {
        Ok(Response::VersionInfo { code, variant, commit }) => {
            println!("devmux {}.{}.{} ({variant}, {commit})", code.major(), code.minor(), code.revision());
        }
        _ => println!("devmux {}", env!("CARGO_PKG_VERSION")),
    }
}

fn print_usage() {
    println!("devmuxctl - introspect an in-process device registry");
    println!();
    println!("USAGE:");
    println!("    devmuxctl list");
    println!("    devmuxctl info <group>.<device>.<instance>");
    println!("    devmuxctl version");
}
