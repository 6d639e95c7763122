//! Device catalog and scanner (spec C11). Single source of truth for every
//! supported board's VID/PID/protocol/firmware-base-address tuple.

use std::sync::OnceLock;

use hidapi::HidApi;
use pok3r_transport::{discovery, UPDATE_USAGE, UPDATE_USAGE_PAGE};

pub const HOLTEK_VID: u16 = 0x04D9;
pub const QMK_VID: u16 = 0xFEED;

/// Which wire protocol a device's application firmware speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Pok3r,
    Cykb,
}

/// A known board: vid/pid/boot-pid/protocol/firmware-base-address.
#[derive(Debug, Clone, Copy)]
pub struct DeviceDefinition {
    pub slug: &'static str,
    pub name: &'static str,
    pub vid: u16,
    pub pid: u16,
    pub boot_pid: u16,
    pub protocol: Protocol,
    pub fw_base: u32,
}

/// Every board this tool can identify. Bootloader PID is, by convention,
/// `pid | 0x1000`.
pub const SUPPORTED_DEVICES: &[DeviceDefinition] = &[
    DeviceDefinition {
        slug: "pok3r",
        name: "POK3R",
        vid: HOLTEK_VID,
        pid: 0x0141,
        boot_pid: 0x1141,
        protocol: Protocol::Pok3r,
        fw_base: 0x2C00,
    },
    DeviceDefinition {
        slug: "pok3r_rgb",
        name: "POK3R RGB",
        vid: HOLTEK_VID,
        pid: 0x0167,
        boot_pid: 0x1167,
        protocol: Protocol::Cykb,
        fw_base: 0x3000,
    },
    DeviceDefinition {
        slug: "pok3r_rgb2",
        name: "POK3R RGB2",
        vid: HOLTEK_VID,
        pid: 0x0207,
        boot_pid: 0x1207,
        protocol: Protocol::Cykb,
        fw_base: 0x3000,
    },
    DeviceDefinition {
        slug: "vortex_core",
        name: "Vortex Core",
        vid: HOLTEK_VID,
        pid: 0x0175,
        boot_pid: 0x1175,
        protocol: Protocol::Cykb,
        fw_base: 0x3000,
    },
    DeviceDefinition {
        slug: "race3",
        name: "Vortex Race 3",
        vid: HOLTEK_VID,
        pid: 0x0192,
        boot_pid: 0x1192,
        protocol: Protocol::Cykb,
        fw_base: 0x3000,
    },
    DeviceDefinition {
        slug: "vibe",
        name: "Vortex ViBE",
        vid: HOLTEK_VID,
        pid: 0x0216,
        boot_pid: 0x1216,
        protocol: Protocol::Cykb,
        fw_base: 0x3000,
    },
    DeviceDefinition {
        slug: "cypher",
        name: "Vortex Cypher",
        vid: HOLTEK_VID,
        pid: 0x0282,
        boot_pid: 0x1282,
        protocol: Protocol::Cykb,
        fw_base: 0x3000,
    },
    DeviceDefinition {
        slug: "tab60",
        name: "Vortex Tab 60",
        vid: HOLTEK_VID,
        pid: 0x0304,
        boot_pid: 0x1304,
        protocol: Protocol::Cykb,
        fw_base: 0x3000,
    },
    DeviceDefinition {
        slug: "tab75",
        name: "Vortex Tab 75",
        vid: HOLTEK_VID,
        pid: 0x0344,
        boot_pid: 0x1344,
        protocol: Protocol::Cykb,
        fw_base: 0x3000,
    },
    DeviceDefinition {
        slug: "tab90",
        name: "Vortex Tab 90",
        vid: HOLTEK_VID,
        pid: 0x0346,
        boot_pid: 0x1346,
        protocol: Protocol::Cykb,
        fw_base: 0x3000,
    },
    DeviceDefinition {
        slug: "kbp_v60",
        name: "KBP V60",
        vid: HOLTEK_VID,
        pid: 0x0112,
        boot_pid: 0x1112,
        protocol: Protocol::Pok3r,
        fw_base: 0x3200,
    },
    DeviceDefinition {
        slug: "kbp_v80",
        name: "KBP V80",
        vid: HOLTEK_VID,
        pid: 0x0129,
        boot_pid: 0x1129,
        protocol: Protocol::Pok3r,
        fw_base: 0x3200,
    },
    DeviceDefinition {
        slug: "yoda2",
        name: "Tex Yoda II",
        vid: HOLTEK_VID,
        pid: 0x0163,
        boot_pid: 0x1163,
        protocol: Protocol::Pok3r,
        fw_base: 0x3200,
    },
    DeviceDefinition {
        slug: "md600",
        name: "Mistel Barocco MD600",
        vid: HOLTEK_VID,
        pid: 0x0143,
        boot_pid: 0x1143,
        protocol: Protocol::Pok3r,
        fw_base: 0x3400,
    },
    DeviceDefinition {
        slug: "md200",
        name: "Mistel Freeboard MD200",
        vid: HOLTEK_VID,
        pid: 0x0200,
        boot_pid: 0x1200,
        protocol: Protocol::Pok3r,
        fw_base: 0x3400,
    },
];

pub fn find_by_slug(slug: &str) -> Option<&'static DeviceDefinition> {
    SUPPORTED_DEVICES.iter().find(|d| d.slug == slug)
}

pub fn find_by_pid(vid: u16, pid: u16) -> Option<&'static DeviceDefinition> {
    SUPPORTED_DEVICES
        .iter()
        .find(|d| d.vid == vid && (d.pid == pid || d.boot_pid == pid))
}

pub fn is_supported(vid: u16, pid: u16) -> bool {
    find_by_pid(vid, pid).is_some()
}

/// Registry wrapper, built once and reused across the process lifetime.
pub struct DeviceRegistry {
    devices: &'static [DeviceDefinition],
}

impl DeviceRegistry {
    fn new() -> Self {
        DeviceRegistry {
            devices: SUPPORTED_DEVICES,
        }
    }

    pub fn all(&self) -> &'static [DeviceDefinition] {
        self.devices
    }

    pub fn find_by_slug(&self, slug: &str) -> Option<&'static DeviceDefinition> {
        find_by_slug(slug)
    }

    pub fn find_by_pid(&self, vid: u16, pid: u16) -> Option<&'static DeviceDefinition> {
        find_by_pid(vid, pid)
    }
}

static REGISTRY: OnceLock<DeviceRegistry> = OnceLock::new();

pub fn device_registry() -> &'static DeviceRegistry {
    REGISTRY.get_or_init(DeviceRegistry::new)
}

/// One attached device found on the USB bus that matches the catalog.
#[derive(Debug, Clone, Copy)]
pub struct AttachedDevice {
    pub definition: &'static DeviceDefinition,
    pub vid: u16,
    pub pid: u16,
    pub in_bootloader: bool,
}

/// Enumerate attached devices matching the catalog via C1's filter-callback
/// scan, without opening any of them.
pub fn scan_attached(api: &HidApi) -> Vec<AttachedDevice> {
    let mut found = Vec::new();
    for info in api.device_list() {
        let Some(def) = find_by_pid(info.vendor_id(), info.product_id()) else {
            continue;
        };
        if info.usage_page() != UPDATE_USAGE_PAGE || info.usage() != UPDATE_USAGE {
            continue;
        }
        found.push(AttachedDevice {
            definition: def,
            vid: info.vendor_id(),
            pid: info.product_id(),
            in_bootloader: info.product_id() == def.boot_pid,
        });
    }
    found.sort_by_key(|d| (d.vid, d.pid));
    found.dedup_by_key(|d| (d.vid, d.pid));
    found
}

/// True if `scan_attached` would find at least one matching interface for
/// `(vid, pid)` right now. Used by reboot/reopen retry loops.
pub fn is_attached(api: &HidApi, vid: u16, pid: u16) -> bool {
    discovery::find_one(api, vid, pid, UPDATE_USAGE_PAGE, UPDATE_USAGE).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_by_slug_known() {
        let d = find_by_slug("pok3r_rgb").unwrap();
        assert_eq!(d.pid, 0x0167);
        assert_eq!(d.protocol, Protocol::Cykb);
    }

    #[test]
    fn find_by_pid_matches_application_and_bootloader() {
        let d = find_by_pid(HOLTEK_VID, 0x0141).unwrap();
        assert_eq!(d.slug, "pok3r");
        let d2 = find_by_pid(HOLTEK_VID, 0x1141).unwrap();
        assert_eq!(d2.slug, "pok3r");
    }

    #[test]
    fn unsupported_pid_not_found() {
        assert!(!is_supported(HOLTEK_VID, 0xFFFF));
    }

    #[test]
    fn bootloader_pid_is_app_pid_with_high_bit() {
        for d in SUPPORTED_DEVICES {
            assert_eq!(d.boot_pid, d.pid | 0x1000);
        }
    }
}
