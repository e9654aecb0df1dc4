//! Platform detection backend for the install registry.
//!
//! Windows에서는 HKLM의 LabVIEW 키를 32bit/64bit 레지스트리 뷰로 각각
//! 조회합니다. 다른 플랫폼에는 설치 레지스트리가 없으므로 빈 결과를
//! 반환합니다.

use super::InstallDescriptor;

/// Raw result of one full registry pass.
pub(super) struct RegistryScan {
    pub installs: Vec<InstallDescriptor>,
    /// CurrentVersion marker GUID from the 32bit view, if present.
    pub current_guid_32: Option<String>,
    /// CurrentVersion marker GUID from the 64bit view, if present.
    pub current_guid_64: Option<String>,
}

impl RegistryScan {
    fn empty() -> Self {
        Self {
            installs: Vec::new(),
            current_guid_32: None,
            current_guid_64: None,
        }
    }
}

#[cfg(windows)]
pub(super) fn read_installations() -> RegistryScan {
    windows::read_installations()
}

#[cfg(not(windows))]
pub(super) fn read_installations() -> RegistryScan {
    tracing::debug!("Install detection is only available on Windows");
    RegistryScan::empty()
}

#[cfg(windows)]
mod windows {
    use super::RegistryScan;
    use crate::install::{Bitness, InstallDescriptor};
    use std::path::PathBuf;
    use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_READ, KEY_WOW64_32KEY, KEY_WOW64_64KEY};
    use winreg::RegKey;

    const BASE_KEY: &str = "SOFTWARE\\National Instruments\\LabVIEW";

    /// 설치 항목이 아닌 하위 키
    const EXCLUDED_KEYS: [&str; 2] = ["AddOns", "CurrentVersion"];

    pub(super) fn read_installations() -> RegistryScan {
        let mut scan = RegistryScan::empty();

        scan_view(KEY_WOW64_32KEY, Bitness::X86, &mut scan.installs);
        scan.current_guid_32 = current_version_guid(KEY_WOW64_32KEY);

        // 32bit OS에서는 두 뷰가 같은 키로 이어져 중복 항목이 생기므로
        // 64bit 뷰는 64bit OS에서만 조회한다.
        if is_64bit_os() {
            scan_view(KEY_WOW64_64KEY, Bitness::X64, &mut scan.installs);
            scan.current_guid_64 = current_version_guid(KEY_WOW64_64KEY);
        }

        scan
    }

    /// Enumerates one registry view and appends every complete install entry.
    /// Keys missing a Path or VersionString value are silently skipped.
    fn scan_view(view_flag: u32, bitness: Bitness, installs: &mut Vec<InstallDescriptor>) {
        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        let base = match hklm.open_subkey_with_flags(BASE_KEY, KEY_READ | view_flag) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("No {} LabVIEW registry key: {}", bitness, e);
                return;
            }
        };

        for name in base.enum_keys().filter_map(|item| item.ok()) {
            if EXCLUDED_KEYS.contains(&name.as_str()) {
                continue;
            }

            let item = match base.open_subkey_with_flags(&name, KEY_READ | view_flag) {
                Ok(key) => key,
                Err(e) => {
                    tracing::debug!("Skipping registry key '{}': {}", name, e);
                    continue;
                }
            };

            let path: Result<String, _> = item.get_value("Path");
            let version: Result<String, _> = item.get_value("VersionString");
            if let (Ok(path), Ok(version)) = (path, version) {
                let guid = item.get_value("GUID").unwrap_or_default();
                installs.push(InstallDescriptor {
                    version,
                    path: PathBuf::from(path),
                    bitness,
                    guid,
                });
            } else {
                tracing::debug!("Registry key '{}' has no Path/VersionString", name);
            }
        }
    }

    /// CurrentVersion 마커 키의 GUID 값
    fn current_version_guid(view_flag: u32) -> Option<String> {
        RegKey::predef(HKEY_LOCAL_MACHINE)
            .open_subkey_with_flags(BASE_KEY, KEY_READ | view_flag)
            .ok()?
            .open_subkey_with_flags("CurrentVersion", KEY_READ | view_flag)
            .ok()?
            .get_value("GUID")
            .ok()
    }

    /// 64bit 프로세스이거나, WOW64 환경 변수가 있는 32bit 프로세스면 64bit OS.
    fn is_64bit_os() -> bool {
        cfg!(target_arch = "x86_64")
            || cfg!(target_arch = "aarch64")
            || std::env::var_os("PROCESSOR_ARCHITEW6432").is_some()
    }
}
