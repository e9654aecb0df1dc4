//! LabVIEW Installation Resolver
//!
//! Discovers installed LabVIEW versions from the Windows registry and
//! resolves a version/bitness request to a concrete install:
//! - Registry scan across the 32bit and 64bit views (`detect`)
//! - Default selection via the CurrentVersion marker GUID
//! - Version string resolution with the documented bitness policy

mod detect;

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// 설치 탐색/해석 오류 타입
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("No LabVIEW installation matches '{hint}' (installed: {available})")]
    VersionNotFound { hint: String, available: String },

    #[error("No installed LabVIEW version discovered")]
    NoneDetected,
}

// ─── Bitness ─────────────────────────────────────────────────

/// 설치 비트수. 정렬 순서는 32bit < 64bit (해석 정책에서 사용).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bitness {
    X86,
    X64,
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86 => write!(f, "32bit"),
            Self::X64 => write!(f, "64bit"),
        }
    }
}

// ─── Install Descriptor ──────────────────────────────────────

/// 레지스트리에서 발견한 LabVIEW 설치 하나의 메타데이터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallDescriptor {
    /// Version label as registered, e.g. "20.0.1" or "2011 SP1 f2"
    pub version: String,
    /// Install root directory
    pub path: PathBuf,
    pub bitness: Bitness,
    /// Opaque installation GUID. Empty when the registry omits it.
    pub guid: String,
}

impl InstallDescriptor {
    /// 설치 루트 기준 실행 파일 경로
    pub fn executable_path(&self) -> PathBuf {
        self.path.join("LabVIEW.exe")
    }

    /// CLI 지원 도구가 배치되는 고정 하위 디렉토리
    pub fn tools_path(&self) -> PathBuf {
        self.path.join("vi.lib").join("G CLI Tools")
    }
}

impl fmt::Display for InstallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.version, self.bitness)
    }
}

// ─── Install Registry ────────────────────────────────────────

/// One full scan result. Rebuilt as a whole by `scan()`, so callers never
/// observe a partially updated list.
#[derive(Debug, Clone)]
pub struct InstallRegistry {
    installs: Vec<InstallDescriptor>,
    default_index: Option<usize>,
}

impl InstallRegistry {
    /// Scans the platform registry and builds a fresh registry value.
    ///
    /// Both the 32bit and 64bit registry views are searched on a 64bit OS,
    /// otherwise only the 32bit view. Keys missing a Path or VersionString
    /// value are skipped.
    pub fn scan() -> Self {
        let scan = detect::read_installations();
        let registry = Self::from_scan(scan);

        if registry.installs.is_empty() {
            tracing::info!("No installed LabVIEW version discovered");
        } else {
            if let Some(current) = registry.default_install() {
                tracing::info!("Current version: {}", current);
            }
            tracing::info!("Detected LabVIEW versions:");
            for install in &registry.installs {
                tracing::info!("  {} ({})", install, install.path.display());
            }
        }

        registry
    }

    /// 스캔 결과로부터 레지스트리 구성. 기본 설치 선택 정책:
    /// 32bit 뷰의 CurrentVersion GUID 우선, 다음 64bit 뷰, 둘 다 없으면 첫 항목.
    fn from_scan(scan: detect::RegistryScan) -> Self {
        let detect::RegistryScan {
            installs,
            current_guid_32,
            current_guid_64,
        } = scan;

        let default_index = if installs.is_empty() {
            None
        } else {
            marker_index(&installs, current_guid_32.as_deref())
                .or_else(|| marker_index(&installs, current_guid_64.as_deref()))
                .or(Some(0))
        };

        Self {
            installs,
            default_index,
        }
    }

    pub fn installs(&self) -> &[InstallDescriptor] {
        &self.installs
    }

    pub fn is_empty(&self) -> bool {
        self.installs.is_empty()
    }

    /// 기본(현재) 설치. 스캔 결과가 비어 있으면 None.
    pub fn default_install(&self) -> Option<&InstallDescriptor> {
        self.default_index.and_then(|i| self.installs.get(i))
    }

    /// Resolves a version hint to a single install.
    ///
    /// Filters to versions containing `hint` as a substring, then sorts the
    /// matches by bitness ascending. Without `prefer_x64` the first match
    /// wins, which may still be 64bit when no 32bit install matched. With
    /// `prefer_x64` the matches are narrowed to 64bit only, and an empty
    /// narrowing fails even though 32bit matches existed.
    pub fn resolve_version_string(
        &self,
        hint: &str,
        prefer_x64: bool,
    ) -> Result<&InstallDescriptor, InstallError> {
        let mut matches: Vec<&InstallDescriptor> = self
            .installs
            .iter()
            .filter(|install| install.version.contains(hint))
            .collect();

        if matches.is_empty() {
            return Err(self.version_not_found(hint));
        }

        matches.sort_by_key(|install| install.bitness);

        if !prefer_x64 {
            return Ok(matches[0]);
        }

        matches
            .into_iter()
            .find(|install| install.bitness == Bitness::X64)
            .ok_or_else(|| self.version_not_found(hint))
    }

    fn version_not_found(&self, hint: &str) -> InstallError {
        InstallError::VersionNotFound {
            hint: hint.to_string(),
            available: self.available_versions(),
        }
    }

    /// 오류 메시지용 설치 목록 요약
    pub fn available_versions(&self) -> String {
        if self.installs.is_empty() {
            return "none".to_string();
        }
        self.installs
            .iter()
            .map(|install| install.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Finds the install whose GUID equals the CurrentVersion marker.
fn marker_index(installs: &[InstallDescriptor], marker: Option<&str>) -> Option<usize> {
    let marker = marker?;
    installs
        .iter()
        .position(|install| !install.guid.is_empty() && install.guid == marker)
}

// ─── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn install(version: &str, bitness: Bitness, guid: &str) -> InstallDescriptor {
        InstallDescriptor {
            version: version.to_string(),
            path: PathBuf::from("C:\\LabVIEW"),
            bitness,
            guid: guid.to_string(),
        }
    }

    fn registry(installs: Vec<InstallDescriptor>) -> InstallRegistry {
        InstallRegistry::from_scan(detect::RegistryScan {
            installs,
            current_guid_32: None,
            current_guid_64: None,
        })
    }

    #[test]
    fn test_bitness_display_and_order() {
        assert_eq!(Bitness::X86.to_string(), "32bit");
        assert_eq!(Bitness::X64.to_string(), "64bit");
        assert!(Bitness::X86 < Bitness::X64);
    }

    #[test]
    fn test_executable_path_is_root_joined() {
        let install = install("2015", Bitness::X86, "");
        assert_eq!(
            install.executable_path(),
            PathBuf::from("C:\\LabVIEW").join("LabVIEW.exe")
        );
    }

    #[test]
    fn test_tools_path_is_fixed_subdirectory() {
        let install = install("2015", Bitness::X86, "");
        assert_eq!(
            install.tools_path(),
            PathBuf::from("C:\\LabVIEW").join("vi.lib").join("G CLI Tools")
        );
    }

    #[cfg(windows)]
    #[test]
    fn test_executable_path_literal() {
        let install = install("2015", Bitness::X86, "");
        assert_eq!(
            install.executable_path(),
            PathBuf::from("C:\\LabVIEW\\LabVIEW.exe")
        );
    }

    #[test]
    fn test_resolve_substring_match() {
        let reg = registry(vec![
            install("20.0.1", Bitness::X86, ""),
            install("21.0", Bitness::X86, ""),
        ]);
        let resolved = reg.resolve_version_string("20.0", false).unwrap();
        assert_eq!(resolved.version, "20.0.1");
    }

    #[test]
    fn test_resolve_prefers_32bit_by_sort_order() {
        let reg = registry(vec![
            install("2020", Bitness::X64, ""),
            install("2020", Bitness::X86, ""),
        ]);
        let resolved = reg.resolve_version_string("2020", false).unwrap();
        assert_eq!(resolved.bitness, Bitness::X86);
    }

    #[test]
    fn test_resolve_returns_64bit_when_only_match() {
        // 정렬이 지배하므로 x64 플래그 없이도 64bit가 나올 수 있음
        let reg = registry(vec![install("2020", Bitness::X64, "")]);
        let resolved = reg.resolve_version_string("2020", false).unwrap();
        assert_eq!(resolved.bitness, Bitness::X64);
    }

    #[test]
    fn test_resolve_x64_filter() {
        let reg = registry(vec![
            install("2020", Bitness::X86, ""),
            install("2020", Bitness::X64, ""),
        ]);
        let resolved = reg.resolve_version_string("2020", true).unwrap();
        assert_eq!(resolved.bitness, Bitness::X64);
    }

    #[test]
    fn test_resolve_x64_not_found_when_only_32bit_matches() {
        let reg = registry(vec![install("2020", Bitness::X86, "")]);
        let result = reg.resolve_version_string("2020", true);
        assert!(matches!(
            result,
            Err(InstallError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_no_match() {
        let reg = registry(vec![install("2020", Bitness::X86, "")]);
        let result = reg.resolve_version_string("2025", false);
        assert!(matches!(
            result,
            Err(InstallError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_empty_hint_matches_everything() {
        let reg = registry(vec![
            install("2019", Bitness::X64, ""),
            install("2020", Bitness::X86, ""),
        ]);
        // 빈 힌트는 모든 버전에 부분 일치 → 정렬상 32bit 우선
        let resolved = reg.resolve_version_string("", false).unwrap();
        assert_eq!(resolved.bitness, Bitness::X86);
    }

    #[test]
    fn test_default_prefers_32bit_marker() {
        let reg = InstallRegistry::from_scan(detect::RegistryScan {
            installs: vec![
                install("2020", Bitness::X64, "guid-64"),
                install("2020", Bitness::X86, "guid-32"),
            ],
            current_guid_32: Some("guid-32".to_string()),
            current_guid_64: Some("guid-64".to_string()),
        });
        assert_eq!(reg.default_install().unwrap().guid, "guid-32");
    }

    #[test]
    fn test_default_falls_back_to_64bit_marker() {
        let reg = InstallRegistry::from_scan(detect::RegistryScan {
            installs: vec![
                install("2019", Bitness::X86, "other"),
                install("2020", Bitness::X64, "guid-64"),
            ],
            current_guid_32: None,
            current_guid_64: Some("guid-64".to_string()),
        });
        assert_eq!(reg.default_install().unwrap().guid, "guid-64");
    }

    #[test]
    fn test_default_falls_back_to_first_entry() {
        let reg = InstallRegistry::from_scan(detect::RegistryScan {
            installs: vec![
                install("2019", Bitness::X86, "a"),
                install("2020", Bitness::X64, "b"),
            ],
            current_guid_32: Some("unknown".to_string()),
            current_guid_64: None,
        });
        assert_eq!(reg.default_install().unwrap().guid, "a");
    }

    #[test]
    fn test_default_none_when_empty() {
        let reg = registry(vec![]);
        assert!(reg.default_install().is_none());
        assert!(reg.is_empty());
        assert_eq!(reg.available_versions(), "none");
    }

    #[test]
    fn test_empty_guid_never_matches_marker() {
        let reg = InstallRegistry::from_scan(detect::RegistryScan {
            installs: vec![install("2020", Bitness::X86, "")],
            current_guid_32: Some("".to_string()),
            current_guid_64: None,
        });
        // 빈 GUID끼리의 우연한 일치 방지 → 첫 항목 폴백
        assert_eq!(reg.default_install().unwrap().version, "2020");
    }

    #[test]
    fn test_available_versions_summary() {
        let reg = registry(vec![
            install("2019", Bitness::X86, ""),
            install("2020", Bitness::X64, ""),
        ]);
        assert_eq!(reg.available_versions(), "2019, 32bit; 2020, 64bit");
    }
}
