// ============================================
// registry.rs - Read-only, cached registry access
// ============================================
//
// Everything the inventory knows comes through `RegistryAccessor`:
//
//   RegistryAccessor            cache + redacted logging
//        |
//        v
//   dyn RegistrySource          where the values actually come from
//     - WindowsRegistry         real registry via winapi (Windows only)
//     - MemoryRegistry          in-memory fixture (tests, dry runs)
//     - EmptyRegistry           non-Windows builds: nothing installed
//
// Keys are written the same way `reg.exe` takes them:
//   HKLM\SOFTWARE\Microsoft\Office\ClickToRun\Configuration
//
// A key or value that does not exist is `Ok(None)`, not an error: the
// inventory asks about many keys that are normally absent. Only a key
// that exists but cannot be read/decoded is a RegistryAccessError.
//
// Nothing in this module ever writes to the registry.
// ============================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::RegistryAccessError;
use crate::logging::{redact_key, redact_value_name};

// ============================================
// VALUES
// ============================================

/// A decoded registry value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryValue {
    String(String),
    ExpandString(String),
    MultiString(Vec<String>),
    Dword(u32),
    Qword(u64),
    Binary(Vec<u8>),
}

impl RegistryValue {
    /// Text form of string-like values (REG_SZ / REG_EXPAND_SZ).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegistryValue::String(s) | RegistryValue::ExpandString(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Numeric form of DWORD/QWORD values.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RegistryValue::Dword(v) => Some(u64::from(*v)),
            RegistryValue::Qword(v) => Some(*v),
            _ => None,
        }
    }

    /// List form: REG_MULTI_SZ items, or a REG_SZ split on commas.
    ///
    /// Some products store lists as "a,b,c" in a plain string, others
    /// as a real multi-string; callers get the same shape either way.
    pub fn as_list(&self) -> Option<Vec<String>> {
        match self {
            RegistryValue::MultiString(items) => Some(
                items
                    .iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            RegistryValue::String(s) | RegistryValue::ExpandString(s) => Some(
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }
}

// ============================================
// SOURCE TRAIT
// ============================================

/// Where registry data comes from.
pub trait RegistrySource: Send + Sync {
    /// Read one value. `Ok(None)` when the key or the value is absent.
    fn read_value(
        &self,
        key: &str,
        value_name: &str,
    ) -> Result<Option<RegistryValue>, RegistryAccessError>;

    /// Names of the direct subkeys, in enumeration order.
    /// `Ok(vec![])` when the key is absent.
    fn subkeys(&self, key: &str) -> Result<Vec<String>, RegistryAccessError>;
}

/// The registry of the machine we run on.
pub fn system_source() -> Box<dyn RegistrySource> {
    #[cfg(windows)]
    {
        Box::new(windows_backend::WindowsRegistry)
    }

    #[cfg(not(windows))]
    {
        debug!("not running on Windows; registry is empty");
        Box::new(EmptyRegistry)
    }
}

/// A registry with nothing in it.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyRegistry;

impl RegistrySource for EmptyRegistry {
    fn read_value(
        &self,
        _key: &str,
        _value_name: &str,
    ) -> Result<Option<RegistryValue>, RegistryAccessError> {
        Ok(None)
    }

    fn subkeys(&self, _key: &str) -> Result<Vec<String>, RegistryAccessError> {
        Ok(Vec::new())
    }
}

// ============================================
// CACHED ACCESSOR
// ============================================

/// Cached, read-only registry reader.
///
/// Successful reads are remembered for the lifetime of the accessor
/// (normally the whole process), so a full scan that touches the same
/// configuration key dozens of times only hits the registry once per
/// value. Absent values are not cached.
pub struct RegistryAccessor {
    source: Box<dyn RegistrySource>,
    cache: Mutex<HashMap<(String, String), RegistryValue>>,
    backend_reads: AtomicU64,
}

impl RegistryAccessor {
    pub fn new(source: Box<dyn RegistrySource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
            backend_reads: AtomicU64::new(0),
        }
    }

    /// Accessor over the real system registry.
    pub fn system() -> Self {
        Self::new(system_source())
    }

    /// Read a value, from cache when possible.
    pub fn read(
        &self,
        key: &str,
        value_name: &str,
    ) -> Result<Option<RegistryValue>, RegistryAccessError> {
        let cache_key = (key.to_lowercase(), value_name.to_lowercase());
        if let Some(hit) = self.cache.lock().get(&cache_key) {
            return Ok(Some(hit.clone()));
        }

        self.backend_reads.fetch_add(1, Ordering::Relaxed);
        match self.source.read_value(key, value_name) {
            Ok(Some(value)) => {
                self.cache.lock().insert(cache_key, value.clone());
                Ok(Some(value))
            }
            Ok(None) => {
                debug!(key = %redact_key(key), value = %redact_value_name(value_name), "registry value not present");
                Ok(None)
            }
            Err(e) => {
                warn!(key = %redact_key(key), value = %redact_value_name(value_name), "registry read failed");
                Err(e)
            }
        }
    }

    /// Read a string value; non-string values count as absent.
    pub fn read_string(
        &self,
        key: &str,
        value_name: &str,
    ) -> Result<Option<String>, RegistryAccessError> {
        Ok(self
            .read(key, value_name)?
            .and_then(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty()))
    }

    /// Enumerate subkeys (not cached; each scan wants fresh names).
    pub fn subkeys(&self, key: &str) -> Result<Vec<String>, RegistryAccessError> {
        self.backend_reads.fetch_add(1, Ordering::Relaxed);
        self.source.subkeys(key).map_err(|e| {
            warn!(key = %redact_key(key), "registry enumeration failed");
            e
        })
    }

    /// How many times the backend was actually queried.
    pub fn backend_reads(&self) -> u64 {
        self.backend_reads.load(Ordering::Relaxed)
    }

    /// Number of cached values.
    pub fn cached_values(&self) -> usize {
        self.cache.lock().len()
    }
}

// ============================================
// HIVE PARSING
// ============================================

/// Top-level hives the core reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hive {
    LocalMachine,
    CurrentUser,
}

/// Split "HKLM\SOFTWARE\..." into (hive, "SOFTWARE\...").
pub fn split_hive(key: &str) -> Result<(Hive, &str), RegistryAccessError> {
    let (head, rest) = key.split_once('\\').unwrap_or((key, ""));
    let hive = match head.to_ascii_uppercase().as_str() {
        "HKLM" | "HKEY_LOCAL_MACHINE" => Hive::LocalMachine,
        "HKCU" | "HKEY_CURRENT_USER" => Hive::CurrentUser,
        _ => {
            return Err(RegistryAccessError::UnknownHive {
                key: redact_key(key),
            })
        }
    };
    Ok((hive, rest.trim_matches('\\')))
}

// ============================================
// IN-MEMORY FIXTURE
// ============================================

#[derive(Debug, Default, Clone)]
struct MemoryKey {
    /// Original-case subkey names in insertion order
    subkeys: Vec<String>,
    values: HashMap<String, Result<RegistryValue, String>>,
}

/// In-memory registry used by tests and offline dry runs.
///
/// Keys are created implicitly (with all their parents) when a value
/// is added, and subkeys enumerate in the order they were created,
/// like a freshly written registry would.
#[derive(Debug, Default, Clone)]
pub struct MemoryRegistry {
    keys: HashMap<String, MemoryKey>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a value, creating the key path.
    pub fn with_value(mut self, key: &str, name: &str, value: RegistryValue) -> Self {
        self.set(key, name, Ok(value));
        self
    }

    /// Shorthand for a REG_SZ value.
    pub fn with_string(self, key: &str, name: &str, value: &str) -> Self {
        self.with_value(key, name, RegistryValue::String(value.to_string()))
    }

    /// Add a value that exists but cannot be decoded.
    pub fn with_corrupt_value(mut self, key: &str, name: &str) -> Self {
        self.set(key, name, Err("invalid UTF-16 data".to_string()));
        self
    }

    /// Create an empty key.
    pub fn with_key(mut self, key: &str) -> Self {
        self.ensure_key(key);
        self
    }

    fn set(&mut self, key: &str, name: &str, value: Result<RegistryValue, String>) {
        self.ensure_key(key);
        if let Some(entry) = self.keys.get_mut(&key.to_lowercase()) {
            entry.values.insert(name.to_lowercase(), value);
        }
    }

    fn ensure_key(&mut self, key: &str) {
        let parts: Vec<&str> = key.split('\\').filter(|p| !p.is_empty()).collect();
        for depth in 1..=parts.len() {
            let path = parts[..depth].join("\\").to_lowercase();
            if self.keys.contains_key(&path) {
                continue;
            }
            self.keys.insert(path, MemoryKey::default());
            if depth > 1 {
                let parent = parts[..depth - 1].join("\\").to_lowercase();
                if let Some(parent_key) = self.keys.get_mut(&parent) {
                    parent_key.subkeys.push(parts[depth - 1].to_string());
                }
            }
        }
    }
}

impl RegistrySource for MemoryRegistry {
    fn read_value(
        &self,
        key: &str,
        value_name: &str,
    ) -> Result<Option<RegistryValue>, RegistryAccessError> {
        split_hive(key)?;
        let Some(entry) = self.keys.get(&key.trim_end_matches('\\').to_lowercase()) else {
            return Ok(None);
        };
        match entry.values.get(&value_name.to_lowercase()) {
            None => Ok(None),
            Some(Ok(value)) => Ok(Some(value.clone())),
            Some(Err(reason)) => Err(RegistryAccessError::Decode {
                key: redact_key(key),
                value: redact_value_name(value_name),
                reason: reason.clone(),
            }),
        }
    }

    fn subkeys(&self, key: &str) -> Result<Vec<String>, RegistryAccessError> {
        split_hive(key)?;
        Ok(self
            .keys
            .get(&key.trim_end_matches('\\').to_lowercase())
            .map(|entry| entry.subkeys.clone())
            .unwrap_or_default())
    }
}

// ============================================
// WINDOWS BACKEND
// ============================================
// Thin wrapper over RegOpenKeyExW / RegQueryValueExW / RegEnumKeyExW.
// Keys are opened KEY_READ | KEY_WOW64_64KEY so a 32-bit build still
// sees the native view; Wow6432Node paths are spelled out explicitly
// by the inventory.

#[cfg(windows)]
mod windows_backend {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;

    use winapi::shared::minwindef::{DWORD, HKEY};
    use winapi::shared::winerror::{
        ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS,
        ERROR_PATH_NOT_FOUND, ERROR_SUCCESS,
    };
    use winapi::um::winnt::{
        KEY_READ, KEY_WOW64_64KEY, REG_DWORD, REG_EXPAND_SZ, REG_MULTI_SZ, REG_QWORD, REG_SZ,
    };
    use winapi::um::winreg::{
        RegCloseKey, RegEnumKeyExW, RegOpenKeyExW, RegQueryValueExW, HKEY_CURRENT_USER,
        HKEY_LOCAL_MACHINE,
    };

    use super::{split_hive, Hive, RegistrySource, RegistryValue};
    use crate::error::RegistryAccessError;
    use crate::logging::{redact_key, redact_value_name};

    /// Longest key name the registry allows, plus the terminator.
    const MAX_KEY_NAME: usize = 256;

    pub struct WindowsRegistry;

    /// Open key handle, closed on drop.
    struct OpenKey(HKEY);

    impl Drop for OpenKey {
        fn drop(&mut self) {
            // SAFETY: the handle came from a successful RegOpenKeyExW
            unsafe {
                RegCloseKey(self.0);
            }
        }
    }

    fn wide(text: &str) -> Vec<u16> {
        OsStr::new(text).encode_wide().chain(std::iter::once(0)).collect()
    }

    /// Open a key; Ok(None) when it does not exist.
    fn open(key: &str) -> Result<Option<OpenKey>, RegistryAccessError> {
        let (hive, path) = split_hive(key)?;
        let root = match hive {
            Hive::LocalMachine => HKEY_LOCAL_MACHINE,
            Hive::CurrentUser => HKEY_CURRENT_USER,
        };

        let path_w = wide(path);
        let mut handle: HKEY = ptr::null_mut();
        // SAFETY: path_w is NUL-terminated and outlives the call; handle is an out-param
        let status = unsafe {
            RegOpenKeyExW(root, path_w.as_ptr(), 0, KEY_READ | KEY_WOW64_64KEY, &mut handle)
        } as DWORD;

        match status {
            ERROR_SUCCESS => Ok(Some(OpenKey(handle))),
            ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => Ok(None),
            ERROR_ACCESS_DENIED => Err(RegistryAccessError::AccessDenied {
                key: redact_key(key),
            }),
            other => Err(RegistryAccessError::Os {
                key: redact_key(key),
                status: other as i32,
            }),
        }
    }

    fn decode(
        key: &str,
        value_name: &str,
        kind: DWORD,
        data: &[u8],
    ) -> Result<RegistryValue, RegistryAccessError> {
        let fail = |reason: &str| RegistryAccessError::Decode {
            key: redact_key(key),
            value: redact_value_name(value_name),
            reason: reason.to_string(),
        };

        let utf16 = || -> Result<Vec<u16>, RegistryAccessError> {
            if data.len() % 2 != 0 {
                return Err(fail("odd byte count for string data"));
            }
            Ok(data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect())
        };

        match kind {
            REG_SZ | REG_EXPAND_SZ => {
                let units = utf16()?;
                let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
                let text = String::from_utf16(&units[..end]).map_err(|_| fail("invalid UTF-16"))?;
                if kind == REG_SZ {
                    Ok(RegistryValue::String(text))
                } else {
                    Ok(RegistryValue::ExpandString(text))
                }
            }
            REG_MULTI_SZ => {
                let units = utf16()?;
                let mut items = Vec::new();
                for part in units.split(|&u| u == 0) {
                    if part.is_empty() {
                        continue;
                    }
                    items.push(String::from_utf16(part).map_err(|_| fail("invalid UTF-16"))?);
                }
                Ok(RegistryValue::MultiString(items))
            }
            REG_DWORD => {
                let bytes: [u8; 4] = data.try_into().map_err(|_| fail("DWORD is not 4 bytes"))?;
                Ok(RegistryValue::Dword(u32::from_le_bytes(bytes)))
            }
            REG_QWORD => {
                let bytes: [u8; 8] = data.try_into().map_err(|_| fail("QWORD is not 8 bytes"))?;
                Ok(RegistryValue::Qword(u64::from_le_bytes(bytes)))
            }
            _ => Ok(RegistryValue::Binary(data.to_vec())),
        }
    }

    impl RegistrySource for WindowsRegistry {
        fn read_value(
            &self,
            key: &str,
            value_name: &str,
        ) -> Result<Option<RegistryValue>, RegistryAccessError> {
            let Some(handle) = open(key)? else {
                return Ok(None);
            };
            let name_w = wide(value_name);

            // The value can grow between the size query and the read;
            // retry a few times on ERROR_MORE_DATA.
            let mut buffer: Vec<u8> = vec![0; 512];
            for _ in 0..4 {
                let mut kind: DWORD = 0;
                let mut size = buffer.len() as DWORD;
                // SAFETY: buffer is valid for `size` bytes; all out-params point to locals
                let status = unsafe {
                    RegQueryValueExW(
                        handle.0,
                        name_w.as_ptr(),
                        ptr::null_mut(),
                        &mut kind,
                        buffer.as_mut_ptr(),
                        &mut size,
                    )
                } as DWORD;

                match status {
                    ERROR_SUCCESS => {
                        buffer.truncate(size as usize);
                        return decode(key, value_name, kind, &buffer).map(Some);
                    }
                    ERROR_MORE_DATA => buffer.resize(size as usize + 2, 0),
                    ERROR_FILE_NOT_FOUND => return Ok(None),
                    ERROR_ACCESS_DENIED => {
                        return Err(RegistryAccessError::AccessDenied {
                            key: redact_key(key),
                        })
                    }
                    other => {
                        return Err(RegistryAccessError::Os {
                            key: redact_key(key),
                            status: other as i32,
                        })
                    }
                }
            }

            Err(RegistryAccessError::Decode {
                key: redact_key(key),
                value: redact_value_name(value_name),
                reason: "value kept changing size while being read".to_string(),
            })
        }

        fn subkeys(&self, key: &str) -> Result<Vec<String>, RegistryAccessError> {
            let Some(handle) = open(key)? else {
                return Ok(Vec::new());
            };

            let mut names = Vec::new();
            let mut index: DWORD = 0;
            loop {
                let mut name = [0u16; MAX_KEY_NAME];
                let mut len = MAX_KEY_NAME as DWORD;
                // SAFETY: name holds `len` u16s; unused out-params are null
                let status = unsafe {
                    RegEnumKeyExW(
                        handle.0,
                        index,
                        name.as_mut_ptr(),
                        &mut len,
                        ptr::null_mut(),
                        ptr::null_mut(),
                        ptr::null_mut(),
                        ptr::null_mut(),
                    )
                } as DWORD;

                match status {
                    ERROR_SUCCESS => {
                        names.push(String::from_utf16_lossy(&name[..len as usize]));
                        index += 1;
                    }
                    ERROR_NO_MORE_ITEMS => break,
                    other => {
                        return Err(RegistryAccessError::Os {
                            key: redact_key(key),
                            status: other as i32,
                        })
                    }
                }
            }
            Ok(names)
        }
    }
}

#[cfg(windows)]
pub use windows_backend::WindowsRegistry;

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Office\ClickToRun\Configuration";

    fn accessor(registry: MemoryRegistry) -> RegistryAccessor {
        RegistryAccessor::new(Box::new(registry))
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let reg = accessor(MemoryRegistry::new());
        assert_eq!(reg.read(CONFIG_KEY, "Platform").unwrap(), None);
        assert!(reg.subkeys(CONFIG_KEY).unwrap().is_empty());
    }

    #[test]
    fn test_missing_value_is_not_found() {
        let reg = accessor(MemoryRegistry::new().with_string(CONFIG_KEY, "Platform", "x64"));
        assert_eq!(reg.read(CONFIG_KEY, "ClientCulture").unwrap(), None);
    }

    #[test]
    fn test_corrupt_value_is_an_error() {
        let reg = accessor(MemoryRegistry::new().with_corrupt_value(CONFIG_KEY, "ProductReleaseIds"));
        assert!(matches!(
            reg.read(CONFIG_KEY, "ProductReleaseIds"),
            Err(RegistryAccessError::Decode { .. })
        ));
    }

    #[test]
    fn test_reads_are_cached() {
        let reg = accessor(MemoryRegistry::new().with_string(CONFIG_KEY, "Platform", "x64"));

        for _ in 0..5 {
            assert_eq!(
                reg.read_string(CONFIG_KEY, "Platform").unwrap().as_deref(),
                Some("x64")
            );
        }
        assert_eq!(reg.backend_reads(), 1);
        assert_eq!(reg.cached_values(), 1);

        // Different case, same registry entry
        reg.read(&CONFIG_KEY.to_uppercase(), "PLATFORM").unwrap();
        assert_eq!(reg.backend_reads(), 1);
    }

    #[test]
    fn test_absent_values_not_cached() {
        let reg = accessor(MemoryRegistry::new());
        reg.read(CONFIG_KEY, "Platform").unwrap();
        reg.read(CONFIG_KEY, "Platform").unwrap();
        assert_eq!(reg.backend_reads(), 2);
        assert_eq!(reg.cached_values(), 0);
    }

    #[test]
    fn test_subkeys_in_creation_order() {
        let uninstall = r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";
        let reg = accessor(
            MemoryRegistry::new()
                .with_key(&format!(r"{}\Zeta", uninstall))
                .with_key(&format!(r"{}\Alpha", uninstall))
                .with_string(&format!(r"{}\Mid", uninstall), "DisplayName", "Mid"),
        );

        assert_eq!(reg.subkeys(uninstall).unwrap(), vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn test_list_values() {
        let comma = RegistryValue::String("ProPlus2021Volume, VisioPro2021Volume,".to_string());
        assert_eq!(
            comma.as_list().unwrap(),
            vec!["ProPlus2021Volume", "VisioPro2021Volume"]
        );

        let multi = RegistryValue::MultiString(vec!["O365ProPlusRetail".to_string(), String::new()]);
        assert_eq!(multi.as_list().unwrap(), vec!["O365ProPlusRetail"]);

        assert_eq!(RegistryValue::Dword(1).as_list(), None);
    }

    #[test]
    fn test_split_hive() {
        let (hive, rest) = split_hive(r"HKEY_LOCAL_MACHINE\SOFTWARE\Foo").unwrap();
        assert_eq!(hive, Hive::LocalMachine);
        assert_eq!(rest, r"SOFTWARE\Foo");

        assert!(matches!(
            split_hive(r"HKCR\Foo"),
            Err(RegistryAccessError::UnknownHive { .. })
        ));
    }
}
