// ============================================
// inventory.rs - Detect installed suite products from the registry
// ============================================
//
// Two technologies leave two different traces:
//
// CLICK-TO-RUN
//   <root>\Configuration                         one per install root
//     Platform            x86 | x64              (absent = no install here)
//     ProductReleaseIds   "ProPlus2021Volume,VisioPro2021Volume"
//     VersionToReport     16.0.14332.20447
//     UpdateChannel       http://officecdn.microsoft.com/pr/<channel GUID>
//     ClientCulture       en-us
//   Uninstall\<ProductId> - <culture>            one per installed language
//
// MSI
//   Uninstall\{90150000-0011-0000-0000-0000000FF1CE}
//              | ||      |    |    |
//              | |major  SKU  LCID platform
//
// Product IDs and channels only ever come from ProductReleaseIds and the
// configuration record (or the MSI product code). Display names and
// uninstall command lines are never parsed for them. A candidate that
// cannot be identified is skipped with a logged reason.
// ============================================

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::catalog::{Architecture, ProductFamily};
use crate::error::RegistryAccessError;
use crate::logging::redact_key;
use crate::registry::{RegistryAccessor, RegistryValue};

/// Click-to-Run configuration roots, in scan order.
pub const CLICK_TO_RUN_ROOTS: &[&str] = &[
    r"HKLM\SOFTWARE\Microsoft\Office\ClickToRun\Configuration",
    r"HKLM\SOFTWARE\Microsoft\Office\16.0\ClickToRun\Configuration",
    r"HKLM\SOFTWARE\Microsoft\Office\15.0\ClickToRun\Configuration",
    r"HKLM\SOFTWARE\Wow6432Node\Microsoft\Office\ClickToRun\Configuration",
    r"HKLM\SOFTWARE\Wow6432Node\Microsoft\Office\16.0\ClickToRun\Configuration",
    r"HKLM\SOFTWARE\Wow6432Node\Microsoft\Office\15.0\ClickToRun\Configuration",
];

/// Uninstall registration roots (native view first).
pub const UNINSTALL_ROOTS: &[&str] = &[
    r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall",
    r"HKLM\SOFTWARE\Wow6432Node\Microsoft\Windows\CurrentVersion\Uninstall",
];

/// Channel name used for MSI-based products.
pub const MSI_CHANNEL: &str = "MSI";

/// Channel name when the configuration record does not say.
pub const UNKNOWN_CHANNEL: &str = "Unknown";

/// Vendor CDN channel GUIDs.
const CHANNEL_GUIDS: &[(&str, &str)] = &[
    ("492350f6-3a01-4f97-b9c0-c7c6ddf67d60", "Current"),
    ("55336b82-a18d-4dd6-b5f6-9e5095c314a6", "MonthlyEnterprise"),
    ("7ffbc6bf-bc32-4f92-8982-f9dd17fd3114", "SemiAnnual"),
    ("b8f9b850-328d-4355-9145-c59439a0c4cf", "SemiAnnualPreview"),
    ("64256afe-f5d9-4f86-8936-8840a6a4f5be", "CurrentPreview"),
    ("5440fd1f-7ecb-4221-8110-145efaa6372f", "BetaChannel"),
    ("f2e724c1-748f-4b47-8fb8-8e0d210e9208", "PerpetualVL2019"),
    ("5030841d-c919-4594-8d2d-84ae4f96e58e", "PerpetualVL2021"),
    ("7983bac0-e531-40cf-be00-fd24fe66619c", "PerpetualVL2024"),
];

/// MSI SKU codes (PPPP in the product code) we recognise.
const MSI_SKUS: &[(&str, &str)] = &[
    ("0011", "ProPlus"),
    ("0012", "Standard"),
    ("0013", "Basic"),
    ("0014", "Professional"),
    ("0015", "Access"),
    ("0016", "Excel"),
    ("0018", "PowerPoint"),
    ("0019", "Publisher"),
    ("001A", "Outlook"),
    ("001B", "Word"),
    ("003A", "ProjectStd"),
    ("003B", "ProjectPro"),
    ("0051", "VisioPro"),
    ("0053", "VisioStd"),
];

/// MSI LCIDs (LLLL in the product code) we recognise.
const MSI_LCIDS: &[(&str, &str)] = &[
    ("0000", "x-none"),
    ("0404", "zh-TW"),
    ("0407", "de-DE"),
    ("0409", "en-US"),
    ("040C", "fr-FR"),
    ("0410", "it-IT"),
    ("0411", "ja-JP"),
    ("0412", "ko-KR"),
    ("0413", "nl-NL"),
    ("0415", "pl-PL"),
    ("0416", "pt-BR"),
    ("0419", "ru-RU"),
    ("0804", "zh-CN"),
    ("0809", "en-GB"),
    ("080A", "es-MX"),
    ("0816", "pt-PT"),
    ("0C0A", "es-ES"),
];

static PRODUCT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*$").expect("product id regex is valid"));

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)+$").expect("version regex is valid"));

static GUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("guid regex is valid")
});

static PERPETUAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(20(?:19|21|24))Volume$").expect("volume regex is valid"));

static MSI_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\{[0-9A-F]{2}(\d{2})[0-9A-F]{4}-([0-9A-F]{4})-([0-9A-F]{4})-([01])000-[01]000000FF1CE\}$",
    )
    .expect("msi product code regex is valid")
});

static CULTURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]{2,3})(?:[-_]([A-Za-z]{4}))?[-_]([A-Za-z]{2})$")
        .expect("culture regex is valid")
});

// ============================================
// MODEL
// ============================================

/// One detected installation (one product in one language).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub display_name: String,
    pub product_id: String,
    pub channel: String,
    pub version: String,
    pub architecture: Architecture,
    /// Normalised language tag, e.g. "en-US" ("x-none" for neutral MSI packages)
    pub culture: String,
    pub click_to_run: bool,
    pub install_path: Option<String>,
    pub updates_enabled: bool,
    /// CDN base URL updates come from
    pub update_source: Option<String>,
    pub media_type: Option<String>,
}

impl Installation {
    /// Deployment tool generation this installation needs.
    pub fn family(&self) -> ProductFamily {
        ProductFamily::for_product(&self.product_id, Some(&self.version))
    }
}

/// Normalise a language tag to `ll-RR` (or `ll-Ssss-RR`).
///
/// Returns None for anything that does not look like a culture tag.
pub fn normalize_culture(tag: &str) -> Option<String> {
    let tag = tag.trim();
    if tag.eq_ignore_ascii_case("x-none") {
        return Some("x-none".to_string());
    }

    let caps = CULTURE_RE.captures(tag)?;
    let language = caps.get(1)?.as_str().to_ascii_lowercase();
    let region = caps.get(3)?.as_str().to_ascii_uppercase();

    Some(match caps.get(2) {
        Some(script) => {
            let script = script.as_str();
            format!(
                "{}-{}{}-{}",
                language,
                script[..1].to_ascii_uppercase(),
                script[1..].to_ascii_lowercase(),
                region
            )
        }
        None => format!("{}-{}", language, region),
    })
}

/// Whether a version string is dotted numeric ("16.0.14332.20447").
pub fn is_dotted_version(version: &str) -> bool {
    VERSION_RE.is_match(version)
}

// ============================================
// SCANNER
// ============================================

/// Uninstall registration, as (root, subkey name).
struct Registration {
    root: &'static str,
    name: String,
}

impl Registration {
    fn key(&self) -> String {
        format!(r"{}\{}", self.root, self.name)
    }
}

pub struct InstallationInventory<'a> {
    registry: &'a RegistryAccessor,
}

impl<'a> InstallationInventory<'a> {
    pub fn new(registry: &'a RegistryAccessor) -> Self {
        Self { registry }
    }

    /// Build the current list of installations.
    ///
    /// Read-only and idempotent. Click-to-Run products come first (in
    /// root order), then MSI products (in registry order).
    pub fn scan(&self) -> Vec<Installation> {
        let registrations = self.uninstall_registrations();

        let mut found = Vec::new();
        for root in CLICK_TO_RUN_ROOTS {
            match self.scan_click_to_run(root, &registrations) {
                Ok(list) => found.extend(list),
                Err(e) => warn!(root = %redact_key(root), error = %e, "skipping Click-to-Run root"),
            }
        }

        for registration in &registrations {
            match self.read_msi(registration) {
                Ok(Some(installation)) => found.push(installation),
                Ok(None) => {}
                Err(e) => warn!(key = %redact_key(&registration.key()), error = %e, "skipping MSI registration"),
            }
        }

        let mut seen = HashSet::new();
        found.retain(|i| {
            seen.insert((
                i.product_id.to_ascii_lowercase(),
                i.culture.to_ascii_lowercase(),
                i.architecture,
                i.click_to_run,
            ))
        });

        info!(count = found.len(), "installation scan complete");
        found
    }

    fn uninstall_registrations(&self) -> Vec<Registration> {
        let mut registrations = Vec::new();
        for &root in UNINSTALL_ROOTS {
            match self.registry.subkeys(root) {
                Ok(names) => registrations.extend(names.into_iter().map(|name| Registration { root, name })),
                Err(e) => warn!(root = %redact_key(root), error = %e, "cannot enumerate uninstall root"),
            }
        }
        registrations
    }

    // ----------------------------------------
    // Click-to-Run
    // ----------------------------------------

    fn scan_click_to_run(
        &self,
        root: &str,
        registrations: &[Registration],
    ) -> Result<Vec<Installation>, RegistryAccessError> {
        let Some(platform) = self.registry.read_string(root, "Platform")? else {
            return Ok(Vec::new());
        };
        let architecture = match platform.parse::<Architecture>() {
            Ok(arch) => arch,
            Err(reason) => {
                warn!(root = %redact_key(root), %reason, "skipping root: unrecognised Platform");
                return Ok(Vec::new());
            }
        };

        let product_ids = match self.registry.read(root, "ProductReleaseIds")? {
            Some(value) => value.as_list().unwrap_or_default(),
            None => Vec::new(),
        };
        if product_ids.is_empty() {
            warn!(root = %redact_key(root), "skipping root: ProductReleaseIds missing or empty");
            return Ok(Vec::new());
        }
        if let Some(bad) = product_ids.iter().find(|p| !PRODUCT_ID_RE.is_match(p)) {
            warn!(root = %redact_key(root), entry = %bad, "skipping root: malformed ProductReleaseIds entry");
            return Ok(Vec::new());
        }

        let version = self.registry.read_string(root, "VersionToReport")?.unwrap_or_default();
        if !is_dotted_version(&version) {
            warn!(root = %redact_key(root), "skipping root: VersionToReport is not a dotted version");
            return Ok(Vec::new());
        }

        let channel_guid = self.channel_guid(root)?;
        let client_culture = self.registry.read_string(root, "ClientCulture")?;
        let updates_enabled = self
            .registry
            .read(root, "UpdatesEnabled")?
            .map(|v| match v {
                RegistryValue::Dword(n) => n != 0,
                other => other.as_str().is_some_and(|s| s.eq_ignore_ascii_case("true")),
            })
            .unwrap_or(false);
        let update_source = self.registry.read_string(root, "CDNBaseUrl")?;
        let installation_path = self.registry.read_string(root, "InstallationPath")?;

        let mut installations = Vec::new();
        for product_id in &product_ids {
            let channel = channel_for(channel_guid.as_deref(), product_id);
            let media_type = self.registry.read_string(root, &format!("{}.MediaType", product_id))?;

            let base = Installation {
                display_name: product_id.clone(),
                product_id: product_id.clone(),
                channel,
                version: version.clone(),
                architecture,
                culture: String::new(),
                click_to_run: true,
                install_path: installation_path.clone(),
                updates_enabled,
                update_source: update_source.clone(),
                media_type,
            };

            let languages = self.product_languages(product_id, registrations);
            if languages.is_empty() {
                match client_culture.as_deref().and_then(normalize_culture) {
                    Some(culture) => installations.push(Installation { culture, ..base }),
                    None => {
                        warn!(product = %product_id, "skipping product: no language registration and no ClientCulture")
                    }
                }
                continue;
            }

            for (culture, display_name, location) in languages {
                installations.push(Installation {
                    culture,
                    display_name: display_name.unwrap_or_else(|| product_id.clone()),
                    install_path: location.or_else(|| base.install_path.clone()),
                    ..base.clone()
                });
            }
        }

        debug!(root = %redact_key(root), products = product_ids.len(), found = installations.len(), "Click-to-Run root scanned");
        Ok(installations)
    }

    /// Channel GUID from UpdateChannel, falling back to CDNBaseUrl.
    fn channel_guid(&self, root: &str) -> Result<Option<String>, RegistryAccessError> {
        for name in ["UpdateChannel", "CDNBaseUrl"] {
            if let Some(url) = self.registry.read_string(root, name)? {
                if let Some(m) = GUID_RE.find(&url) {
                    return Ok(Some(m.as_str().to_ascii_lowercase()));
                }
            }
        }
        Ok(None)
    }

    /// Languages registered for a product: (culture, DisplayName, InstallLocation).
    ///
    /// Only the registration key NAME identifies the language; a damaged
    /// registration is skipped.
    fn product_languages(
        &self,
        product_id: &str,
        registrations: &[Registration],
    ) -> Vec<(String, Option<String>, Option<String>)> {
        let mut languages: Vec<(String, Option<String>, Option<String>)> = Vec::new();

        for registration in registrations {
            let Some((pid, culture)) = registration.name.split_once(" - ") else {
                continue;
            };
            if !pid.trim().eq_ignore_ascii_case(product_id) {
                continue;
            }
            let Some(culture) = normalize_culture(culture) else {
                debug!(product = %product_id, "ignoring registration with unrecognised culture");
                continue;
            };
            if languages.iter().any(|(c, _, _)| *c == culture) {
                continue;
            }

            let key = registration.key();
            let details = self
                .registry
                .read_string(&key, "DisplayName")
                .and_then(|name| Ok((name, self.registry.read_string(&key, "InstallLocation")?)));
            match details {
                Ok((name, location)) => languages.push((culture, name, location)),
                Err(e) => warn!(key = %redact_key(&key), error = %e, "skipping language registration"),
            }
        }

        languages
    }

    // ----------------------------------------
    // MSI
    // ----------------------------------------

    fn read_msi(&self, registration: &Registration) -> Result<Option<Installation>, RegistryAccessError> {
        let Some(caps) = MSI_CODE_RE.captures(&registration.name) else {
            return Ok(None);
        };
        let (major, sku, lcid, platform) = (&caps[1], caps[2].to_ascii_uppercase(), caps[3].to_ascii_uppercase(), &caps[4]);

        let year = match major {
            "14" => "2010",
            "15" => "2013",
            "16" => "2016",
            _ => {
                debug!(major, "ignoring MSI product code with unknown major version");
                return Ok(None);
            }
        };
        let Some(sku_name) = lookup(MSI_SKUS, &sku) else {
            debug!(%sku, "ignoring MSI product code with unknown SKU");
            return Ok(None);
        };
        let Some(culture) = lookup(MSI_LCIDS, &lcid) else {
            debug!(%lcid, "ignoring MSI product code with unknown LCID");
            return Ok(None);
        };

        let key = registration.key();
        let system_component = self
            .registry
            .read(&key, "SystemComponent")?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if system_component == 1 {
            return Ok(None);
        }
        let Some(display_name) = self.registry.read_string(&key, "DisplayName")? else {
            debug!(key = %redact_key(&key), "ignoring MSI registration without DisplayName");
            return Ok(None);
        };

        let version = self
            .registry
            .read_string(&key, "DisplayVersion")?
            .filter(|v| is_dotted_version(v))
            .unwrap_or_else(|| format!("{}.0", major));

        Ok(Some(Installation {
            display_name,
            product_id: format!("{}{}", sku_name, year),
            channel: MSI_CHANNEL.to_string(),
            version,
            architecture: if platform == "1" { Architecture::X64 } else { Architecture::X86 },
            culture: culture.to_string(),
            click_to_run: false,
            install_path: self.registry.read_string(&key, "InstallLocation")?,
            updates_enabled: false,
            update_source: None,
            media_type: None,
        }))
    }
}

fn lookup(table: &[(&str, &'static str)], code: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(code))
        .map(|(_, v)| *v)
}

/// Channel of a product: CDN GUID first, then the perpetual-volume suffix.
fn channel_for(guid: Option<&str>, product_id: &str) -> String {
    if let Some(name) = guid.and_then(|g| lookup(CHANNEL_GUIDS, g)) {
        return name.to_string();
    }
    match PERPETUAL_RE.captures(product_id) {
        Some(caps) => format!("PerpetualVL{}", &caps[1]),
        None => UNKNOWN_CHANNEL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;

    const C2R: &str = r"HKLM\SOFTWARE\Microsoft\Office\ClickToRun\Configuration";
    const C2R_WOW: &str = r"HKLM\SOFTWARE\Wow6432Node\Microsoft\Office\ClickToRun\Configuration";
    const UNINSTALL: &str = r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";
    const UNINSTALL_WOW: &str = r"HKLM\SOFTWARE\Wow6432Node\Microsoft\Windows\CurrentVersion\Uninstall";
    const VL2021_URL: &str = "http://officecdn.microsoft.com/pr/5030841d-c919-4594-8d2d-84ae4f96e58e";

    fn c2r_root(reg: MemoryRegistry, root: &str, products: &str) -> MemoryRegistry {
        reg.with_string(root, "Platform", "x64")
            .with_string(root, "ProductReleaseIds", products)
            .with_string(root, "VersionToReport", "16.0.14332.20447")
            .with_string(root, "ClientCulture", "en-us")
    }

    fn language(reg: MemoryRegistry, product: &str, culture: &str) -> MemoryRegistry {
        let key = format!(r"{}\{} - {}", UNINSTALL, product, culture);
        reg.with_string(&key, "DisplayName", &format!("Office LTSC Professional Plus 2021 - {}", culture))
            .with_string(&key, "InstallLocation", r"C:\Program Files\Microsoft Office")
    }

    fn scan(reg: MemoryRegistry) -> Vec<Installation> {
        let accessor = RegistryAccessor::new(Box::new(reg));
        InstallationInventory::new(&accessor).scan()
    }

    #[test]
    fn test_one_installation_per_language() {
        let mut reg = c2r_root(MemoryRegistry::new(), C2R, "ProPlus2021Volume")
            .with_string(C2R, "UpdateChannel", VL2021_URL);
        for culture in ["en-us", "es-es", "fr-fr"] {
            reg = language(reg, "ProPlus2021Volume", culture);
        }

        let found = scan(reg);
        let cultures: Vec<&str> = found.iter().map(|i| i.culture.as_str()).collect();
        assert_eq!(cultures, vec!["en-US", "es-ES", "fr-FR"]);
        for installation in &found {
            assert_eq!(installation.product_id, "ProPlus2021Volume");
            assert_eq!(installation.channel, "PerpetualVL2021");
            assert_eq!(installation.architecture, Architecture::X64);
            assert!(installation.click_to_run);
            assert_eq!(
                installation.install_path.as_deref(),
                Some(r"C:\Program Files\Microsoft Office")
            );
        }
        assert_eq!(found[1].display_name, "Office LTSC Professional Plus 2021 - es-es");
    }

    #[test]
    fn test_missing_canonical_field_excluded() {
        let reg = MemoryRegistry::new()
            .with_string(C2R, "Platform", "x64")
            .with_string(C2R, "VersionToReport", "16.0.14332.20447")
            .with_string(C2R, "ClientCulture", "en-us");

        assert!(scan(reg).is_empty());
    }

    #[test]
    fn test_malformed_entry_does_not_abort_scan() {
        let reg = c2r_root(MemoryRegistry::new(), C2R, "ProPlus2021Volume,Bad Id!");
        let reg = c2r_root(reg, C2R_WOW, "O365ProPlusRetail");

        let found = scan(reg);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].product_id, "O365ProPlusRetail");
    }

    #[test]
    fn test_corrupt_value_skips_only_that_root() {
        let reg = MemoryRegistry::new()
            .with_string(C2R, "Platform", "x64")
            .with_corrupt_value(C2R, "ProductReleaseIds");
        let reg = c2r_root(reg, C2R_WOW, "Standard2019Volume");

        let found = scan(reg);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].product_id, "Standard2019Volume");
        assert_eq!(found[0].channel, "PerpetualVL2019");
    }

    #[test]
    fn test_bad_version_skipped() {
        let reg = c2r_root(MemoryRegistry::new(), C2R, "ProPlus2021Volume")
            .with_string(C2R, "VersionToReport", "sixteen");
        assert!(scan(reg).is_empty());
    }

    #[test]
    fn test_client_culture_fallback_and_channel() {
        let reg = c2r_root(MemoryRegistry::new(), C2R, "O365ProPlusRetail")
            .with_string(C2R, "ClientCulture", "ES-mx")
            .with_string(C2R, "UpdatesEnabled", "True")
            .with_string(C2R, "CDNBaseUrl", "http://officecdn.microsoft.com/pr/492350f6-3a01-4f97-b9c0-c7c6ddf67d60")
            .with_string(C2R, "O365ProPlusRetail.MediaType", "CDN");

        let found = scan(reg);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].culture, "es-MX");
        assert_eq!(found[0].channel, "Current");
        assert!(found[0].updates_enabled);
        assert_eq!(found[0].media_type.as_deref(), Some("CDN"));
    }

    #[test]
    fn test_unknown_channel() {
        let reg = c2r_root(MemoryRegistry::new(), C2R, "HomeBusinessRetail");
        assert_eq!(scan(reg)[0].channel, UNKNOWN_CHANNEL);
    }

    #[test]
    fn test_duplicates_across_views_collapsed() {
        let reg = c2r_root(MemoryRegistry::new(), C2R, "ProPlus2021Volume");
        let reg = c2r_root(reg, C2R_WOW, "ProPlus2021Volume");
        let reg = language(reg, "ProPlus2021Volume", "en-us");
        let key = format!(r"{}\ProPlus2021Volume - en-us", UNINSTALL_WOW);
        let reg = reg.with_string(&key, "DisplayName", "duplicate");

        let found = scan(reg);
        assert_eq!(found.len(), 1);
        assert_ne!(found[0].display_name, "duplicate");
    }

    #[test]
    fn test_msi_products() {
        let proplus = format!(r"{}\{{90150000-0011-0000-0000-0000000FF1CE}}", UNINSTALL);
        let hidden = format!(r"{}\{{90150000-0012-0000-0000-0000000FF1CE}}", UNINSTALL);
        let unknown_sku = format!(r"{}\{{90150000-00FF-0000-0000-0000000FF1CE}}", UNINSTALL);
        let visio = format!(r"{}\{{90140000-0051-0409-1000-0000000FF1CE}}", UNINSTALL);
        let unrelated = format!(r"{}\SomeOtherApp", UNINSTALL);

        let reg = MemoryRegistry::new()
            .with_string(&proplus, "DisplayName", "Microsoft Office Professional Plus 2013")
            .with_string(&proplus, "DisplayVersion", "15.0.4569.1506")
            .with_string(&hidden, "DisplayName", "Microsoft Office Standard 2013")
            .with_value(&hidden, "SystemComponent", RegistryValue::Dword(1))
            .with_string(&unknown_sku, "DisplayName", "Something")
            .with_string(&visio, "DisplayName", "Microsoft Visio Professional 2010")
            .with_string(&unrelated, "DisplayName", "Some Other App");

        let found = scan(reg);
        assert_eq!(found.len(), 2);

        assert_eq!(found[0].product_id, "ProPlus2013");
        assert_eq!(found[0].channel, MSI_CHANNEL);
        assert_eq!(found[0].culture, "x-none");
        assert_eq!(found[0].architecture, Architecture::X86);
        assert_eq!(found[0].version, "15.0.4569.1506");
        assert!(!found[0].click_to_run);
        assert_eq!(found[0].family(), ProductFamily::Office2013);

        assert_eq!(found[1].product_id, "VisioPro2010");
        assert_eq!(found[1].culture, "en-US");
        assert_eq!(found[1].architecture, Architecture::X64);
        assert_eq!(found[1].version, "14.0");
    }

    #[test]
    fn test_scan_is_idempotent() {
        let reg = c2r_root(MemoryRegistry::new(), C2R, "ProPlus2021Volume,VisioPro2021Volume");
        let reg = language(reg, "ProPlus2021Volume", "en-us");
        let accessor = RegistryAccessor::new(Box::new(reg));
        let inventory = InstallationInventory::new(&accessor);

        let first = inventory.scan();
        let reads_after_first = accessor.backend_reads();
        let second = inventory.scan();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        // Found values are served from the cache the second time
        assert!(accessor.backend_reads() - reads_after_first < reads_after_first);
    }

    #[test]
    fn test_normalize_culture() {
        assert_eq!(normalize_culture("en-us").as_deref(), Some("en-US"));
        assert_eq!(normalize_culture("PT_br").as_deref(), Some("pt-BR"));
        assert_eq!(normalize_culture("sr-latn-rs").as_deref(), Some("sr-Latn-RS"));
        assert_eq!(normalize_culture("X-NONE").as_deref(), Some("x-none"));
        assert_eq!(normalize_culture("english"), None);
        assert_eq!(normalize_culture(""), None);
    }
}
