// ============================================
// catalog.rs - Product families, architectures, companion products
// ============================================
//
// The suite needs a different deployment tool depending on its
// generation:
//
//   Office2013   2013 products (version 15.x)        vendor download 36778
//   Modern       2016, 2019, 2021, 2024, 365 (16.x)  vendor download 49117
//
// Each family gets its own tool folder (OfficeODT_2013 / OfficeODT_Modern)
// so both generations can be handled in one run.
//
// The list of installable versions, channels and languages is supplied
// by the caller; this module only derives what follows from a product ID.
// ============================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================
// ARCHITECTURE
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86,
    X64,
}

impl Architecture {
    /// Value of the `OfficeClientEdition` attribute.
    pub fn client_edition(&self) -> &'static str {
        match self {
            Architecture::X86 => "32",
            Architecture::X64 => "64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X64 => write!(f, "x64"),
        }
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86" | "32" | "32-bit" | "i386" => Ok(Architecture::X86),
            "x64" | "64" | "64-bit" | "amd64" => Ok(Architecture::X64),
            other => Err(format!("unknown architecture: {}", other)),
        }
    }
}

// ============================================
// PRODUCT FAMILY
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductFamily {
    Office2013,
    Modern,
}

impl ProductFamily {
    pub const ALL: [ProductFamily; 2] = [ProductFamily::Office2013, ProductFamily::Modern];

    /// Vendor download-center ID of the deployment tool for this family.
    pub fn download_id(&self) -> &'static str {
        match self {
            ProductFamily::Office2013 => "36778",
            ProductFamily::Modern => "49117",
        }
    }

    /// Short name used in folder names ("2013" / "Modern").
    pub fn dir_name(&self) -> &'static str {
        match self {
            ProductFamily::Office2013 => "2013",
            ProductFamily::Modern => "Modern",
        }
    }

    /// Family of a product, from its ID and (when known) its version.
    ///
    /// Version 15.x is always 2013; otherwise a "2013" in the product ID
    /// decides (MSI product IDs carry the year).
    pub fn for_product(product_id: &str, version: Option<&str>) -> Self {
        let major = version
            .and_then(|v| v.split('.').next())
            .and_then(|m| m.parse::<u32>().ok());

        match major {
            Some(15) => ProductFamily::Office2013,
            Some(m) if m >= 16 => ProductFamily::Modern,
            _ if product_id.contains("2013") => ProductFamily::Office2013,
            _ => ProductFamily::Modern,
        }
    }
}

impl fmt::Display for ProductFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl FromStr for ProductFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "2013" | "office2013" | "15" => Ok(ProductFamily::Office2013),
            "modern" | "2016" | "2019" | "2021" | "2024" | "365" | "16" => {
                Ok(ProductFamily::Modern)
            }
            other => Err(format!("unknown product family: {}", other)),
        }
    }
}

// ============================================
// INSTALLABLE VERSIONS
// ============================================

/// One installable suite version, as listed by the caller's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeVersion {
    /// Human label, e.g. "Office LTSC 2021 Professional Plus"
    pub label: String,
    /// Product ID, e.g. "ProPlus2021Volume"
    pub product_id: String,
    /// Update channel, e.g. "PerpetualVL2021"
    pub channel: String,
}

impl OfficeVersion {
    pub fn new(label: impl Into<String>, product_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            product_id: product_id.into(),
            channel: channel.into(),
        }
    }

    pub fn family(&self) -> ProductFamily {
        ProductFamily::for_product(&self.product_id, None)
    }
}

/// Visio and Project product IDs matching a suite product.
///
///   O365ProPlusRetail  -> VisioProRetail / ProjectProRetail
///   Standard2021Volume -> VisioStd2021Volume / ProjectStd2021Volume
///   ProPlus2019Volume  -> VisioPro2019Volume / ProjectPro2019Volume
///   anything else      -> VisioProRetail / ProjectProRetail
pub fn companion_products(product_id: &str) -> (String, String) {
    if product_id.contains("O365") {
        return ("VisioProRetail".to_string(), "ProjectProRetail".to_string());
    }
    if let Some(suffix) = product_id.strip_prefix("Standard") {
        return (format!("VisioStd{}", suffix), format!("ProjectStd{}", suffix));
    }
    if let Some(suffix) = product_id.strip_prefix("ProPlus") {
        return (format!("VisioPro{}", suffix), format!("ProjectPro{}", suffix));
    }
    ("VisioProRetail".to_string(), "ProjectProRetail".to_string())
}
