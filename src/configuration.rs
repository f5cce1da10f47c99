// ============================================
// configuration.rs - Deployment tool configuration documents
// ============================================
//
// The deployment tool is driven entirely by configuration.xml. Two
// shapes are produced here:
//
// UNINSTALL (one Product per product ID + channel, one Language per culture)
//   <Configuration>
//     <Remove>
//       <Product ID="ProPlus2021Volume">
//         <Language ID="en-US" />
//         <Language ID="es-ES" />
//       </Product>
//     </Remove>
//     <RemoveMSI />                        only when MSI products are selected
//     <Display Level="None" AcceptEULA="TRUE" />
//     <Logging Level="Standard" Path="%temp%" />
//   </Configuration>
//
// INSTALL
//   <Configuration>
//     <Add OfficeClientEdition="64" Channel="PerpetualVL2021">
//       <Product ID="ProPlus2021Volume">
//         <Language ID="es-ES" />
//         <ExcludeApp ID="Access" />
//       </Product>
//       <Product ID="VisioPro2021Volume"> ...   when Visio is selected
//     </Add>
//     <Property Name="FORCEAPPSHUTDOWN" Value="TRUE" />
//     <Property Name="AUTOACTIVATE" Value="1" />
//     <Updates Enabled="TRUE" />
//     <RemoveMSI />                        optional
//     <Display Level="Full" AcceptEULA="TRUE" />
//     <Logging Level="Standard" Path="%temp%" />
//   </Configuration>
//
// Building is pure; `write_document` is the only function here that
// touches the disk.
// ============================================

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::catalog::{companion_products, Architecture, OfficeVersion, ProductFamily};
use crate::error::{BuildError, Error};
use crate::inventory::{normalize_culture, Installation};
use crate::logging::redact_path;

/// File name the deployment tool is pointed at.
pub const CONFIG_FILE_NAME: &str = "configuration.xml";

/// Apps that are installed as separate products rather than excluded.
const COMPANION_APPS: &[&str] = &["Visio", "Project"];

// ============================================
// DOCUMENT MODEL
// ============================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    pub fn child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: XmlElement) {
        self.children.push(child);
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn write(&self, xml: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        xml.push_str(&format!("{}<{}", indent, self.name));
        for (key, value) in &self.attributes {
            xml.push_str(&format!(" {}=\"{}\"", key, escape_xml(value)));
        }

        if self.children.is_empty() {
            xml.push_str(" />\n");
            return;
        }

        xml.push_str(">\n");
        for child in &self.children {
            child.write(xml, depth + 1);
        }
        xml.push_str(&format!("{}</{}>\n", indent, self.name));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Install,
    Uninstall,
}

/// A complete configuration.xml, built fresh for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationDocument {
    pub kind: DocumentKind,
    pub root: XmlElement,
}

impl ConfigurationDocument {
    /// Product nodes under Add/Remove, in document order.
    pub fn products(&self) -> Vec<&XmlElement> {
        self.root
            .children
            .iter()
            .filter(|c| c.name == "Add" || c.name == "Remove")
            .flat_map(|c| c.children_named("Product"))
            .collect()
    }

    pub fn has_remove_msi(&self) -> bool {
        self.root.children_named("RemoveMSI").next().is_some()
    }

    /// Render as UTF-8 XML.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);
        xml.push('\n');
        self.root.write(&mut xml, 0);
        xml
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn logging_element() -> XmlElement {
    XmlElement::new("Logging")
        .attr("Level", "Standard")
        .attr("Path", "%temp%")
}

fn language(culture: &str) -> Result<XmlElement, BuildError> {
    let culture = normalize_culture(culture).ok_or_else(|| BuildError::InvalidLanguage {
        tag: culture.to_string(),
    })?;
    Ok(XmlElement::new("Language").attr("ID", &culture))
}

// ============================================
// BUILDER
// ============================================

/// What the user picked for a fresh install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub version: OfficeVersion,
    /// Selected apps, e.g. ["Word", "Excel", "Visio"]
    pub apps: Vec<String>,
    /// Every app the chosen version offers
    pub available_apps: Vec<String>,
    pub architecture: Architecture,
    /// Language tag, e.g. "es-ES"
    pub language: String,
    pub remove_msi: bool,
}

pub struct ConfigurationBuilder;

impl ConfigurationBuilder {
    /// Uninstall document for a multi-selection.
    ///
    /// Click-to-Run installations are grouped by (product ID, channel) in
    /// first-seen order, one Language per distinct culture. Any MSI
    /// installation in the selection adds a single RemoveMSI node.
    pub fn build_uninstall(selected: &[Installation]) -> Result<ConfigurationDocument, BuildError> {
        if selected.is_empty() {
            return Err(BuildError::EmptySelection);
        }
        if let Some(bad) = selected.iter().find(|i| i.product_id.trim().is_empty()) {
            return Err(BuildError::UnidentifiedProduct {
                display_name: bad.display_name.clone(),
            });
        }

        // (product_id, channel, cultures) in first-seen order
        let mut groups: Vec<(&str, &str, Vec<String>)> = Vec::new();
        let mut remove_msi = false;

        for installation in selected {
            if !installation.click_to_run {
                remove_msi = true;
                continue;
            }

            let culture = normalize_culture(&installation.culture).ok_or_else(|| BuildError::InvalidLanguage {
                tag: installation.culture.clone(),
            })?;

            let product_id = installation.product_id.trim();
            let channel = installation.channel.as_str();
            match groups.iter_mut().find(|(p, c, _)| *p == product_id && *c == channel) {
                Some((_, _, cultures)) => {
                    if !cultures.contains(&culture) {
                        cultures.push(culture);
                    }
                }
                None => groups.push((product_id, channel, vec![culture])),
            }
        }

        let mut root = XmlElement::new("Configuration");
        if !groups.is_empty() {
            let mut remove = XmlElement::new("Remove");
            for (product_id, channel, cultures) in &groups {
                debug!(product = %product_id, %channel, languages = cultures.len(), "uninstall group");
                let mut product = XmlElement::new("Product").attr("ID", product_id);
                for culture in cultures {
                    product.push(language(culture)?);
                }
                remove.push(product);
            }
            root.push(remove);
        }
        if remove_msi {
            root.push(XmlElement::new("RemoveMSI"));
        }
        root.push(
            XmlElement::new("Display")
                .attr("Level", "None")
                .attr("AcceptEULA", "TRUE"),
        );
        root.push(logging_element());

        info!(products = groups.len(), remove_msi, "uninstall configuration built");
        Ok(ConfigurationDocument {
            kind: DocumentKind::Uninstall,
            root,
        })
    }

    /// Install document for one suite version plus optional Visio/Project.
    pub fn build_install(options: &InstallOptions) -> Result<ConfigurationDocument, BuildError> {
        let product_id = options.version.product_id.trim();
        if product_id.is_empty() {
            return Err(BuildError::UnidentifiedProduct {
                display_name: options.version.label.clone(),
            });
        }
        let language = language(&options.language)?;

        let selected: BTreeSet<&str> = options.apps.iter().map(|a| a.trim()).collect();
        let excluded: BTreeSet<&str> = options
            .available_apps
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty() && !selected.contains(a) && !COMPANION_APPS.contains(a))
            .collect();

        let mut add = XmlElement::new("Add").attr("OfficeClientEdition", options.architecture.client_edition());
        let channel = options.version.channel.trim();
        if !channel.is_empty() {
            add = add.attr("Channel", channel);
        }

        let mut suite = XmlElement::new("Product").attr("ID", product_id).child(language.clone());
        for app in &excluded {
            suite.push(XmlElement::new("ExcludeApp").attr("ID", app));
        }
        add.push(suite);

        let (visio_id, project_id) = companion_products(product_id);
        if selected.contains("Visio") {
            add.push(XmlElement::new("Product").attr("ID", &visio_id).child(language.clone()));
        }
        if selected.contains("Project") {
            add.push(XmlElement::new("Product").attr("ID", &project_id).child(language.clone()));
        }

        let mut root = XmlElement::new("Configuration")
            .child(add)
            .child(
                XmlElement::new("Property")
                    .attr("Name", "FORCEAPPSHUTDOWN")
                    .attr("Value", "TRUE"),
            )
            .child(XmlElement::new("Property").attr("Name", "AUTOACTIVATE").attr("Value", "1"))
            .child(XmlElement::new("Updates").attr("Enabled", "TRUE"));
        if options.remove_msi {
            root.push(XmlElement::new("RemoveMSI"));
        }
        root.push(
            XmlElement::new("Display")
                .attr("Level", "Full")
                .attr("AcceptEULA", "TRUE"),
        );
        root.push(logging_element());

        info!(
            product = %product_id,
            arch = %options.architecture,
            excluded = excluded.len(),
            "install configuration built"
        );
        Ok(ConfigurationDocument {
            kind: DocumentKind::Install,
            root,
        })
    }
}

// ============================================
// HAND-OFF
// ============================================

/// Write `configuration.xml` into `dir` (temp file + rename) and return its path.
pub fn write_document(document: &ConfigurationDocument, dir: &Path) -> Result<PathBuf, Error> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;

    let final_path = dir.join(CONFIG_FILE_NAME);
    let temp_path = dir.join(format!("{}.tmp", CONFIG_FILE_NAME));
    fs::write(&temp_path, document.to_xml()).map_err(io_err(&temp_path))?;

    if final_path.exists() {
        fs::remove_file(&final_path).map_err(io_err(&final_path))?;
    }
    fs::rename(&temp_path, &final_path).map_err(io_err(&final_path))?;

    debug!(path = %redact_path(&final_path), "configuration written");
    Ok(final_path)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> Error {
    let path = path.to_path_buf();
    move |source| Error::Io { path, source }
}

/// Split a selection by the deployment tool generation it needs.
///
/// Families appear in first-seen order; each keeps the selection order.
pub fn partition_by_family(selected: &[Installation]) -> Vec<(ProductFamily, Vec<Installation>)> {
    let mut parts: Vec<(ProductFamily, Vec<Installation>)> = Vec::new();
    for installation in selected {
        let family = installation.family();
        match parts.iter_mut().find(|(f, _)| *f == family) {
            Some((_, list)) => list.push(installation.clone()),
            None => parts.push((family, vec![installation.clone()])),
        }
    }
    parts
}
