//! Resolve the name of the package a file belongs to
//!
//! Two strategies are tried in order:
//!
//! 1. Walk from the file's directory up to the filesystem root looking for a
//!    `package.xml` descriptor and read its `<name>` element.
//! 2. Look for a `share` segment in the path (the install layout
//!    `<prefix>/share/<package>/...`) and take the segment after it.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// File name of the package descriptor
pub const PACKAGE_DESCRIPTOR: &str = "package.xml";

/// Determine the package name for `path`
pub fn resolve_package_name(path: impl AsRef<Path>) -> Result<String, PackageError> {
    let path = path.as_ref();

    if let Some(name) = find_descriptor_name(path) {
        return Ok(name);
    }

    if let Some(name) = package_from_share_segment(path) {
        log::debug!(
            "No {} above '{}', using install layout name '{}'",
            PACKAGE_DESCRIPTOR,
            path.display(),
            name
        );
        return Ok(name);
    }

    Err(PackageError::Undeterminable(path.to_path_buf()))
}

/// Walk every ancestor of the file's directory for a readable descriptor
fn find_descriptor_name(path: &Path) -> Option<String> {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let start = absolute.parent()?;

    for dir in start.ancestors() {
        let descriptor = dir.join(PACKAGE_DESCRIPTOR);
        if !descriptor.is_file() {
            continue;
        }

        match read_descriptor_name(&descriptor) {
            Ok(name) => {
                log::debug!("Found package '{}' in {}", name, descriptor.display());
                return Some(name);
            }
            Err(e) => {
                log::warn!("Ignoring {}: {}", descriptor.display(), e);
            }
        }
    }

    None
}

/// Read the `<name>` of a `package.xml`
pub fn read_descriptor_name(descriptor: &Path) -> Result<String, DescriptorError> {
    let content = std::fs::read_to_string(descriptor)?;
    parse_descriptor_name(&content)
}

/// Extract the `<name>` child of the `<package>` root element
pub fn parse_descriptor_name(content: &str) -> Result<String, DescriptorError> {
    let doc = roxmltree::Document::parse(content)?;
    let root = doc.root_element();
    if !root.has_tag_name("package") {
        return Err(DescriptorError::UnexpectedRoot(
            root.tag_name().name().to_string(),
        ));
    }

    root.children()
        .find(|node| node.has_tag_name("name"))
        .and_then(|node| node.text())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or(DescriptorError::MissingName)
}

/// The segment following the first `share` segment, if any
fn package_from_share_segment(path: &Path) -> Option<String> {
    let mut segments = path.components().filter_map(|c| match c {
        Component::Normal(segment) => Some(segment),
        _ => None,
    });

    segments
        .by_ref()
        .find(|segment| *segment == OsStr::new("share"))?;

    segments.next().map(|s| s.to_string_lossy().into_owned())
}

/// The package could not be determined by any strategy
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("Could not determine the package name for '{}'", .0.display())]
    Undeterminable(PathBuf),
}

/// Errors reading a single descriptor file
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Failed to read descriptor: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse descriptor: {0}")]
    Parse(#[from] roxmltree::Error),

    #[error("Expected a <package> root element, found <{0}>")]
    UnexpectedRoot(String),

    #[error("Descriptor has no <name> element")]
    MissingName,
}
