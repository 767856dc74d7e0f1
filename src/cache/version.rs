//! Mapping from the application's semantic version to the store version.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid application version {0:?}, expected major.minor.patch")]
pub struct VersionError(pub String);

/// Application version plus the integer the storage engine is versioned by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreVersion {
  app_version: String,
  number: u32,
}

impl StoreVersion {
  /// Parse `major.minor.patch`, ignoring any `-pre`/`+build` suffix.
  /// The store version is `major * 10000 + minor * 100 + patch`.
  pub fn parse(app_version: &str) -> Result<Self, VersionError> {
    let invalid = || VersionError(app_version.to_string());

    let core = app_version
      .trim()
      .trim_start_matches('v')
      .split(['-', '+'])
      .next()
      .ok_or_else(invalid)?;

    let parts: Vec<u32> = core
      .split('.')
      .map(|part| part.parse::<u32>().map_err(|_| invalid()))
      .collect::<Result<_, _>>()?;

    let [major, minor, patch] = parts[..] else {
      return Err(invalid());
    };

    let number = major
      .checked_mul(10_000)
      .and_then(|n| minor.checked_mul(100).and_then(|m| n.checked_add(m)))
      .and_then(|n| n.checked_add(patch))
      .ok_or_else(invalid)?;

    Ok(Self {
      app_version: app_version.trim().to_string(),
      number,
    })
  }

  pub fn app_version(&self) -> &str {
    &self.app_version
  }

  pub fn number(&self) -> u32 {
    self.number
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_version_number() {
    assert_eq!(StoreVersion::parse("1.2.3").unwrap().number(), 10203);
    assert_eq!(StoreVersion::parse("0.1.0").unwrap().number(), 100);
    assert_eq!(StoreVersion::parse("3.10.12").unwrap().number(), 31012);
  }

  #[test]
  fn test_suffixes_are_ignored() {
    let version = StoreVersion::parse("v2.0.1-beta.3").unwrap();
    assert_eq!(version.number(), 20001);
    assert_eq!(version.app_version(), "v2.0.1-beta.3");
  }

  #[test]
  fn test_invalid_versions() {
    assert!(StoreVersion::parse("1.2").is_err());
    assert!(StoreVersion::parse("1.2.3.4").is_err());
    assert!(StoreVersion::parse("one.two.three").is_err());
    assert!(StoreVersion::parse("").is_err());
  }
}
