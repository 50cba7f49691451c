//! What the target engine supports natively.

use crate::style::css_matcher::SelectorSupport;
use crate::transform::Transform;
use std::fmt;
use std::str::FromStr;

/// A Safari/WebKit release, `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
}

impl EngineVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        EngineVersion { major, minor }
    }
}

impl Default for EngineVersion {
    fn default() -> Self {
        EngineVersion::new(15, 0)
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for EngineVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (s, "0"),
        };
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| format!("invalid engine version `{}` (expected MAJOR.MINOR)", s))
        };
        Ok(EngineVersion::new(parse(major)?, parse(minor)?))
    }
}

const IS_WHERE_SINCE: EngineVersion = EngineVersion::new(14, 0);
const LAYERS_OKLCH_HAS_SINCE: EngineVersion = EngineVersion::new(15, 4);
const MEDIA_RANGE_VIEWPORT_SINCE: EngineVersion = EngineVersion::new(16, 4);

/// Immutable record of native platform features, computed once per run.
/// A transform runs only when the matching feature is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    pub oklch: bool,
    pub cascade_layers: bool,
    pub media_range_syntax: bool,
    pub dynamic_viewport_units: bool,
    pub is_where_selectors: bool,
    pub has_selector: bool,
}

impl PlatformCapabilities {
    /// An engine with none of the features: every transform runs.
    pub const fn none() -> Self {
        PlatformCapabilities {
            oklch: false,
            cascade_layers: false,
            media_range_syntax: false,
            dynamic_viewport_units: false,
            is_where_selectors: false,
            has_selector: false,
        }
    }

    /// An engine with every feature: no transform runs.
    pub const fn all() -> Self {
        PlatformCapabilities {
            oklch: true,
            cascade_layers: true,
            media_range_syntax: true,
            dynamic_viewport_units: true,
            is_where_selectors: true,
            has_selector: true,
        }
    }

    pub fn for_version(version: EngineVersion) -> Self {
        PlatformCapabilities {
            oklch: version >= LAYERS_OKLCH_HAS_SINCE,
            cascade_layers: version >= LAYERS_OKLCH_HAS_SINCE,
            media_range_syntax: version >= MEDIA_RANGE_VIEWPORT_SINCE,
            dynamic_viewport_units: version >= MEDIA_RANGE_VIEWPORT_SINCE,
            is_where_selectors: version >= IS_WHERE_SINCE,
            has_selector: version >= LAYERS_OKLCH_HAS_SINCE,
        }
    }

    /// Whether the engine handles what `transform` rewrites.
    pub fn supports(&self, transform: Transform) -> bool {
        match transform {
            Transform::Layers => self.cascade_layers,
            Transform::MediaRange => self.media_range_syntax,
            Transform::ViewportUnits => self.dynamic_viewport_units,
            Transform::Oklch => self.oklch,
        }
    }

    pub fn needs(&self, transform: Transform) -> bool {
        !self.supports(transform)
    }

    /// Copy with the native flag behind `transform` overridden.
    pub fn with_native(mut self, transform: Transform, native: bool) -> Self {
        match transform {
            Transform::Layers => self.cascade_layers = native,
            Transform::MediaRange => self.media_range_syntax = native,
            Transform::ViewportUnits => self.dynamic_viewport_units = native,
            Transform::Oklch => self.oklch = native,
        }
        self
    }

    /// The transforms a pass must run, in pass order.
    pub fn needed_transforms(&self) -> Vec<Transform> {
        Transform::ALL
            .into_iter()
            .filter(|transform| self.needs(*transform))
            .collect()
    }

    pub fn selector_support(&self) -> SelectorSupport {
        SelectorSupport {
            is_where: self.is_where_selectors,
            has: self.has_selector,
        }
    }
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        PlatformCapabilities::for_version(EngineVersion::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_thresholds() {
        let old = PlatformCapabilities::for_version(EngineVersion::new(13, 1));
        assert_eq!(old, PlatformCapabilities::none());

        let v15 = PlatformCapabilities::for_version(EngineVersion::new(15, 0));
        assert!(v15.is_where_selectors);
        assert!(!v15.has_selector);
        assert_eq!(v15.needed_transforms(), Transform::ALL.to_vec());

        let v154 = PlatformCapabilities::for_version(EngineVersion::new(15, 4));
        assert_eq!(
            v154.needed_transforms(),
            vec![Transform::MediaRange, Transform::ViewportUnits]
        );

        let v17 = PlatformCapabilities::for_version(EngineVersion::new(17, 0));
        assert_eq!(v17, PlatformCapabilities::all());
    }

    #[test]
    fn test_parse_version() {
        assert_eq!("15.4".parse(), Ok(EngineVersion::new(15, 4)));
        assert_eq!("16".parse(), Ok(EngineVersion::new(16, 0)));
        assert!("fifteen".parse::<EngineVersion>().is_err());
        assert_eq!(EngineVersion::new(16, 4).to_string(), "16.4");
    }

    #[test]
    fn test_override() {
        let caps = PlatformCapabilities::all().with_native(Transform::Oklch, false);
        assert_eq!(caps.needed_transforms(), vec![Transform::Oklch]);
    }
}
