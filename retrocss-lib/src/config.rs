use crate::engine::capabilities::{EngineVersion, PlatformCapabilities};
use crate::error::RetrocssError;
use crate::transform::Transform;
use log::warn;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "file:///index.html";

const DEBOUNCE_RANGE: (Duration, Duration) = (Duration::from_millis(80), Duration::from_millis(100));

#[derive(Debug, Clone)]
pub struct RetrocssConfig {
    /// Engine the page is retrofitted for.
    pub target: EngineVersion,
    /// Transforms to run even when the target supports the feature.
    pub force_transforms: Vec<Transform>,
    /// Transforms never to run.
    pub skip_transforms: Vec<Transform>,
    /// Document URL; hrefs resolve against it and it decides origins.
    pub base_url: Option<Url>,
    pub debounce: Duration,
    /// Wait after reloading a `<link>` with `crossorigin` set.
    pub reload_settle: Duration,
}

impl Default for RetrocssConfig {
    fn default() -> Self {
        RetrocssConfig {
            target: EngineVersion::default(),
            force_transforms: Vec::new(),
            skip_transforms: Vec::new(),
            base_url: None,
            debounce: Duration::from_millis(100),
            reload_settle: Duration::from_millis(100),
        }
    }
}

impl RetrocssConfig {
    pub fn new(target: EngineVersion) -> Self {
        RetrocssConfig {
            target,
            ..RetrocssConfig::default()
        }
    }

    /// Capabilities of the target with the per-transform overrides applied.
    pub fn capabilities(&self) -> PlatformCapabilities {
        let mut capabilities = PlatformCapabilities::for_version(self.target);
        for transform in &self.force_transforms {
            capabilities = capabilities.with_native(*transform, false);
        }
        for transform in &self.skip_transforms {
            capabilities = capabilities.with_native(*transform, true);
        }
        capabilities
    }

    pub fn base_url(&self) -> Result<Url, RetrocssError> {
        match &self.base_url {
            Some(url) => Ok(url.clone()),
            None => Ok(Url::parse(DEFAULT_BASE_URL)?),
        }
    }

    pub fn validate(&self) -> Result<(), RetrocssError> {
        if let Some(transform) = self
            .force_transforms
            .iter()
            .find(|transform| self.skip_transforms.contains(transform))
        {
            return Err(RetrocssError::InvalidConfiguration(format!(
                "transform `{}` is both forced and skipped",
                transform
            )));
        }
        if self.debounce < DEBOUNCE_RANGE.0 || self.debounce > DEBOUNCE_RANGE.1 {
            warn!(
                "debounce of {:?} is outside the usual {:?}..={:?} window",
                self.debounce, DEBOUNCE_RANGE.0, DEBOUNCE_RANGE.1
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_on_top_of_target() {
        let config = RetrocssConfig {
            force_transforms: vec![Transform::Oklch],
            skip_transforms: vec![Transform::MediaRange],
            ..RetrocssConfig::new(EngineVersion::new(16, 4))
        };
        let capabilities = config.capabilities();
        assert!(capabilities.needs(Transform::Oklch));
        assert!(!capabilities.needs(Transform::MediaRange));
        assert!(!capabilities.needs(Transform::Layers));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_conflicting_overrides_rejected() {
        let config = RetrocssConfig {
            force_transforms: vec![Transform::Layers],
            skip_transforms: vec![Transform::Layers],
            ..RetrocssConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RetrocssError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_default_base_url() {
        let config = RetrocssConfig::default();
        assert_eq!(config.base_url().unwrap().as_str(), DEFAULT_BASE_URL);
    }
}
