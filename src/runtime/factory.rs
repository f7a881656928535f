//! Runtime construction from provider configs.

use std::sync::Arc;

use crate::config::{ProviderKind, RuntimeConfig};
use crate::error::{Result, RuntimeError};

use super::{AdapterRuntime, LocalRuntime, ModelLoader, ModelRuntime, RemoteRuntime};

/// Build a runtime of the requested kind. The config's tag must agree with
/// `kind`; a mismatch is a caller bug and is rejected rather than coerced.
pub fn build_runtime(
    kind: ProviderKind,
    config: &RuntimeConfig,
    loader: Arc<dyn ModelLoader>,
) -> Result<Arc<dyn ModelRuntime>> {
    if config.kind() != kind {
        return Err(RuntimeError::ConfigMismatch {
            expected: kind,
            actual: config.kind(),
        });
    }
    Ok(match config {
        RuntimeConfig::Remote(c) => Arc::new(RemoteRuntime::new(c.clone())),
        RuntimeConfig::Local(c) => Arc::new(LocalRuntime::with_loader(c.clone(), loader)),
        RuntimeConfig::Adapter(c) => Arc::new(AdapterRuntime::with_loader(c.clone(), loader)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::runtime::GgufLoader;

    fn remote_config() -> RuntimeConfig {
        RuntimeConfig::Remote(RemoteConfig {
            endpoint: "http://localhost:9999/v1".into(),
            api_key: "test".into(),
            model: "test-model".into(),
            temperature: 0.7,
            max_tokens: 64,
        })
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        match build_runtime(ProviderKind::Local, &remote_config(), Arc::new(GgufLoader)) {
            Err(RuntimeError::ConfigMismatch { expected, actual }) => {
                assert_eq!(expected, ProviderKind::Local);
                assert_eq!(actual, ProviderKind::Remote);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("mismatched config was accepted"),
        }
    }

    #[test]
    fn matching_kind_builds() {
        let runtime = build_runtime(
            ProviderKind::Remote,
            &remote_config(),
            Arc::new(GgufLoader),
        )
        .unwrap();
        assert_eq!(runtime.kind(), ProviderKind::Remote);
        assert!(!runtime.is_loaded());
    }
}
