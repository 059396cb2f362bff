use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

/// How a remote method returns its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape {
    /// A plain payload with no revocation metadata.
    Plain,
    /// A payload wrapped in [`Revocable`](super::Revocable), carrying the
    /// revoke keys it depends on.
    Revocable,
    /// Not memoizable (streaming, fire-and-forget, ...). Passing such a
    /// method to the memoizer is a usage error.
    NotCacheable,
}

/// Describes one parameter of a remote method.
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub name: &'static str,
    /// Whether the argument participates in the cache key. Parameters like
    /// tracing metadata opt out.
    pub part_of_key: bool,
}

impl ParameterDescriptor {
    /// A parameter that participates in the cache key.
    pub fn key(name: &'static str) -> Self {
        Self {
            name,
            part_of_key: true,
        }
    }

    /// A parameter excluded from the cache key.
    pub fn non_key(name: &'static str) -> Self {
        Self {
            name,
            part_of_key: false,
        }
    }
}

/// One-time, explicit description of a remote method: identity, parameters
/// and return shape.
///
/// Descriptors are declared once per method, next to the proxy definition;
/// everything the memoizer needs to know about a method is a pure function
/// of its descriptor.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub service: &'static str,
    pub method: &'static str,
    pub shape: ReturnShape,
    pub parameters: Vec<ParameterDescriptor>,
}

/// Per-method facts derived from a [`MethodDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodMetadata {
    /// Whether results carry revoke keys.
    pub is_revocable: bool,
    /// Indices of the arguments forming the cache key.
    pub key_argument_indices: Vec<usize>,
}

/// Derives and memoizes [`MethodMetadata`] per distinct method.
///
/// The metadata is computed once per (service, method) identity and kept for
/// the process lifetime.
#[derive(Debug, Default)]
pub struct MetadataProvider {
    cache: Mutex<FxHashMap<(&'static str, &'static str), Arc<MethodMetadata>>>,
}

impl MetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_metadata(&self, method: &MethodDescriptor) -> Arc<MethodMetadata> {
        let mut cache = self.cache.lock().unwrap();
        Arc::clone(
            cache
                .entry((method.service, method.method))
                .or_insert_with(|| {
                    Arc::new(MethodMetadata {
                        is_revocable: method.shape == ReturnShape::Revocable,
                        key_argument_indices: method
                            .parameters
                            .iter()
                            .enumerate()
                            .filter(|(_, p)| p.part_of_key)
                            .map(|(i, _)| i)
                            .collect(),
                    })
                }),
        )
    }
}
